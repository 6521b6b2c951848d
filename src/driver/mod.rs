//! The Frame Ring Abstraction (spec §4.3): one contract, two transports.
//!
//! [`ZeroCopyDriver`] binds directly to the AF_XDP rings built in `xsk`; [`CopyingDriver`] falls
//! back to a raw `AF_PACKET` socket with kernel-allocated buffers when zero-copy isn't available.
//! The worker loop only ever sees the [`Driver`] trait.

pub mod copying;
pub mod zerocopy;

pub use copying::CopyingDriver;
pub use zerocopy::ZeroCopyDriver;

/// A descriptor borrowed from [`Driver::recv`]: the frame's location plus, if the driver supports
/// it, the time the NIC received it.
#[derive(Debug, Clone, Copy)]
pub struct FrameDescriptor {
    /// Identifies the owning frame by address arithmetic against the driver's pool base.
    pub offset: u64,
    /// Valid byte length of the frame's contents.
    pub length: u32,
    /// Hardware or software Rx timestamp, in nanoseconds, if available.
    pub rx_timestamp_ns: Option<u64>,
}

/// The four ring operations every worker drives, independent of transport.
///
/// **Ownership discipline**: after `recv`, descriptors are borrowed by the worker. For each one
/// returned, the worker must either include it in a `send`, pass it to `release`, or carry it into
/// a `send` later within the same iteration. Dropping a descriptor on the floor leaks a frame.
pub trait Driver: Send {
    /// Pull up to `max` descriptors from the receive ring.
    fn recv(&mut self, max: u32) -> Vec<FrameDescriptor>;

    /// Borrow the frame bytes a descriptor refers to, for in-place classify/rewrite.
    ///
    /// # Safety
    /// Callers must not retain the borrow past the descriptor's inclusion in a `send` or
    /// `release` call; a frame handed back to the driver may be immediately reused.
    fn frame_mut(&mut self, desc: &FrameDescriptor) -> &mut [u8];

    /// Queue descriptors for transmission. Returns how many were actually accepted; the
    /// remainder must be released by the caller.
    fn send(&mut self, descs: &[FrameDescriptor]) -> u32;

    /// Return descriptors that were received but will not be transmitted.
    fn release(&mut self, descs: &[FrameDescriptor]);

    /// Reclaim frames whose transmission has completed. Idempotent; must be cheap to call when
    /// there is nothing to reclaim.
    fn poll_completions(&mut self);
}

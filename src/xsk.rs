//! AF_XDP ring, Umem, and socket plumbing.
//!
//! The submodules mirror the kernel's own split: `ring` maps and walks the four shared-memory
//! rings, `umem` registers the packet-buffer pool and associates fill/completion queues with it,
//! `socket` opens the raw `AF_XDP` descriptor, `iface` resolves interface names and queries the
//! kernel's mmap offsets, and `user` exposes the reservation/commit API that callers in `driver`
//! and `worker` actually use.

pub mod iface;
pub mod ring;
pub mod socket;
pub mod umem;
pub mod user;

use crate::xdp::XdpMmapOffsets;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

/// `SOL_XDP`, not exposed by `libc` for all target triples.
pub(crate) const SOL_XDP: libc::c_int = 283;

/// Recover the byte length of a `mmap`ed slice from its fat pointer metadata.
///
/// # Safety
/// Only inspects the pointer's length metadata, never the pointee bytes.
pub(crate) fn ptr_len(ptr: *mut [u8]) -> usize {
    unsafe { (&*ptr).len() }
}

/// A device queue's identity: the triple the kernel uses to tell fill/completion rings apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct IfCtx {
    pub ifindex: u32,
    pub queue_id: u32,
    pub netnscookie: u64,
}

/// A resolved network interface, plus the queue to bind to on it.
#[derive(Clone, Copy)]
pub struct IfInfo {
    pub(crate) ctx: IfCtx,
    pub(crate) ifname: [libc::c_char; libc::IFNAMSIZ],
}

/// A raw `AF_XDP` socket file descriptor, closed on drop.
#[derive(Debug)]
pub(crate) struct SocketFd(pub(crate) libc::c_int);

impl SocketFd {
    pub(crate) fn get_opt<T>(
        &self,
        level: libc::c_int,
        name: libc::c_int,
        val: &T,
    ) -> Result<libc::socklen_t, crate::Errno> {
        let mut len = std::mem::size_of::<T>() as libc::socklen_t;
        let err = unsafe {
            libc::getsockopt(
                self.0,
                level,
                name,
                val as *const T as *mut libc::c_void,
                &mut len,
            )
        };

        if err != 0 {
            return Err(crate::LastErrno.into());
        }

        Ok(len)
    }
}

impl Drop for SocketFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// The socket-mmap offsets of the four rings, as reported by the kernel.
#[derive(Clone, Default)]
pub struct SocketMmapOffsets {
    pub(crate) inner: XdpMmapOffsets,
}

/// The producer/consumer configuration for registering a Umem's fill and completion rings.
#[derive(Clone, Debug)]
pub struct UmemConfig {
    /// Number of entries in the fill queue.
    pub fill_size: u32,
    /// Number of entries in the completion queue.
    pub complete_size: u32,
    /// Size of each data frame.
    pub frame_size: u32,
    /// Reserved headroom at the start of each frame.
    pub headroom: u32,
    /// Flags passed verbatim to `XDP_UMEM_REG`.
    pub flags: u32,
}

impl Default for UmemConfig {
    fn default() -> Self {
        UmemConfig {
            fill_size: 1 << 11,
            complete_size: 1 << 11,
            frame_size: 1 << 12,
            headroom: 0,
            flags: 0,
        }
    }
}

/// Configuration for a socket's receive/transmit rings.
#[derive(Clone, Debug, Default)]
pub struct SocketConfig {
    /// Number of entries in the RX ring, or `None` to leave it unconfigured.
    pub rx_size: Option<u32>,
    /// Number of entries in the TX ring, or `None` to leave it unconfigured.
    pub tx_size: Option<u32>,
    /// Flags passed to `bind()`, e.g. `XDP_ZEROCOPY`/`XDP_COPY`/`XDP_SHARED_UMEM`.
    pub bind_flags: u16,
}

/// The shared set of (interface, queue) pairs that currently have a fill/completion queue.
///
/// Each combination may only be claimed once: sharing the fill/completion ring of a queue between
/// two independent consumers would corrupt the ring's cached cursors.
#[derive(Clone)]
pub struct DeviceControl {
    pub(crate) inner: Arc<dyn ControlSet>,
}

impl DeviceControl {
    fn insert(&self, ctx: IfCtx) -> bool {
        self.inner.insert(ctx)
    }

    fn remove(&self, ctx: &IfCtx) {
        self.inner.remove(ctx)
    }
}

pub(crate) trait ControlSet: Send + Sync {
    fn insert(&self, ctx: IfCtx) -> bool;
    fn contains(&self, ctx: &IfCtx) -> bool;
    fn remove(&self, ctx: &IfCtx);
}

/// A `Umem`-bound socket: the fd through which fill/completion/rx/tx rings are all reached.
pub struct Socket {
    pub(crate) fd: Arc<SocketFd>,
    pub(crate) info: Arc<IfInfo>,
}

/// The packet-buffer pool shared between the kernel and this process.
///
/// Register one with [`Umem::new`], then call [`Umem::fq_cq`] to claim the fill/completion queue
/// of a given interface queue, and [`Umem::bind`] to configure and bind its RX/TX rings.
pub struct Umem {
    pub(crate) config: UmemConfig,
    pub(crate) fd: Arc<SocketFd>,
    pub(crate) umem_area: NonNull<[u8]>,
    pub(crate) devices: DeviceControl,
}

// Safety: `Umem` only exposes its raw `NonNull` area through methods that document the aliasing
// requirements placed on the caller; the pointee is required (by `Umem::new`'s contract) to
// outlive the value and only ever be observed through the XDP descriptors the kernel hands back.
unsafe impl Send for Umem {}
unsafe impl Sync for Umem {}

/// The fill/completion queue pair claimed for one (interface, queue) combination.
pub struct DeviceQueue {
    pub(crate) fcq: DeviceRings,
    pub(crate) socket: Socket,
    pub(crate) devices: DeviceControl,
}

pub(crate) struct DeviceRings {
    pub(crate) map: SocketMmapOffsets,
    pub(crate) prod: RingProd,
    pub(crate) cons: RingCons,
}

/// A socket whose RX/TX ring sizes have been configured and bound to an interface queue.
pub struct BoundSocket {
    pub(crate) socket: Socket,
    pub(crate) config: Arc<SocketConfig>,
    pub(crate) map: SocketMmapOffsets,
}

/// The receive ring of a bound socket.
pub struct RingRx {
    pub(crate) ring: RingCons,
    pub(crate) fd: Arc<SocketFd>,
}

/// The transmit ring of a bound socket.
pub struct RingTx {
    pub(crate) ring: RingProd,
    pub(crate) fd: Arc<SocketFd>,
}

/// Shared bookkeeping for one mmaped ring (RX, TX, fill, or completion).
///
/// Producer and consumer heads live in kernel-shared memory; `cached_producer`/`cached_consumer`
/// are this side's local view, refreshed only when a request can't be served from the cache.
#[derive(Debug)]
pub(crate) struct Ring {
    cached_producer: u32,
    cached_consumer: u32,
    mask: u32,
    size: u32,
    producer: &'static AtomicU32,
    consumer: &'static AtomicU32,
    ring: NonNull<core::ffi::c_void>,
    flags: &'static AtomicU32,
}

/// A producer-side ring: user space owns the write head, the kernel the read tail.
#[derive(Debug)]
pub struct RingProd {
    pub(crate) inner: Ring,
    pub(crate) mmap_addr: NonNull<[u8]>,
}

/// A consumer-side ring: the kernel owns the write head, user space the read tail.
#[derive(Debug)]
pub struct RingCons {
    pub(crate) inner: Ring,
    pub(crate) mmap_addr: NonNull<[u8]>,
}

// Safety: these rings are mmap-backed shared memory meant to be handed to exactly one worker
// thread at a time; the types are not `Sync`, only `Send`, matching that single-owner contract.
// `DeviceQueue`/`RingRx`/`RingTx` auto-derive `Send` from these once the raw pointers inside
// `Ring` are covered here.
unsafe impl Send for RingProd {}
unsafe impl Send for RingCons {}

impl RingProd {
    /// Read the ring's advisory flags, e.g. `XDP_RING_NEED_WAKEUP`.
    pub(crate) fn check_flags(&self) -> u32 {
        self.inner.flags.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Entries reserved by this side but not yet submitted to the kernel.
    pub(crate) fn count_pending(&self) -> u32 {
        self.inner
            .cached_producer
            .wrapping_sub(self.inner.producer.load(std::sync::atomic::Ordering::Relaxed))
    }
}

impl RingCons {
    pub(crate) fn check_flags(&self) -> u32 {
        self.inner.flags.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Entries peeked by this side but not yet released back to the kernel.
    pub(crate) fn count_pending(&self) -> u32 {
        self.inner
            .cached_consumer
            .wrapping_sub(self.inner.consumer.load(std::sync::atomic::Ordering::Relaxed))
    }
}

/// An index into a ring buffer's entries.
///
/// Not a raw offset: the ring's `mask` must be applied to recover the storage slot. Producer and
/// consumer heads share the same wrapping `u32` index space, so the index alone is only meaningful
/// relative to a specific ring.
#[repr(transparent)]
#[derive(Debug, Copy, Clone)]
pub struct BufIdx(pub u32);

/// One Umem frame handed back by [`Umem::frame`].
pub struct Frame {
    /// Byte offset of this frame within the Umem area, usable as a descriptor address.
    pub offset: u64,
    /// The frame's backing memory.
    pub addr: NonNull<[u8]>,
}

impl Umem {
    /// Borrow an arbitrary byte range of the Umem area, as referenced by a descriptor's raw
    /// `addr`/`len` pair.
    ///
    /// # Safety
    /// The caller must not alias this range with a concurrently-submitted kernel read/write of
    /// the same bytes (i.e. don't touch a frame that's currently enqueued on a ring).
    pub fn slice_at(&self, offset: u64, len: u32) -> Option<NonNull<[u8]>> {
        let total = ptr_len(self.umem_area.as_ptr()) as u64;
        if offset.checked_add(u64::from(len))? > total {
            return None;
        }

        let base = self.umem_area.as_ptr() as *mut u8;
        let slice =
            std::ptr::slice_from_raw_parts_mut(unsafe { base.offset(offset as isize) }, len as usize);
        Some(unsafe { NonNull::new_unchecked(slice) })
    }

    /// Borrow the frame identified by `idx`, for populating its contents before transmission.
    ///
    /// # Safety
    /// The caller must not alias this frame with a concurrently-submitted kernel read/write of
    /// the same chunk (i.e. don't touch a frame that's currently enqueued on a ring).
    pub fn frame(&self, idx: BufIdx) -> Option<Frame> {
        let frame_size = u64::from(self.config.frame_size);
        let offset = u64::from(idx.0) * frame_size;
        let total = ptr_len(self.umem_area.as_ptr()) as u64;

        if offset + frame_size > total {
            return None;
        }

        let base = self.umem_area.as_ptr() as *mut u8;
        let slice = std::ptr::slice_from_raw_parts_mut(
            unsafe { base.offset(offset as isize) },
            frame_size as usize,
        );

        Some(Frame {
            offset,
            addr: unsafe { NonNull::new_unchecked(slice) },
        })
    }
}

impl BoundSocket {
    /// Map the transmit ring, if the socket was bound with a non-zero `tx_size`.
    pub fn map_tx(&self) -> Result<RingTx, crate::Errno> {
        if self.config.tx_size.is_none() {
            return Err(crate::Errno(libc::EINVAL));
        }

        let count = self.config.tx_size.unwrap_or(0);
        let ring = unsafe { RingProd::tx(&self.socket.fd, &self.map, count)? };
        Ok(RingTx {
            ring,
            fd: self.socket.fd.clone(),
        })
    }

    /// Map the receive ring, if the socket was bound with a non-zero `rx_size`.
    pub fn map_rx(&self) -> Result<RingRx, crate::Errno> {
        if self.config.rx_size.is_none() {
            return Err(crate::Errno(libc::EINVAL));
        }

        let count = self.config.rx_size.unwrap_or(0);
        let ring = unsafe { RingCons::rx(&self.socket.fd, &self.map, count)? };
        Ok(RingRx {
            ring,
            fd: self.socket.fd.clone(),
        })
    }

    /// The raw file descriptor backing this bound socket.
    pub fn as_raw_fd(&self) -> libc::c_int {
        self.socket.fd.0
    }
}

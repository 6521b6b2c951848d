//! AF_XDP kernel-bypass transport (spec §4.3, "zero-copy driver").

use std::ffi::CString;
use std::ptr::NonNull;

use tracing::info;

use crate::config::ReflectorConfig;
use crate::error::ReflectorError;
use crate::xdp::XdpDesc;
use crate::xsk::{DeviceQueue, IfInfo, RingRx, RingTx, Socket, SocketConfig, Umem, UmemConfig};
use crate::Errno;

use super::{Driver, FrameDescriptor};

/// Binds a socket to `(interface, queue_id)`, registers an anonymous (optionally huge-page)
/// frame pool with the kernel, and exposes the four rings it returns.
pub struct ZeroCopyDriver {
    umem: Umem,
    queue: DeviceQueue,
    rx: RingRx,
    tx: RingTx,
    area: NonNull<[u8]>,
    pool_frames: u32,
}

// Safety: `area` is owned exclusively by this driver (never shared outside the Umem/ring
// machinery that already asserts `Send`), and the driver is only ever driven by one worker
// thread at a time, matching the single-owner contract the rest of `xsk` relies on.
unsafe impl Send for ZeroCopyDriver {}

impl ZeroCopyDriver {
    /// Bind to the given interface/queue and prime the Fill queue with half the pool.
    pub fn open(config: &ReflectorConfig, queue_id: u32) -> Result<Self, ReflectorError> {
        let mut info = IfInfo::invalid();
        let name = CString::new(config.interface.as_str())
            .map_err(|_| ReflectorError::InterfaceNotFound(config.interface.clone()))?;
        info.from_name(&name)
            .map_err(|_| ReflectorError::InterfaceNotFound(config.interface.clone()))?;
        info.set_queue(queue_id);

        let pool_bytes = config.frame_count as usize * config.frame_size as usize;
        let area = map_umem_area(pool_bytes, config.huge_pages)
            .ok_or(ReflectorError::OutOfMemory(pool_bytes))?;

        let umem_config = UmemConfig {
            fill_size: config.frame_count,
            complete_size: config.frame_count,
            frame_size: config.frame_size,
            headroom: 0,
            flags: 0,
        };

        // Safety: `area` was just mapped above, sized for exactly this configuration, and is
        // unmapped only in this driver's `Drop`, which outlives the `Umem` built from it.
        let mut umem =
            unsafe { Umem::new(umem_config, area) }.map_err(|raw| {
                ReflectorError::DriverInitFailed(Errno::from(raw))
            })?;

        let socket = Socket::with_shared(&info, &umem).map_err(ReflectorError::DriverInitFailed)?;

        let mut queue = umem
            .fq_cq(&socket)
            .map_err(ReflectorError::DriverInitFailed)?;

        let ring_size = config.batch_size.max(64);
        let socket_config = SocketConfig {
            rx_size: Some(ring_size),
            tx_size: Some(ring_size),
            bind_flags: 0,
        };

        let bound = umem
            .bind(&socket, &socket_config)
            .map_err(ReflectorError::DriverInitFailed)?;

        let rx = bound.map_rx().map_err(ReflectorError::DriverInitFailed)?;
        let tx = bound.map_tx().map_err(ReflectorError::DriverInitFailed)?;

        let half = config.frame_count / 2;
        let frame_size = u64::from(config.frame_size);
        let primed = {
            let mut fill = queue.fill(half);
            let primed = fill.insert((0..half).map(|i| u64::from(i) * frame_size));
            fill.commit();
            primed
        };
        info!(queue_id, primed, "fill queue primed");

        Ok(ZeroCopyDriver {
            umem,
            queue,
            rx,
            tx,
            area,
            pool_frames: config.frame_count,
        })
    }
}

fn map_umem_area(len: usize, huge_pages: bool) -> Option<NonNull<[u8]>> {
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    if huge_pages {
        flags |= libc::MAP_HUGETLB;
    }

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return None;
    }

    let slice = std::ptr::slice_from_raw_parts_mut(ptr as *mut u8, len);
    Some(unsafe { NonNull::new_unchecked(slice) })
}

impl Driver for ZeroCopyDriver {
    fn recv(&mut self, max: u32) -> Vec<FrameDescriptor> {
        let mut batch = self.rx.receive(max);
        let mut out = Vec::with_capacity(batch.capacity() as usize);

        while let Some(desc) = batch.read() {
            out.push(FrameDescriptor {
                offset: desc.addr,
                length: desc.len,
                // Unlike the copying driver's `SO_TIMESTAMPNS`, the base AF_XDP descriptor this
                // crate's `xsk` layer exposes carries no Rx timestamp field; doing so needs
                // `XDP_OPTIONS`/hardware timestamping wiring with no precedent in `xsk.rs`.
                rx_timestamp_ns: None,
            });
        }

        batch.release();
        out
    }

    fn frame_mut(&mut self, desc: &FrameDescriptor) -> &mut [u8] {
        let slice = self
            .umem
            .slice_at(desc.offset, desc.length)
            .expect("descriptor returned by this driver must address a valid frame");
        // Safety: the descriptor was handed out by `recv` on this same driver and has not yet
        // been passed to `send`/`release`, so no other owner observes these bytes concurrently.
        unsafe { &mut *slice.as_ptr() }
    }

    fn send(&mut self, descs: &[FrameDescriptor]) -> u32 {
        self.poll_completions();

        let accepted = {
            let mut batch = self.tx.transmit(descs.len() as u32);
            let accepted = batch.insert(descs.iter().map(|d| XdpDesc {
                addr: d.offset,
                len: d.length,
                options: 0,
            }));
            batch.commit();
            accepted
        };

        if self.tx.needs_wakeup() {
            self.tx.wake();
        }

        accepted
    }

    fn release(&mut self, descs: &[FrameDescriptor]) {
        if descs.is_empty() {
            return;
        }

        let mut fill = self.queue.fill(descs.len() as u32);
        fill.insert(descs.iter().map(|d| d.offset));
        fill.commit();
    }

    fn poll_completions(&mut self) {
        let reclaimed: Vec<u64> = {
            let mut batch = self.queue.complete(self.pool_frames);
            let mut reclaimed = Vec::new();
            while let Some(addr) = batch.read() {
                reclaimed.push(addr);
            }
            batch.release();
            reclaimed
        };

        if reclaimed.is_empty() {
            return;
        }

        let mut fill = self.queue.fill(reclaimed.len() as u32);
        fill.insert(reclaimed.into_iter());
        fill.commit();
    }
}

impl Drop for ZeroCopyDriver {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.area.as_ptr() as *mut libc::c_void, crate::xsk::ptr_len(self.area.as_ptr()));
        }
    }
}

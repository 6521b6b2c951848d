//! Raw `AF_PACKET` fallback transport (spec §4.3, "copying driver").
//!
//! An order of magnitude slower than [`super::ZeroCopyDriver`]: every frame is copied into and
//! out of a small set of kernel-allocated buffers instead of being DMA'd directly into a shared
//! pool. Exists so the reflector still runs on NICs or kernels without AF_XDP support.

use std::ffi::CString;
use std::time::Duration;

use tracing::warn;

use crate::config::ReflectorConfig;
use crate::error::ReflectorError;
use crate::Errno;

use super::{Driver, FrameDescriptor};

const ETH_P_ALL: u16 = 0x0003;

pub struct CopyingDriver {
    fd: libc::c_int,
    buffers: Vec<Vec<u8>>,
    /// Set when `config.latency` requested Rx timestamping; switches `recv` from plain `recv(2)`
    /// to `recvmsg(2)` so the `SO_TIMESTAMPNS` control message can be read back per frame.
    timestamping: bool,
}

impl CopyingDriver {
    pub fn open(config: &ReflectorConfig) -> Result<Self, ReflectorError> {
        let fd = unsafe {
            libc::socket(libc::AF_PACKET, libc::SOCK_RAW, i32::from(ETH_P_ALL.to_be()))
        };
        if fd < 0 {
            return Err(ReflectorError::DriverInitFailed(Errno::new()));
        }

        let name = CString::new(config.interface.as_str())
            .map_err(|_| ReflectorError::InterfaceNotFound(config.interface.clone()))?;
        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if ifindex == 0 {
            unsafe { libc::close(fd) };
            return Err(ReflectorError::InterfaceNotFound(config.interface.clone()));
        }

        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = ETH_P_ALL.to_be();
        addr.sll_ifindex = ifindex as i32;

        let bound = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of_val(&addr) as libc::socklen_t,
            )
        };
        if bound != 0 {
            let err = Errno::new();
            unsafe { libc::close(fd) };
            return Err(ReflectorError::DriverInitFailed(err));
        }

        set_recv_timeout(fd, config.poll_timeout);
        if config.latency {
            enable_rx_timestamping(fd);
        }

        Ok(CopyingDriver {
            fd,
            buffers: (0..config.batch_size.max(1))
                .map(|_| vec![0u8; config.frame_size as usize])
                .collect(),
            timestamping: config.latency,
        })
    }
}

fn set_recv_timeout(fd: libc::c_int, timeout: Duration) {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: libc::suseconds_t::from(timeout.subsec_micros() as i32),
    };
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const _ as *const libc::c_void,
            std::mem::size_of_val(&tv) as libc::socklen_t,
        );
    }
}

/// Ask the kernel to timestamp every received datagram (`CLOCK_REALTIME`-based), surfaced via an
/// `SCM_TIMESTAMPNS` control message on each `recvmsg`. Best-effort: a failure here just means
/// `recv` never finds the control message and `rx_timestamp_ns` stays `None`.
fn enable_rx_timestamping(fd: libc::c_int) {
    let enable: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TIMESTAMPNS,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of_val(&enable) as libc::socklen_t,
        );
    }
}

/// Receive one frame into `buf`, returning the byte count (or a negative `errno` result) and,
/// when timestamping is enabled and the kernel attached one, the frame's Rx timestamp.
fn recv_one(fd: libc::c_int, buf: &mut [u8], timestamping: bool) -> (isize, Option<u64>) {
    if !timestamping {
        let n = unsafe {
            libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), libc::MSG_DONTWAIT)
        };
        return (n, None);
    }

    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let cmsg_space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<libc::timespec>() as u32) };
    let mut control = vec![0u8; cmsg_space as usize];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = control.len() as _;

    let n = unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_DONTWAIT) };
    if n < 0 {
        return (n, None);
    }

    let mut rx_timestamp_ns = None;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            if hdr.cmsg_level == libc::SOL_SOCKET && hdr.cmsg_type == libc::SCM_TIMESTAMPNS {
                let ts = (libc::CMSG_DATA(cmsg) as *const libc::timespec).read_unaligned();
                rx_timestamp_ns = Some(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64);
                break;
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    (n, rx_timestamp_ns)
}

impl Driver for CopyingDriver {
    /// Drains up to `max` frames in one call rather than the traditional single-frame-per-call
    /// shape, so the worker loop sees the same batched contract the zero-copy driver exposes.
    fn recv(&mut self, max: u32) -> Vec<FrameDescriptor> {
        let max = max.min(self.buffers.len() as u32);
        let mut out = Vec::new();

        for slot in 0..max {
            let buf = &mut self.buffers[slot as usize];
            let (n, rx_timestamp_ns) = recv_one(self.fd, buf, self.timestamping);

            if n < 0 {
                // EAGAIN/EWOULDBLOCK once the socket's recv timeout/backlog is drained; any
                // other error just ends this batch early and is picked up on the next call.
                break;
            }

            out.push(FrameDescriptor {
                offset: u64::from(slot),
                length: n as u32,
                rx_timestamp_ns,
            });
        }

        out
    }

    fn frame_mut(&mut self, desc: &FrameDescriptor) -> &mut [u8] {
        let slot = desc.offset as usize;
        &mut self.buffers[slot][..desc.length as usize]
    }

    fn send(&mut self, descs: &[FrameDescriptor]) -> u32 {
        let mut sent = 0;
        for desc in descs {
            let slot = desc.offset as usize;
            let buf = &self.buffers[slot][..desc.length as usize];
            let n =
                unsafe { libc::send(self.fd, buf.as_ptr() as *const libc::c_void, buf.len(), 0) };
            if n >= 0 && n as usize == buf.len() {
                sent += 1;
            } else {
                warn!(slot, "short send on copying driver");
            }
        }
        sent
    }

    fn release(&mut self, _descs: &[FrameDescriptor]) {
        // No pool to return frames to: a descriptor's backing buffer is simply overwritten the
        // next time `recv` fills that slot.
    }

    fn poll_completions(&mut self) {
        // No Completion queue on this transport; `send` is synchronous.
    }
}

impl Drop for CopyingDriver {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

//! Kernel-bypass Layer-2 reflector for active network-measurement traffic.
//!
//! The crate is split into the AF_XDP ring/umem plumbing (`xdp`, `xsk`), the
//! driver abstraction that picks between zero-copy and copying transports
//! (`driver`), the per-frame classify/rewrite kernel (`classifier`,
//! `rewriter`), and the worker/controller/statistics machinery that ties it
//! all together for the `reflect` binary.

pub mod xsk;
/// Bindings for XDP (kernel-interface).
pub mod xdp;

pub mod classifier;
pub mod cli;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod platform;
pub mod privilege;
pub mod rewriter;
pub mod stats;
pub mod worker;

pub use classifier::{Classifier, Policy, RejectReason, SignatureTag};
pub use config::{ReflectMode, ReflectorConfig, SignatureFilterMode};
pub use controller::ReflectorController;
pub use error::{FatalError, ReflectorError};
pub use rewriter::Rewriter;
pub use stats::Statistics;

pub(crate) struct LastErrno;
pub struct Errno(libc::c_int);

impl From<LastErrno> for Errno {
    fn from(LastErrno: LastErrno) -> Self {
        Errno::new()
    }
}

impl From<libc::c_int> for Errno {
    fn from(raw: libc::c_int) -> Self {
        Errno(raw)
    }
}

impl Errno {
    pub(crate) fn new() -> Self {
        Errno(unsafe { *libc::__errno_location() })
    }

    pub fn raw(&self) -> libc::c_int {
        self.0
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = unsafe { libc::strerror(self.0) };
        let cstr = unsafe { std::ffi::CStr::from_ptr(st) };
        write!(f, "{}", cstr.to_string_lossy())
    }
}

impl std::fmt::Debug for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Errno({}: {})", self.0, self)
    }
}

impl std::error::Error for Errno {}

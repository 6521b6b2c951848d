//! Fatal error taxonomy (spec §7) and the raw `Errno` wrapper.
//!
//! Non-fatal conditions — `TooShort`, `BadMac`, `BadEtherType`, `BadProtocol`,
//! `BadSignature`, `TxFull`, `TxPartial`, `TxIoError`, `PollTimeout` — are not modeled
//! here: they are data returned by the classifier and driver, counted by [`crate::stats`],
//! never propagated as `Err`.

use crate::Errno;

/// Conditions that abort controller start; never raised once the reflector is `Running`.
#[derive(Debug, thiserror::Error)]
pub enum ReflectorError {
    #[error("interface {0:?} not found")]
    InterfaceNotFound(String),

    #[error("failed to resolve a local MAC address for {0:?}: {1}")]
    MacResolutionFailed(String, Errno),

    #[error("driver initialization failed on every worker, including the copying fallback: {0}")]
    DriverInitFailed(Errno),

    #[error("failed to spawn worker thread {0}: {1}")]
    ThreadSpawnFailed(usize, std::io::Error),

    #[error("failed to allocate the frame pool ({0} bytes)")]
    OutOfMemory(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Alias kept for callers that think in terms of "the fatal error type" rather than the
/// specific enum name; both names refer to the same taxonomy.
pub type FatalError = ReflectorError;

impl ReflectorError {
    /// The process exit code associated with this failure (spec §6: validation and init
    /// failures both exit 1).
    pub fn exit_code(&self) -> i32 {
        1
    }
}

//! Privilege drop (spec §4.5): performed after driver init, since binding the driver may require
//! `CAP_NET_RAW` or equivalent that an unprivileged uid would lack.

use tracing::{info, warn};

/// Switch to an unprivileged uid/gid when running as root. No-op when already unprivileged (e.g.
/// started under a capability grant instead of root).
///
/// Group is dropped before user: once the uid changes away from root, the process can no longer
/// change its gid.
pub fn drop_privileges() {
    if unsafe { libc::geteuid() } != 0 {
        return;
    }

    match unprivileged_ids() {
        Some((uid, gid)) => {
            let gid_ok = unsafe { libc::setgid(gid) } == 0;
            let uid_ok = unsafe { libc::setuid(uid) } == 0;
            if gid_ok && uid_ok {
                info!(uid, gid, "dropped root privileges after binding");
            } else {
                warn!("failed to drop privileges after binding; continuing as root");
            }
        }
        None => {
            warn!("no unprivileged uid/gid available (SUDO_UID/SUDO_GID unset); continuing as root");
        }
    }
}

/// The uid/gid to drop to, taken from the environment `sudo` sets when invoking a root process on
/// a caller's behalf. There is no other portable source for "the user who asked for this".
fn unprivileged_ids() -> Option<(libc::uid_t, libc::gid_t)> {
    let uid = std::env::var("SUDO_UID").ok()?.parse().ok()?;
    let gid = std::env::var("SUDO_GID").ok()?.parse().ok()?;
    Some((uid, gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprivileged_ids_requires_both_env_vars() {
        std::env::remove_var("SUDO_UID");
        std::env::remove_var("SUDO_GID");
        assert!(unprivileged_ids().is_none());
    }
}

//! NIC capability probing (spec §4.5 "probes NIC capability") used to pick a driver ordering and
//! to resolve the interface's own MAC address during `init()`.

use std::fs;

use crate::Errno;

/// What the platform probe discovered about an interface before driver init is attempted.
#[derive(Debug, Clone)]
pub struct Capability {
    pub rx_queues: u32,
    pub driver_name: String,
    pub speed_mbps: Option<u32>,
    pub zero_copy_capable: bool,
}

impl Capability {
    /// A one-line reason for the fallback-driver warning, naming the missing capability (spec
    /// §7: "explicit, actionable warnings... naming the required packages/capabilities").
    pub fn advisory(&self) -> String {
        if self.zero_copy_capable {
            return String::new();
        }
        format!(
            "driver {:?} is not known to support native AF_XDP zero-copy; requires CAP_NET_RAW and a kernel/driver with native XDP support",
            self.driver_name
        )
    }
}

/// Drivers known to support native AF_XDP zero-copy on commonly deployed NICs. Anything else
/// still binds an AF_XDP socket in generic (copy) mode,
/// which this reflector routes through [`crate::driver::CopyingDriver`] instead, since the
/// generic-mode zero-copy path offers none of the performance this reflector exists for.
const KNOWN_XDP_DRIVERS: &[&str] = &["i40e", "ice", "ixgbe", "mlx5_core", "veth", "virtio_net"];

/// Best-effort NIC introspection via sysfs. Never fails: an unreadable or absent entry degrades
/// to a conservative single-queue, copying-driver-only capability rather than aborting `init()`.
pub fn probe(interface: &str) -> Capability {
    let rx_queues = count_rx_queues(interface).unwrap_or(1);
    let driver_name = read_driver_name(interface).unwrap_or_else(|| "unknown".to_string());
    let speed_mbps = read_speed(interface);
    let zero_copy_capable = KNOWN_XDP_DRIVERS.contains(&driver_name.as_str());

    Capability {
        rx_queues,
        driver_name,
        speed_mbps,
        zero_copy_capable,
    }
}

fn count_rx_queues(interface: &str) -> Option<u32> {
    let path = format!("/sys/class/net/{interface}/queues");
    let mut count = 0u32;
    for entry in fs::read_dir(path).ok()? {
        let entry = entry.ok()?;
        if entry.file_name().to_string_lossy().starts_with("rx-") {
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(count)
    }
}

fn read_driver_name(interface: &str) -> Option<String> {
    let link = format!("/sys/class/net/{interface}/device/driver");
    let target = fs::read_link(link).ok()?;
    target.file_name()?.to_str().map(str::to_owned)
}

fn read_speed(interface: &str) -> Option<u32> {
    let path = format!("/sys/class/net/{interface}/speed");
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Resolve the interface's own MAC address from `/sys/class/net/<if>/address`.
pub fn local_mac(interface: &str) -> Result<[u8; 6], Errno> {
    let path = format!("/sys/class/net/{interface}/address");
    let raw = fs::read_to_string(&path).map_err(|_| Errno::from(libc::ENODEV))?;
    parse_mac(raw.trim()).ok_or_else(|| Errno::from(libc::ENODEV))
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface_degrades_to_single_queue_copying_fallback() {
        let capability = probe("xdp-reflector-test-nonexistent-if0");
        assert_eq!(capability.rx_queues, 1);
        assert!(!capability.zero_copy_capable);
        assert!(!capability.advisory().is_empty());
    }

    #[test]
    fn known_driver_advisory_is_empty() {
        let capability = Capability {
            rx_queues: 4,
            driver_name: "ice".to_string(),
            speed_mbps: Some(25_000),
            zero_copy_capable: true,
        };
        assert!(capability.advisory().is_empty());
    }

    #[test]
    fn parses_colon_separated_mac() {
        assert_eq!(parse_mac("aa:bb:cc:dd:ee:ff"), Some([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
        assert_eq!(parse_mac("aa:bb:cc"), None);
        assert_eq!(parse_mac("zz:bb:cc:dd:ee:ff"), None);
    }
}

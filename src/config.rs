//! `ReflectorConfig` (spec §3) and the small enums it is built from.

/// How much of the frame the [`crate::Rewriter`] swaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReflectMode {
    /// Swap only the two Ethernet MAC addresses.
    Mac,
    /// Also swap the two IP addresses (v4 or v6).
    MacIp,
    /// Also swap the two UDP ports.
    All,
}

/// Which families of 7-byte signatures the [`crate::Classifier`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureFilterMode {
    /// Every known signature family.
    All,
    /// Only the ITO probe family (`PROBEOT`, `DATA:OT`, `LATENCY`).
    Ito,
    /// Only `RFC2544` and `Y1564`.
    Custom,
    Rfc2544,
    Y1564,
}

/// The three bytes identifying a MAC address's vendor (OUI).
pub type Oui = [u8; 3];

/// Parameters assembled by the CLI layer ([`crate::cli`]) and handed to
/// [`crate::ReflectorController::init`].
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Name of the network interface to attach to, e.g. `"enp8s0"`.
    pub interface: String,
    /// The interface's own MAC address, resolved at `init()` time.
    pub local_mac: [u8; 6],
    /// Optional filter on the sender's OUI (first 3 bytes of the source MAC).
    pub oui_filter: Option<Oui>,
    /// Optional UDP destination port filter; `None` (or 0 on the CLI) matches any port.
    pub udp_port: Option<u16>,
    /// Which signature families the classifier accepts.
    pub sig_filter_mode: SignatureFilterMode,
    /// How much of each matched frame the rewriter swaps.
    pub reflect_mode: ReflectMode,
    /// Enable Rx timestamping and the latency histogram.
    pub latency: bool,
    /// Recompute IPv4/UDP checksums after rewriting instead of relying on TX offload.
    pub software_checksum: bool,
    /// Back the frame pool with huge pages when the platform supports it.
    pub huge_pages: bool,
    /// Maximum number of descriptors pulled or pushed per ring operation.
    pub batch_size: u32,
    /// Size in bytes of each frame in the pool.
    pub frame_size: u32,
    /// Number of frames in the pool.
    pub frame_count: u32,
    /// Rx poll timeout for the copying driver, and the upper bound on shutdown latency.
    pub poll_timeout: std::time::Duration,
    /// Whether VLAN-tagged frames (802.1Q/802.1ad) are accepted.
    pub allow_vlan: bool,
    /// Whether IPv6 frames are accepted.
    pub allow_ipv6: bool,
    /// Stats emission format / interval, parsed by `cli.rs`.
    pub stats: StatsConfig,
}

/// How and how often statistics are emitted.
#[derive(Debug, Clone, Copy)]
pub struct StatsConfig {
    pub format: StatsFormat,
    pub interval: std::time::Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsFormat {
    Text,
    Json,
    Csv,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        ReflectorConfig {
            interface: String::new(),
            local_mac: [0; 6],
            oui_filter: Some([0x00, 0xC0, 0x17]),
            udp_port: None,
            sig_filter_mode: SignatureFilterMode::All,
            reflect_mode: ReflectMode::All,
            latency: false,
            software_checksum: false,
            huge_pages: false,
            batch_size: 64,
            frame_size: 4096,
            frame_count: 4096,
            poll_timeout: std::time::Duration::from_millis(100),
            allow_vlan: true,
            allow_ipv6: true,
            stats: StatsConfig {
                format: StatsFormat::Text,
                interval: std::time::Duration::from_secs(1),
            },
        }
    }
}

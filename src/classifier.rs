//! Stateless frame classification (spec §4.1).
//!
//! [`Classifier::classify`] is pure: no observable side effects, and every byte range it
//! inspects is bounds-checked against `frame.len()` before the read. It never panics on
//! adversarial or truncated input.

use crate::config::{ReflectorConfig, SignatureFilterMode};

/// Minimum frame length accepted on the untagged IPv4 path.
pub const MIN_LEN: usize = 54;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN_8021Q: u16 = 0x8100;
const ETHERTYPE_VLAN_8021AD: u16 = 0x88A8;
const PROTO_UDP: u8 = 17;

/// Why the classifier rejected a frame. Never fatal; accounted in [`crate::stats::Statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Shorter than the minimum length for the path it would otherwise have matched.
    TooShort,
    /// Destination MAC did not match `policy.local_mac`, or the source OUI filter failed.
    BadMac,
    /// EtherType (after an optional VLAN tag) was neither IPv4 nor an allowed IPv6.
    BadEtherType,
    /// IP version/IHL was malformed, the protocol was not UDP, or the UDP port filter failed.
    BadProtocol,
    /// The 7-byte vendor signature matched none of the families enabled by the filter mode.
    BadSignature,
}

/// The probe family a frame's signature identified as, carried through to statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureTag {
    ProbeOt,
    DataOt,
    Latency,
    Rfc2544,
    Y1564,
}

/// Outcome of [`Classifier::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept(SignatureTag),
    Reject(RejectReason),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept(_))
    }
}

/// The per-frame parameters the classifier is evaluated against.
///
/// Deliberately smaller than [`ReflectorConfig`]: only what `classify` touches, so it is cheap
/// to copy into the worker's hot loop once per [`crate::ReflectorController::start`].
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub local_mac: [u8; 6],
    pub oui_filter: Option<[u8; 3]>,
    pub udp_port: Option<u16>,
    pub sig_filter_mode: SignatureFilterMode,
    pub allow_vlan: bool,
    pub allow_ipv6: bool,
}

impl From<&ReflectorConfig> for Policy {
    fn from(config: &ReflectorConfig) -> Self {
        Policy {
            local_mac: config.local_mac,
            oui_filter: config.oui_filter,
            udp_port: config.udp_port,
            sig_filter_mode: config.sig_filter_mode,
            allow_vlan: config.allow_vlan,
            allow_ipv6: config.allow_ipv6,
        }
    }
}

/// Zero-sized marker for the classification algorithm; grouped as a type for symmetry with
/// [`crate::Rewriter`], whose per-architecture dispatch does carry state.
pub struct Classifier;

impl Classifier {
    /// Classify one frame against `policy`. Never reads `frame[len..]`.
    pub fn classify(frame: &[u8], policy: &Policy) -> Decision {
        let len = frame.len();

        if len < MIN_LEN {
            return Decision::Reject(RejectReason::TooShort);
        }

        if frame[0..6] != policy.local_mac {
            return Decision::Reject(RejectReason::BadMac);
        }

        if let Some(oui) = policy.oui_filter {
            if frame[6..9] != oui {
                return Decision::Reject(RejectReason::BadMac);
            }
        }

        let ethertype = u16::from_be_bytes([frame[12], frame[13]]);

        let (ethertype, ip_offset) = if ethertype == ETHERTYPE_VLAN_8021Q
            || ethertype == ETHERTYPE_VLAN_8021AD
        {
            if !policy.allow_vlan {
                return Decision::Reject(RejectReason::BadEtherType);
            }
            if len < 18 {
                return Decision::Reject(RejectReason::TooShort);
            }
            (u16::from_be_bytes([frame[16], frame[17]]), 18)
        } else {
            (ethertype, 14)
        };

        let ip_hdr_len = if ethertype == ETHERTYPE_IPV4 {
            if len < ip_offset + 20 {
                return Decision::Reject(RejectReason::TooShort);
            }

            let version_ihl = frame[ip_offset];
            let version = version_ihl >> 4;
            let ihl = version_ihl & 0x0F;

            if version != 4 || ihl < 5 {
                return Decision::Reject(RejectReason::BadProtocol);
            }

            let ip_hdr_len = usize::from(ihl) * 4;
            if len < ip_offset + ip_hdr_len {
                return Decision::Reject(RejectReason::TooShort);
            }

            if frame[ip_offset + 9] != PROTO_UDP {
                return Decision::Reject(RejectReason::BadProtocol);
            }

            ip_hdr_len
        } else if ethertype == ETHERTYPE_IPV6 && policy.allow_ipv6 {
            const IPV6_HDR_LEN: usize = 40;

            if len < ip_offset + IPV6_HDR_LEN {
                return Decision::Reject(RejectReason::TooShort);
            }

            if frame[ip_offset + 6] != PROTO_UDP {
                return Decision::Reject(RejectReason::BadProtocol);
            }

            IPV6_HDR_LEN
        } else {
            return Decision::Reject(RejectReason::BadEtherType);
        };

        let udp_offset = ip_offset + ip_hdr_len;

        if len < udp_offset + 8 + 5 + 7 {
            return Decision::Reject(RejectReason::TooShort);
        }

        if let Some(port) = policy.udp_port {
            let dst_port = u16::from_be_bytes([frame[udp_offset + 2], frame[udp_offset + 3]]);
            if dst_port != port {
                return Decision::Reject(RejectReason::BadProtocol);
            }
        }

        let sig_offset = udp_offset + 8 + 5;
        let sig = &frame[sig_offset..sig_offset + 7];

        classify_signature(sig, policy.sig_filter_mode)
            .map(Decision::Accept)
            .unwrap_or(Decision::Reject(RejectReason::BadSignature))
    }
}

fn classify_signature(sig: &[u8], mode: SignatureFilterMode) -> Option<SignatureTag> {
    use SignatureFilterMode::*;

    let ito_enabled = matches!(mode, All | Ito);
    let rfc2544_enabled = matches!(mode, All | Custom | Rfc2544);
    let y1564_enabled = matches!(mode, All | Custom | Y1564);

    if ito_enabled {
        if sig == b"PROBEOT" {
            return Some(SignatureTag::ProbeOt);
        }
        if sig == b"DATA:OT" {
            return Some(SignatureTag::DataOt);
        }
        if sig == b"LATENCY" {
            return Some(SignatureTag::Latency);
        }
    }

    if rfc2544_enabled && sig == b"RFC2544" {
        return Some(SignatureTag::Rfc2544);
    }

    if y1564_enabled && &sig[..5] == b"Y1564" {
        return Some(SignatureTag::Y1564);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL_MAC: [u8; 6] = [0x00, 0x01, 0x55, 0x17, 0x1E, 0x1B];

    fn base_policy() -> Policy {
        Policy {
            local_mac: LOCAL_MAC,
            oui_filter: Some([0x00, 0xC0, 0x17]),
            udp_port: Some(3842),
            sig_filter_mode: SignatureFilterMode::All,
            allow_vlan: true,
            allow_ipv6: true,
        }
    }

    #[rustfmt::skip]
    fn probeot_frame() -> Vec<u8> {
        vec![
            0x00, 0x01, 0x55, 0x17, 0x1E, 0x1B,
            0x00, 0xC0, 0x17, 0x54, 0x05, 0x98,
            0x08, 0x00,
            0x45, 0x00, 0x00, 0x27, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00,
            0xC0, 0xA8, 0x00, 0x0A, 0xC0, 0xA8, 0x00, 0x01,
            0x0F, 0x02, 0x0F, 0x02, 0x00, 0x13, 0x00, 0x00,
            0x09, 0x10, 0xEA, 0x1D, 0x00,
            0x50, 0x52, 0x4F, 0x42, 0x45, 0x4F, 0x54,
        ]
    }

    #[test]
    fn scenario_a_accepts_probeot() {
        let frame = probeot_frame();
        let decision = Classifier::classify(&frame, &base_policy());
        assert_eq!(decision, Decision::Accept(SignatureTag::ProbeOt));
    }

    #[test]
    fn scenario_b_rejects_wrong_destination_mac() {
        let mut frame = probeot_frame();
        frame[0] = 0xFF;
        let decision = Classifier::classify(&frame, &base_policy());
        assert_eq!(decision, Decision::Reject(RejectReason::BadMac));
    }

    #[test]
    fn scenario_c_rejects_non_udp() {
        let mut frame = probeot_frame();
        frame[23] = 0x06;
        let decision = Classifier::classify(&frame, &base_policy());
        assert_eq!(decision, Decision::Reject(RejectReason::BadProtocol));
    }

    #[test]
    fn scenario_d_accepts_latency() {
        let mut frame = probeot_frame();
        let sig_offset = frame.len() - 7;
        frame[sig_offset..].copy_from_slice(b"LATENCY");
        let decision = Classifier::classify(&frame, &base_policy());
        assert_eq!(decision, Decision::Accept(SignatureTag::Latency));
    }

    #[test]
    fn scenario_e_vlan_tagged() {
        let base = probeot_frame();
        let mut tagged = Vec::with_capacity(base.len() + 4);
        tagged.extend_from_slice(&base[..12]);
        tagged.extend_from_slice(&[0x81, 0x00, 0x00, 0x64]);
        tagged.extend_from_slice(&base[12..]);

        let allow = Classifier::classify(&tagged, &base_policy());
        assert_eq!(allow, Decision::Accept(SignatureTag::ProbeOt));

        let mut disallow_policy = base_policy();
        disallow_policy.allow_vlan = false;
        let reject = Classifier::classify(&tagged, &disallow_policy);
        assert_eq!(reject, Decision::Reject(RejectReason::BadEtherType));
    }

    #[test]
    fn rejects_truncated_prefixes_without_false_accept() {
        let frame = probeot_frame();
        for n in 0..frame.len() {
            let decision = Classifier::classify(&frame[..n], &base_policy());
            assert!(!decision.is_accept(), "prefix of length {n} falsely accepted");
        }
    }

    #[test]
    fn never_panics_on_short_or_empty_input() {
        for n in 0..=13 {
            let frame = vec![0u8; n];
            let _ = Classifier::classify(&frame, &base_policy());
        }
    }
}

//! Property-based invariants for the classify/rewrite path (spec §8).

use proptest::prelude::*;
use reflector::classifier::{Decision, MIN_LEN};
use reflector::config::{ReflectMode, SignatureFilterMode};
use reflector::{Classifier, Policy, RejectReason};

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

fn ipv4_checksum_of(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in header.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += u32::from(word);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn pseudo_header_checksum(frame: &[u8]) -> u16 {
    let src: [u8; 4] = frame[26..30].try_into().unwrap();
    let dst: [u8; 4] = frame[30..34].try_into().unwrap();
    let udp_len = (frame.len() - 34) as u16;
    let len_be = udp_len.to_be_bytes();
    let pseudo = [src[0], src[1], src[2], src[3], dst[0], dst[1], dst[2], dst[3], 0, 17, len_be[0], len_be[1]];

    let mut sum: u32 = 0;
    for chunk in pseudo.chunks(2).chain(frame[34..].chunks(2)) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += u32::from(word);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

proptest! {
    /// Classifier never reads past `frame.len()`: any truncated prefix of a valid, accepted frame
    /// is rejected, never falsely accepted (spec §8 invariant 1/2).
    #[test]
    fn classify_never_falsely_accepts_a_truncated_prefix(cut in 0usize..probeot_frame().len()) {
        let frame = probeot_frame();
        let decision = Classifier::classify(&frame[..cut], &base_policy());
        if cut < frame.len() {
            prop_assert!(!decision.is_accept());
        }
    }

    /// Classifier never panics on arbitrary byte soup, regardless of length.
    #[test]
    fn classify_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0usize..256)) {
        let _ = Classifier::classify(&bytes, &base_policy());
    }

    /// An accepted frame's length always meets the minimum for the path it matched.
    #[test]
    fn accepted_frames_meet_the_minimum_length(extra_payload in proptest::collection::vec(any::<u8>(), 0usize..64)) {
        let mut frame = probeot_frame();
        frame.extend_from_slice(&extra_payload);
        if let Decision::Accept(_) = Classifier::classify(&frame, &base_policy()) {
            prop_assert!(frame.len() >= MIN_LEN);
        }
    }

    /// `rewrite(rewrite(f, mode, false), mode, false) == f` for every reflect mode (spec §8
    /// invariant 3): swapping src/dst twice without checksum recompute is always an involution.
    #[test]
    fn rewrite_is_an_involution_for_every_mode(
        extra_payload in proptest::collection::vec(any::<u8>(), 0usize..64),
        mode_idx in 0u8..3,
    ) {
        let mut frame = probeot_frame();
        frame.extend_from_slice(&extra_payload);
        let mode = match mode_idx {
            0 => ReflectMode::Mac,
            1 => ReflectMode::MacIp,
            _ => ReflectMode::All,
        };

        let original = frame.clone();
        reflector::Rewriter::rewrite(&mut frame, mode, false);
        reflector::Rewriter::rewrite(&mut frame, mode, false);
        prop_assert_eq!(frame, original);
    }

    /// With `compute_checksum = true`, the rewritten frame's IPv4 header and UDP checksums both
    /// validate under the standard internet checksum algorithm (spec §8 invariant 4).
    #[test]
    fn rewrite_with_checksum_recompute_always_validates(extra_payload in proptest::collection::vec(any::<u8>(), 0usize..64)) {
        let mut frame = probeot_frame();
        frame.extend_from_slice(&extra_payload);

        reflector::Rewriter::rewrite(&mut frame, ReflectMode::All, true);

        prop_assert_eq!(ipv4_checksum_of(&frame[14..34]), 0);
        prop_assert_eq!(pseudo_header_checksum(&frame), 0);
    }

    /// `classify` rejects with `BadMac` whenever the destination MAC doesn't match the policy's
    /// local MAC, regardless of what the rest of the frame looks like.
    #[test]
    fn wrong_destination_mac_is_always_rejected(mac_byte in any::<u8>()) {
        prop_assume!(mac_byte != LOCAL_MAC[0]);
        let mut frame = probeot_frame();
        frame[0] = mac_byte;
        let decision = Classifier::classify(&frame, &base_policy());
        prop_assert_eq!(decision, Decision::Reject(RejectReason::BadMac));
    }
}

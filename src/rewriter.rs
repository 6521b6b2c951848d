//! In-place header rewrite (spec §4.2): swap MAC/IP/UDP fields, optionally recompute checksums.
//!
//! [`Rewriter::rewrite`] assumes `frame` has already been accepted by [`crate::Classifier`]; it
//! re-derives the EtherType/IP offsets itself rather than taking them from the classifier, since
//! the two are independent, reusable contracts (spec §4.2's own framing).

mod simd;

use crate::config::ReflectMode;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN_8021Q: u16 = 0x8100;
const ETHERTYPE_VLAN_8021AD: u16 = 0x88A8;

/// Dispatches header rewriting to the process's chosen SIMD (or scalar) backend.
pub struct Rewriter;

impl Rewriter {
    /// Rewrite an already-accepted frame in place.
    ///
    /// `mode` controls how much of the frame is swapped; `compute_checksum` additionally
    /// recomputes the IPv4 header checksum and the UDP checksum when set.
    pub fn rewrite(frame: &mut [u8], mode: ReflectMode, compute_checksum: bool) {
        let backend = simd::backend();

        backend.swap6(frame, 0, 6);

        if mode == ReflectMode::Mac {
            return;
        }

        let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
        let (ethertype, ip_offset) = if ethertype == ETHERTYPE_VLAN_8021Q
            || ethertype == ETHERTYPE_VLAN_8021AD
        {
            (u16::from_be_bytes([frame[16], frame[17]]), 18)
        } else {
            (ethertype, 14)
        };

        if ethertype == ETHERTYPE_IPV4 {
            let ihl = frame[ip_offset] & 0x0F;
            let ip_hdr_len = usize::from(ihl) * 4;
            let udp_offset = ip_offset + ip_hdr_len;

            backend.swap4(frame, ip_offset + 12, ip_offset + 16);

            if mode == ReflectMode::All {
                backend.swap2(frame, udp_offset, udp_offset + 2);
            }

            if compute_checksum {
                recompute_ipv4_checksums(frame, ip_offset, udp_offset);
            }
        } else if ethertype == ETHERTYPE_IPV6 {
            const IPV6_HDR_LEN: usize = 40;
            let udp_offset = ip_offset + IPV6_HDR_LEN;

            backend.swap16(frame, ip_offset + 8, ip_offset + 24);

            if mode == ReflectMode::All {
                backend.swap2(frame, udp_offset, udp_offset + 2);
            }

            if compute_checksum {
                recompute_ipv6_udp_checksum(frame, ip_offset, udp_offset);
            }
        }
    }
}

fn recompute_ipv4_checksums(frame: &mut [u8], ip_offset: usize, udp_offset: usize) {
    let ihl = frame[ip_offset] & 0x0F;
    let ip_hdr_len = usize::from(ihl) * 4;

    frame[ip_offset + 10] = 0;
    frame[ip_offset + 11] = 0;
    let ip_checksum = checksum_of(&[&frame[ip_offset..ip_offset + ip_hdr_len]]);
    frame[ip_offset + 10..ip_offset + 12].copy_from_slice(&ip_checksum.to_be_bytes());

    let src_ip: [u8; 4] = frame[ip_offset + 12..ip_offset + 16].try_into().unwrap();
    let dst_ip: [u8; 4] = frame[ip_offset + 16..ip_offset + 20].try_into().unwrap();

    frame[udp_offset + 6] = 0;
    frame[udp_offset + 7] = 0;
    let udp_len = (frame.len() - udp_offset) as u16;
    let pseudo = ipv4_pseudo_header(&src_ip, &dst_ip, udp_len);
    let mut udp_checksum = checksum_of(&[&pseudo, &frame[udp_offset..]]);
    if udp_checksum == 0 {
        udp_checksum = 0xFFFF;
    }
    frame[udp_offset + 6..udp_offset + 8].copy_from_slice(&udp_checksum.to_be_bytes());
}

fn recompute_ipv6_udp_checksum(frame: &mut [u8], ip_offset: usize, udp_offset: usize) {
    let src_ip: [u8; 16] = frame[ip_offset + 8..ip_offset + 24].try_into().unwrap();
    let dst_ip: [u8; 16] = frame[ip_offset + 24..ip_offset + 40].try_into().unwrap();

    frame[udp_offset + 6] = 0;
    frame[udp_offset + 7] = 0;
    let udp_len = (frame.len() - udp_offset) as u32;
    let pseudo = ipv6_pseudo_header(&src_ip, &dst_ip, udp_len);
    // IPv6 UDP checksums are mandatory and must never be transmitted as zero.
    let udp_checksum = checksum_of(&[&pseudo, &frame[udp_offset..]]).max(1);
    frame[udp_offset + 6..udp_offset + 8].copy_from_slice(&udp_checksum.to_be_bytes());
}

fn ipv4_pseudo_header(src: &[u8; 4], dst: &[u8; 4], udp_len: u16) -> [u8; 12] {
    let len = udp_len.to_be_bytes();
    [
        src[0], src[1], src[2], src[3], dst[0], dst[1], dst[2], dst[3], 0, 17, len[0], len[1],
    ]
}

fn ipv6_pseudo_header(src: &[u8; 16], dst: &[u8; 16], udp_len: u32) -> [u8; 40] {
    let mut buf = [0u8; 40];
    buf[0..16].copy_from_slice(src);
    buf[16..32].copy_from_slice(dst);
    buf[32..36].copy_from_slice(&udp_len.to_be_bytes());
    buf[39] = 17;
    buf
}

/// Internet (one's-complement) checksum over the concatenation of `slices`, handling an odd
/// byte boundary between adjacent slices (e.g. a pseudo-header followed by the UDP segment).
fn checksum_of(slices: &[&[u8]]) -> u16 {
    let mut sum: u32 = 0;
    let mut carry: Option<u8> = None;

    for &data in slices {
        let mut iter = data.iter();

        if let Some(c) = carry.take() {
            match iter.next() {
                Some(&b) => sum += u32::from(u16::from_be_bytes([c, b])),
                None => sum += u32::from(c) << 8,
            }
        }

        loop {
            let Some(&hi) = iter.next() else { break };
            match iter.next() {
                Some(&lo) => sum += u32::from(u16::from_be_bytes([hi, lo])),
                None => {
                    carry = Some(hi);
                    break;
                }
            }
        }
    }

    if let Some(c) = carry {
        sum += u32::from(c) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn scenario_a_swaps_mac_ip_and_identical_ports() {
        let input = probeot_frame();
        let mut output = input.clone();
        Rewriter::rewrite(&mut output, ReflectMode::All, false);

        assert_eq!(&output[0..6], &input[6..12]);
        assert_eq!(&output[6..12], &input[0..6]);
        assert_eq!(&output[26..30], &input[30..34]);
        assert_eq!(&output[30..34], &input[26..30]);
        // The packet uses the same port (0x0F02) on both sides, so the swap is a no-op here.
        assert_eq!(&output[34..38], &input[34..38]);
        // Payload untouched.
        assert_eq!(&output[47..], &input[47..]);
    }

    #[test]
    fn rewrite_is_an_involution_without_checksum_recompute() {
        let input = probeot_frame();
        let mut roundtrip = input.clone();
        Rewriter::rewrite(&mut roundtrip, ReflectMode::All, false);
        Rewriter::rewrite(&mut roundtrip, ReflectMode::All, false);
        assert_eq!(roundtrip, input);
    }

    #[test]
    fn scenario_d_checksum_recompute_validates() {
        let mut frame = probeot_frame();
        let sig_offset = frame.len() - 7;
        frame[sig_offset..].copy_from_slice(b"LATENCY");

        Rewriter::rewrite(&mut frame, ReflectMode::All, true);

        let ip_checksum = checksum_of(&[&frame[14..34]]);
        assert_eq!(ip_checksum, 0);

        let src_ip: [u8; 4] = frame[26..30].try_into().unwrap();
        let dst_ip: [u8; 4] = frame[30..34].try_into().unwrap();
        let udp_len = (frame.len() - 34) as u16;
        let pseudo = ipv4_pseudo_header(&src_ip, &dst_ip, udp_len);
        let udp_checksum = checksum_of(&[&pseudo, &frame[34..]]);
        assert_eq!(udp_checksum, 0);
    }

    #[test]
    fn simd_backends_agree_with_each_other_via_dispatch() {
        let input = probeot_frame();
        let mut a = input.clone();
        let mut b = input;
        Rewriter::rewrite(&mut a, ReflectMode::All, true);
        Rewriter::rewrite(&mut b, ReflectMode::All, true);
        assert_eq!(a, b);
    }
}

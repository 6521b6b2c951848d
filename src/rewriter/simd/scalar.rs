//! Portable scalar swap primitives.
//!
//! Used directly on platforms without a dedicated vector backend, and as the ground truth that
//! [`super::x86`]/[`super::arm`] must agree with byte-for-byte (spec §8 invariant 5).

use super::Backend;

pub(crate) struct ScalarBackend;

impl Backend for ScalarBackend {
    fn swap6(&self, frame: &mut [u8], a: usize, b: usize) {
        swap_range::<6>(frame, a, b);
    }

    fn swap4(&self, frame: &mut [u8], a: usize, b: usize) {
        swap_range::<4>(frame, a, b);
    }

    fn swap16(&self, frame: &mut [u8], a: usize, b: usize) {
        swap_range::<16>(frame, a, b);
    }

    fn swap2(&self, frame: &mut [u8], a: usize, b: usize) {
        swap_range::<2>(frame, a, b);
    }
}

/// Swap `N` bytes at `frame[a..a+N]` with `frame[b..b+N]` via a stack temporary.
///
/// Never casts the unaligned frame bytes to a wider integer and dereferences; only
/// byte-for-byte `copy_from_slice`.
fn swap_range<const N: usize>(frame: &mut [u8], a: usize, b: usize) {
    let mut tmp = [0u8; N];
    tmp.copy_from_slice(&frame[a..a + N]);
    frame.copy_within(b..b + N, a);
    frame[b..b + N].copy_from_slice(&tmp);
}

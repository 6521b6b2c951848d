//! Per-architecture dispatch for the byte-swap primitives [`crate::rewriter`] composes.
//!
//! The backend is chosen exactly once per process (spec §5: "CPU feature detection runs exactly
//! once per process"), then reused for every frame. No dynamic loading; the three variants are
//! compiled into the binary and selection is a single atomic check.

mod arm;
mod scalar;
mod x86;

use std::sync::OnceLock;

pub(crate) trait Backend: Send + Sync {
    /// Swap the 6-byte fields at `frame[a..a+6]` and `frame[b..b+6]`.
    fn swap6(&self, frame: &mut [u8], a: usize, b: usize);
    /// Swap the 4-byte fields at `frame[a..a+4]` and `frame[b..b+4]`.
    fn swap4(&self, frame: &mut [u8], a: usize, b: usize);
    /// Swap the 16-byte fields at `frame[a..a+16]` and `frame[b..b+16]`.
    fn swap16(&self, frame: &mut [u8], a: usize, b: usize);
    /// Swap the 2-byte fields at `frame[a..a+2]` and `frame[b..b+2]`.
    fn swap2(&self, frame: &mut [u8], a: usize, b: usize);
}

static BACKEND: OnceLock<&'static dyn Backend> = OnceLock::new();

pub(crate) fn backend() -> &'static dyn Backend {
    *BACKEND.get_or_init(detect)
}

fn detect() -> &'static dyn Backend {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("ssse3") {
            return &x86::Sse2Backend;
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        if std::arch::is_aarch64_feature_detected!("neon") {
            return &arm::NeonBackend;
        }
    }

    &scalar::ScalarBackend
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_backend_swaps_correctly() {
        let backend = &scalar::ScalarBackend;
        let mut frame = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        backend.swap6(&mut frame, 0, 6);
        assert_eq!(frame, [7, 8, 9, 10, 11, 12, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn detected_backend_agrees_with_scalar_on_swap6() {
        let mut a = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 0, 0, 0, 0];
        let mut b = a;

        backend().swap6(&mut a, 0, 6);
        scalar::ScalarBackend.swap6(&mut b, 0, 6);

        assert_eq!(a, b);
    }

    #[test]
    fn detected_backend_agrees_with_scalar_on_swap4() {
        let mut a = [1u8, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut b = a;

        backend().swap4(&mut a, 0, 4);
        scalar::ScalarBackend.swap4(&mut b, 0, 4);

        assert_eq!(a, b);
    }

    #[test]
    fn detected_backend_agrees_with_scalar_on_swap16() {
        let mut a = [0u8; 32];
        for (i, byte) in a.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let mut b = a;

        backend().swap16(&mut a, 0, 16);
        scalar::ScalarBackend.swap16(&mut b, 0, 16);

        assert_eq!(a, b);
    }

    #[test]
    fn detected_backend_agrees_with_scalar_on_swap2() {
        let mut a = [1u8, 2, 3, 4];
        let mut b = a;

        backend().swap2(&mut a, 0, 2);
        scalar::ScalarBackend.swap2(&mut b, 0, 2);

        assert_eq!(a, b);
    }
}

//! Secure random number generation.
//!
//! All randomness on security-relevant paths (nonces, padding, handshake
//! noise, session salts) comes from the operating system's entropy source.
//! The bounded helpers also back the shaping jitter and probe-response rolls,
//! which only need unpredictability, not perfect uniformity.

use rand::RngCore;
use rand_core::OsRng;

/// Cryptographically secure random number generator.
pub struct SecureRandom;

impl SecureRandom {
    /// Fill a buffer with cryptographically secure random bytes.
    pub fn fill(dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    /// Generate a fixed-size array of random bytes.
    pub fn bytes<const N: usize>() -> [u8; N] {
        let mut buf = [0u8; N];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    /// Generate a random u64.
    pub fn u64() -> u64 {
        OsRng.next_u64()
    }

    /// Random integer in `[0, n)`; 0 when `n == 0`.
    pub fn below(n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        OsRng.next_u64() % n
    }

    /// Random integer in `[min, max]` inclusive; `min` when the range is
    /// empty or inverted.
    pub fn range(min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        min + Self::below(max - min + 1)
    }

    /// Biased coin: true with probability `prob`.
    pub fn chance(prob: f64) -> bool {
        if prob <= 0.0 {
            return false;
        }
        if prob >= 1.0 {
            return true;
        }
        const SCALE: u64 = 10_000;
        let threshold = (prob * SCALE as f64) as u64;
        if threshold == 0 {
            return false;
        }
        Self::below(SCALE) < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fill_produces_entropy() {
        let mut buf1 = [0u8; 32];
        let mut buf2 = [0u8; 32];
        SecureRandom::fill(&mut buf1);
        SecureRandom::fill(&mut buf2);

        assert!(!buf1.iter().all(|&b| b == 0));
        assert_ne!(buf1, buf2);
    }

    #[test]
    fn test_below_bounds() {
        assert_eq!(SecureRandom::below(0), 0);
        for _ in 0..200 {
            assert!(SecureRandom::below(7) < 7);
        }
    }

    #[test]
    fn test_range_inclusive() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let v = SecureRandom::range(3, 9);
            assert!((3..=9).contains(&v));
            seen.insert(v);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn test_range_inverted() {
        assert_eq!(SecureRandom::range(5, 5), 5);
        assert_eq!(SecureRandom::range(9, 3), 9);
    }

    #[test]
    fn test_chance_extremes() {
        assert!(!SecureRandom::chance(0.0));
        assert!(!SecureRandom::chance(-1.0));
        assert!(SecureRandom::chance(1.0));
        assert!(SecureRandom::chance(2.0));
    }
}

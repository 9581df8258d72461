//! Traffic shaping.
//!
//! The shaper bounds how much caller data one record may carry and, when
//! enabled, injects rare random delays between record sends so inter-record
//! timing carries less signal.

use std::time::Duration;

use crate::crypto::SecureRandom;
use crate::transport::ShapingConfig;

const DEFAULT_JITTER_PROB: f64 = 0.04;

/// Splits writes into bounded segments and injects random send jitter.
#[derive(Clone, Debug)]
pub struct FrameShaper {
    enabled: bool,
    max_payload_len: usize,
    jitter_min_ms: u64,
    jitter_max_ms: u64,
    jitter_prob: f64,
}

impl FrameShaper {
    /// Build a shaper from configuration.
    pub fn new(cfg: &ShapingConfig) -> Self {
        let [min, max] = normalize_jitter(cfg.jitter_range);
        Self {
            enabled: cfg.enabled,
            max_payload_len: cfg.max_payload_len(),
            jitter_min_ms: min,
            jitter_max_ms: max,
            jitter_prob: DEFAULT_JITTER_PROB,
        }
    }

    /// Payload bytes one record may carry.
    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Segment sizes for a write of `n` bytes: full segments followed by the
    /// remainder. Empty for `n == 0`.
    pub fn split(&self, mut n: usize) -> Vec<usize> {
        if n == 0 {
            return Vec::new();
        }
        let max_len = self.max_payload_len.max(1);
        let mut parts = Vec::with_capacity(n.div_ceil(max_len));
        while n > 0 {
            let size = max_len.min(n);
            parts.push(size);
            n -= size;
        }
        parts
    }

    /// Flip the jitter coin and maybe sleep before the next record send.
    pub async fn maybe_sleep(&self) {
        if !self.enabled || self.jitter_max_ms == 0 || self.jitter_prob <= 0.0 {
            return;
        }
        if SecureRandom::chance(self.jitter_prob) {
            let delay = SecureRandom::range(self.jitter_min_ms, self.jitter_max_ms);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

fn normalize_jitter([min, max]: [u64; 2]) -> [u64; 2] {
    if min > max {
        [max, min]
    } else {
        [min, max]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaper(max_frame_len: usize) -> FrameShaper {
        FrameShaper::new(&ShapingConfig {
            enabled: false,
            jitter_range: [0, 0],
            max_frame_len,
        })
    }

    #[test]
    fn test_split_exact_and_remainder() {
        let s = shaper(110); // payload 100
        assert_eq!(s.split(250), vec![100, 100, 50]);
        assert_eq!(s.split(100), vec![100]);
        assert_eq!(s.split(1), vec![1]);
    }

    #[test]
    fn test_split_empty() {
        let s = shaper(110);
        assert!(s.split(0).is_empty());
    }

    #[test]
    fn test_split_covers_input() {
        let s = shaper(1400);
        for n in [1usize, 1389, 1390, 1391, 5000] {
            let parts = s.split(n);
            assert_eq!(parts.iter().sum::<usize>(), n);
            assert_eq!(parts.len(), n.div_ceil(s.max_payload_len()));
            assert!(parts.iter().all(|&p| p <= s.max_payload_len()));
        }
    }

    #[test]
    fn test_jitter_normalization() {
        let s = FrameShaper::new(&ShapingConfig {
            enabled: true,
            jitter_range: [40, 10],
            max_frame_len: 1400,
        });
        assert_eq!(s.jitter_min_ms, 10);
        assert_eq!(s.jitter_max_ms, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_shaper_never_sleeps() {
        let s = shaper(1400);
        let start = tokio::time::Instant::now();
        for _ in 0..100 {
            s.maybe_sleep().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}

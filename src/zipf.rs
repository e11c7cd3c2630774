//! Zipf-distributed key generation.
//!
//! Keys are zero-based and drawn from the half-open range `[0, maximum)`;
//! key `k` is drawn with probability proportional to `1 / (k + 1)^skew`.
//! Sampling uses rejection-inversion (Hörmann & Derflinger, "Rejection-inversion
//! to generate variates from monotone discrete distributions", 1996), which
//! needs O(1) memory regardless of the key range and accepts `skew = 0`.

use anyhow::{Result, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reproducible Zipf key source. One instance per worker, seeded by worker id.
#[derive(Debug, Clone)]
pub struct ZipfKeyGenerator {
    rng: StdRng,
    skew: f64,
    maximum: u64,
    h_integral_x1: f64,
    h_integral_n: f64,
    s: f64,
}

impl ZipfKeyGenerator {
    pub fn new(skew: f64, maximum: u64, seed: u64) -> Result<Self> {
        if maximum == 0 {
            bail!("zipf key range must contain at least one key");
        }
        if !skew.is_finite() || skew < 0.0 {
            bail!("zipf skew must be a finite non-negative number, got {skew}");
        }

        let mut generator = ZipfKeyGenerator {
            rng: StdRng::seed_from_u64(seed),
            skew,
            maximum,
            h_integral_x1: 0.0,
            h_integral_n: 0.0,
            s: 0.0,
        };

        generator.h_integral_x1 = generator.h_integral(1.5) - 1.0;
        generator.h_integral_n = generator.h_integral(maximum as f64 + 0.5);
        generator.s =
            2.0 - generator.h_integral_inverse(generator.h_integral(2.5) - generator.h(2.0));

        Ok(generator)
    }

    pub fn skew(&self) -> f64 {
        self.skew
    }

    pub fn maximum(&self) -> u64 {
        self.maximum
    }

    /// Draws the next key in `[0, maximum)`.
    #[inline]
    pub fn next_key(&mut self) -> u64 {
        self.next_rank() - 1
    }

    pub fn fill(&mut self, keys: &mut [u64]) {
        for key in keys.iter_mut() {
            *key = self.next_key();
        }
    }

    /// Analytic probability of drawing `key`. Linear in `maximum`.
    pub fn probability(&self, key: u64) -> f64 {
        if key >= self.maximum {
            return 0.0;
        }

        let normalizer: f64 = (1..=self.maximum)
            .map(|rank| (rank as f64).powf(-self.skew))
            .sum();
        ((key + 1) as f64).powf(-self.skew) / normalizer
    }

    // Rank in 1..=maximum
    fn next_rank(&mut self) -> u64 {
        loop {
            let u = self.h_integral_n
                + self.rng.random::<f64>() * (self.h_integral_x1 - self.h_integral_n);
            let x = self.h_integral_inverse(u);

            let mut k = (x + 0.5) as u64;
            if k < 1 {
                k = 1;
            } else if k > self.maximum {
                k = self.maximum;
            }

            let kf = k as f64;
            if kf - x <= self.s || u >= self.h_integral(kf + 0.5) - self.h(kf) {
                return k;
            }
        }
    }

    /// `h(x) = 1 / x^skew`
    fn h(&self, x: f64) -> f64 {
        (-self.skew * x.ln()).exp()
    }

    /// Antiderivative of `h`, shifted so that `H(1) = 0`.
    fn h_integral(&self, x: f64) -> f64 {
        let log_x = x.ln();
        helper2((1.0 - self.skew) * log_x) * log_x
    }

    fn h_integral_inverse(&self, x: f64) -> f64 {
        let mut t = x * (1.0 - self.skew);
        if t < -1.0 {
            // Rounding can push t marginally below -1
            t = -1.0;
        }
        (helper1(t) * x).exp()
    }
}

/// `ln(1 + x) / x`, continuous at 0.
fn helper1(x: f64) -> f64 {
    if x.abs() > 1e-8 {
        x.ln_1p() / x
    } else {
        1.0 - x * (0.5 - x * (1.0 / 3.0 - 0.25 * x))
    }
}

/// `(e^x - 1) / x`, continuous at 0.
fn helper2(x: f64) -> f64 {
    if x.abs() > 1e-8 {
        x.exp_m1() / x
    } else {
        1.0 + x * 0.5 * (1.0 + x * (1.0 / 3.0) * (1.0 + 0.25 * x))
    }
}

/// Precomputed arena indices for one worker and one skew value.
///
/// The length is a power of two so lookups wrap with a mask instead of a
/// division inside the timed loop.
#[derive(Debug, Clone)]
pub struct KeyBuffer {
    keys: Box<[u64]>,
    mask: usize,
}

impl KeyBuffer {
    pub fn generate(generator: &mut ZipfKeyGenerator, len: usize) -> Result<Self> {
        if !len.is_power_of_two() {
            bail!("key buffer length must be a non-zero power of two, got {len}");
        }

        let mut keys = vec![0u64; len].into_boxed_slice();
        generator.fill(&mut keys);

        Ok(KeyBuffer {
            keys,
            mask: len - 1,
        })
    }

    /// Key for logical iteration `i`, wrapping around the buffer.
    #[inline(always)]
    pub fn get(&self, i: u64) -> usize {
        self.keys[(i as usize) & self.mask] as usize
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAWS: usize = 100_000;

    fn histogram(skew: f64, maximum: u64, seed: u64) -> Vec<u64> {
        let mut generator = ZipfKeyGenerator::new(skew, maximum, seed).unwrap();
        let mut counts = vec![0u64; maximum as usize];
        for _ in 0..DRAWS {
            counts[generator.next_key() as usize] += 1;
        }
        counts
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(ZipfKeyGenerator::new(0.5, 0, 0).is_err());
        assert!(ZipfKeyGenerator::new(-0.1, 10, 0).is_err());
        assert!(ZipfKeyGenerator::new(f64::NAN, 10, 0).is_err());
        assert!(ZipfKeyGenerator::new(f64::INFINITY, 10, 0).is_err());
    }

    #[test]
    fn single_key_range_always_yields_zero() {
        let mut generator = ZipfKeyGenerator::new(0.99, 1, 7).unwrap();
        for _ in 0..1000 {
            assert_eq!(generator.next_key(), 0);
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = ZipfKeyGenerator::new(0.9, 1 << 20, 3).unwrap();
        let mut b = ZipfKeyGenerator::new(0.9, 1 << 20, 3).unwrap();
        for _ in 0..10_000 {
            assert_eq!(a.next_key(), b.next_key());
        }
    }

    #[test]
    fn different_workers_are_decorrelated() {
        let mut a = ZipfKeyGenerator::new(0.2, 1 << 20, 1).unwrap();
        let mut b = ZipfKeyGenerator::new(0.2, 1 << 20, 2).unwrap();
        let same = (0..1000).filter(|_| a.next_key() == b.next_key()).count();
        assert!(same < 50, "{same} identical draws out of 1000");
    }

    #[test]
    fn zero_skew_is_uniform() {
        let counts = histogram(0.0, 1000, 11);
        let expected = DRAWS as f64 / 1000.0;

        // 999 degrees of freedom: mean 999, standard deviation ~45
        let chi_square: f64 = counts
            .iter()
            .map(|&observed| {
                let diff = observed as f64 - expected;
                diff * diff / expected
            })
            .sum();
        assert!(chi_square < 1250.0, "chi-square {chi_square}");

        // Each block of 100 keys within 20% of its uniform share
        for block in counts.chunks(100) {
            let observed: u64 = block.iter().sum();
            let share = expected * 100.0;
            assert!(
                (observed as f64 - share).abs() < share * 0.2,
                "block observed {observed}, expected {share}"
            );
        }
    }

    #[test]
    fn high_skew_concentrates_on_key_zero() {
        let generator = ZipfKeyGenerator::new(1.09, 1000, 5).unwrap();
        let counts = histogram(1.09, 1000, 5);

        let mode = counts
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .map(|(key, _)| key)
            .unwrap();
        assert_eq!(mode, 0);

        let observed = counts[0] as f64 / DRAWS as f64;
        let expected = generator.probability(0);
        assert!(
            (observed - expected).abs() < 0.01,
            "key 0 observed {observed}, expected {expected}"
        );

        // The ten hottest keys carry close to half of all traffic
        let head: u64 = counts[..10].iter().sum();
        assert!(head as f64 / DRAWS as f64 > 0.4);
    }

    #[test]
    fn heavy_skew_over_small_range_is_majority_zero() {
        let counts = histogram(2.0, 16, 9);
        assert!(counts[0] as f64 / DRAWS as f64 > 0.5);
    }

    #[test]
    fn frequencies_track_probabilities() {
        let generator = ZipfKeyGenerator::new(0.8, 64, 21).unwrap();
        let counts = histogram(0.8, 64, 21);
        for key in [0u64, 1, 2, 10, 63] {
            let observed = counts[key as usize] as f64 / DRAWS as f64;
            let expected = generator.probability(key);
            assert!(
                (observed - expected).abs() < 0.01,
                "key {key}: observed {observed}, expected {expected}"
            );
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        let generator = ZipfKeyGenerator::new(0.99, 500, 0).unwrap();
        let total: f64 = (0..500).map(|k| generator.probability(k)).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(generator.probability(500), 0.0);
    }

    #[test]
    fn key_buffer_wraps_cyclically() {
        let mut generator = ZipfKeyGenerator::new(0.5, 1024, 4).unwrap();
        let buffer = KeyBuffer::generate(&mut generator, 8).unwrap();

        assert_eq!(buffer.len(), 8);
        for i in 0..8u64 {
            assert_eq!(buffer.get(i), buffer.get(i + 8));
            assert_eq!(buffer.get(i), buffer.get(i + 8 * 1000));
            assert!(buffer.get(i) < 1024);
        }
    }

    #[test]
    fn key_buffer_requires_power_of_two() {
        let mut generator = ZipfKeyGenerator::new(0.5, 1024, 4).unwrap();
        assert!(KeyBuffer::generate(&mut generator, 0).is_err());
        assert!(KeyBuffer::generate(&mut generator, 12).is_err());
    }
}

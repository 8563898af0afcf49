//! Relative measurement noise shaped to a target power spectral density.
//!
//! Each block is synthesised independently: white Gaussian samples are
//! transformed, every frequency bin is weighted by the square root of the
//! target PSD and the result is transformed back. Consecutive blocks are not
//! phase-continuous.

use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rustfft::{Fft, FftPlanner};

use crate::error::{require_positive, BlcError, Result};
use crate::math::db_to_power;

/// Samples per noise block used by the cavity model.
pub const NOISE_BLOCK_LEN: usize = 2048;

/// Reference frequencies of the default two-point PSD (Hz).
pub const FLAT_PSD_FREQS: [f64; 2] = [10.0, 100.0];

/// Target single-sided PSD given as `(frequency Hz, level dB/Hz)` points.
///
/// Between points the level is interpolated linearly in log-frequency; below
/// the first and above the last point it is held flat.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSpec {
    pub points: Vec<(f64, f64)>,
    pub sample_rate: f64,
    pub seed: u64,
}

impl NoiseSpec {
    /// Same level at both reference frequencies.
    pub fn flat(level_db: f64, sample_rate: f64, seed: u64) -> Self {
        Self {
            points: FLAT_PSD_FREQS.iter().map(|&f| (f, level_db)).collect(),
            sample_rate,
            seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("sample_rate", self.sample_rate)?;
        if self.points.is_empty() {
            return Err(BlcError::invalid("noise_psd", "at least one PSD point is required"));
        }
        for &(freq, level) in &self.points {
            require_positive("noise_psd frequency", freq)?;
            if level.is_nan() || level == f64::INFINITY {
                return Err(BlcError::invalid(
                    "noise_psd",
                    format!("level must be finite or -inf, got {level}"),
                ));
            }
        }
        if self.points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(BlcError::invalid(
                "noise_psd",
                "frequencies must be strictly increasing",
            ));
        }
        Ok(())
    }

    /// Linear PSD (1/Hz) at `freq`.
    pub fn power_at(&self, freq: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if freq <= first.0 {
            return db_to_power(first.1);
        }
        if freq >= last.0 {
            return db_to_power(last.1);
        }
        for w in self.points.windows(2) {
            let (f0, l0) = w[0];
            let (f1, l1) = w[1];
            if freq <= f1 {
                let t = (freq / f0).ln() / (f1 / f0).ln();
                // geometric blend so that -inf levels stay at zero power
                return db_to_power(l0).powf(1.0 - t) * db_to_power(l1).powf(t);
            }
        }
        db_to_power(last.1)
    }
}

pub struct NoiseGenerator {
    spec: NoiseSpec,
    rng: StdRng,
    shaping: Vec<f64>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex64>,
    scratch: Vec<Complex64>,
}

impl NoiseGenerator {
    /// Plan the transforms and precompute the per-bin shaping for blocks of
    /// `len` samples.
    pub fn new(spec: NoiseSpec, len: usize) -> Result<Self> {
        spec.validate()?;
        if len < 2 {
            return Err(BlcError::invalid("noise block length", "must be at least 2"));
        }

        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let bin_width = spec.sample_rate / len as f64;
        let shaping = (0..len)
            .map(|k| {
                if k == 0 {
                    return 0.0;
                }
                let bin = k.min(len - k);
                let freq = bin as f64 * bin_width;
                (spec.power_at(freq) * spec.sample_rate / 2.0).sqrt()
            })
            .collect();

        Ok(Self {
            rng: StdRng::seed_from_u64(spec.seed),
            spec,
            shaping,
            forward,
            inverse,
            buffer: vec![Complex64::new(0.0, 0.0); len],
            scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
        })
    }

    /// Restart the random sequence.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Overwrite `out` with a fresh, independent noise block.
    ///
    /// Writes `min(out.len(), len)` samples; nothing is allocated.
    pub fn generate(&mut self, out: &mut [f64]) {
        for sample in self.buffer.iter_mut() {
            let white: f64 = StandardNormal.sample(&mut self.rng);
            *sample = Complex64::new(white, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        for (bin, gain) in self.buffer.iter_mut().zip(&self.shaping) {
            *bin *= *gain;
        }
        self.inverse
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let norm = 1.0 / self.buffer.len() as f64;
        for (dst, src) in out.iter_mut().zip(&self.buffer) {
            *dst = src.re * norm;
        }
    }
}

impl fmt::Debug for NoiseGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseGenerator")
            .field("spec", &self.spec)
            .field("block_len", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn variance(x: &[f64]) -> f64 {
        let m = x.iter().sum::<f64>() / x.len() as f64;
        x.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / x.len() as f64
    }

    #[test]
    fn test_flat_psd_sets_variance() {
        // S·fs/2 = 1e-6 · 5e3
        let mut gen = NoiseGenerator::new(NoiseSpec::flat(-60.0, 1.0e4, 7), NOISE_BLOCK_LEN).unwrap();
        let mut acc = Vec::new();
        let mut block = vec![0.0; NOISE_BLOCK_LEN];
        for _ in 0..8 {
            gen.generate(&mut block);
            acc.extend_from_slice(&block);
        }
        assert_relative_eq!(variance(&acc), 5.0e-3, max_relative = 0.1);
    }

    #[test]
    fn test_same_seed_same_blocks() {
        let spec = NoiseSpec::flat(-135.0, 10.0e6, 99);
        let mut a = NoiseGenerator::new(spec.clone(), 256).unwrap();
        let mut b = NoiseGenerator::new(spec, 256).unwrap();
        let mut xa = vec![0.0; 256];
        let mut xb = vec![0.0; 256];
        for _ in 0..3 {
            a.generate(&mut xa);
            b.generate(&mut xb);
            assert_eq!(xa, xb);
        }
    }

    #[test]
    fn test_consecutive_blocks_are_independent() {
        let mut gen = NoiseGenerator::new(NoiseSpec::flat(-80.0, 1.0e6, 1), 128).unwrap();
        let mut first = vec![0.0; 128];
        let mut second = vec![0.0; 128];
        gen.generate(&mut first);
        gen.generate(&mut second);
        assert_ne!(first, second);
    }

    #[test]
    fn test_minus_infinity_disables_noise() {
        let mut gen =
            NoiseGenerator::new(NoiseSpec::flat(f64::NEG_INFINITY, 1.0e6, 3), 64).unwrap();
        let mut block = vec![1.0; 64];
        gen.generate(&mut block);
        assert!(block.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_psd_interpolates_in_log_frequency() {
        let spec = NoiseSpec {
            points: vec![(10.0, -100.0), (1000.0, -120.0)],
            sample_rate: 1.0e4,
            seed: 0,
        };
        assert_relative_eq!(spec.power_at(1.0), 1e-10, max_relative = 1e-9);
        assert_relative_eq!(spec.power_at(100.0), 1e-11, max_relative = 1e-9);
        assert_relative_eq!(spec.power_at(5000.0), 1e-12, max_relative = 1e-9);
    }

    #[test]
    fn test_rejects_unordered_points() {
        let spec = NoiseSpec {
            points: vec![(100.0, -100.0), (10.0, -100.0)],
            sample_rate: 1.0e4,
            seed: 0,
        };
        assert!(NoiseGenerator::new(spec, 64).is_err());
    }
}

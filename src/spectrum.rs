//! Single-sided amplitude spectrum of a captured waveform.

use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::error::{require_positive, BlcError, Result};
use crate::math::amplitude_to_db;

#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Bin centre frequencies (Hz), DC to Nyquist
    pub freqs: Vec<f64>,
    /// Sine amplitude per bin (dB)
    pub amplitude_db: Vec<f64>,
}

impl Spectrum {
    /// Rectangular-window spectrum, scaled so a sine of amplitude `A` on a
    /// bin centre reads `20·log10(A)`.
    pub fn from_signal(samples: &[f64], sample_rate: f64) -> Result<Self> {
        require_positive("sample_rate", sample_rate)?;
        if samples.len() < 2 {
            return Err(BlcError::invalid("samples", "need at least two samples"));
        }

        let n = samples.len();
        let mut buffer: Vec<Complex64> = samples.iter().map(|&x| Complex64::new(x, 0.0)).collect();
        FftPlanner::<f64>::new()
            .plan_fft_forward(n)
            .process(&mut buffer);

        let bins = n / 2 + 1;
        let freqs = (0..bins)
            .map(|k| k as f64 * sample_rate / n as f64)
            .collect();
        let amplitude_db = buffer[..bins]
            .iter()
            .enumerate()
            .map(|(k, x)| {
                let scale = if k == 0 || 2 * k == n { 1.0 } else { 2.0 };
                amplitude_to_db(scale * x.norm() / n as f64)
            })
            .collect();

        Ok(Self {
            freqs,
            amplitude_db,
        })
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    /// Strongest bin as `(frequency, dB)`.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.freqs
            .iter()
            .copied()
            .zip(self.amplitude_db.iter().copied())
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Level of the bin closest to `freq`.
    pub fn amplitude_at(&self, freq: f64) -> Option<f64> {
        if !freq.is_finite() || self.freqs.len() < 2 {
            return None;
        }
        let df = self.freqs[1] - self.freqs[0];
        let idx = (freq / df).round();
        if idx < 0.0 || idx as usize >= self.freqs.len() {
            return None;
        }
        Some(self.amplitude_db[idx as usize])
    }
}

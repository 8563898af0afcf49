//! Fixed-depth averaging window for non-IQ demodulation.

use num_complex::Complex64;

/// Ring of the `depth` most recent demodulated samples.
///
/// The window starts zero-filled, so the mean always divides by `depth`.
#[derive(Debug, Clone)]
pub struct DemodWindow {
    samples: Vec<Complex64>,
    /// Index of the oldest sample, i.e. the next one to be overwritten
    head: usize,
}

impl DemodWindow {
    pub fn new(depth: usize) -> Self {
        Self {
            samples: vec![Complex64::new(0.0, 0.0); depth.max(1)],
            head: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.fill(Complex64::new(0.0, 0.0));
        self.head = 0;
    }

    /// Insert a sample, evicting the oldest one.
    pub fn push(&mut self, sample: Complex64) {
        self.samples[self.head] = sample;
        self.head = (self.head + 1) % self.samples.len();
    }

    pub fn mean(&self) -> Complex64 {
        self.samples.iter().sum::<Complex64>() / self.samples.len() as f64
    }

    /// Contents from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Complex64> + '_ {
        self.samples[self.head..]
            .iter()
            .chain(self.samples[..self.head].iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut w = DemodWindow::new(3);
        for v in 1..=5 {
            w.push(c(v as f64));
        }
        let contents: Vec<_> = w.iter().copied().collect();
        assert_eq!(contents, vec![c(3.0), c(4.0), c(5.0)]);
        assert_eq!(w.mean(), c(4.0));
    }

    #[test]
    fn test_partially_filled_mean_counts_zeros() {
        let mut w = DemodWindow::new(4);
        w.push(c(8.0));
        assert_eq!(w.mean(), c(2.0));
        w.clear();
        assert_eq!(w.mean(), c(0.0));
        assert_eq!(w.depth(), 4);
    }
}

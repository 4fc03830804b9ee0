use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Helper that wraps a forward/inverse `rustfft` plan pair of one size.
pub struct FftHelper {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    size: usize,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            forward,
            inverse,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spectrum of a real sequence, zero-padded or truncated to the plan size.
    pub fn forward(&self, input: &[f32]) -> Vec<Complex32> {
        let mut buffer: Vec<Complex32> = input
            .iter()
            .take(self.size)
            .map(|&value| Complex32::new(value, 0.0))
            .collect();
        buffer.resize(self.size, Complex32::zero());
        self.forward.process(&mut buffer);
        buffer
    }

    /// Real part of the normalized inverse transform.
    pub fn inverse(&self, mut spectrum: Vec<Complex32>) -> Vec<f32> {
        spectrum.resize(self.size, Complex32::zero());
        self.inverse.process(&mut spectrum);
        let scale = 1.0 / self.size as f32;
        spectrum.iter().map(|c| c.re * scale).collect()
    }

    /// Frequency in Hz of FFT bin `index` at `sample_rate_hz`.
    pub fn bin_frequency(&self, index: usize, sample_rate_hz: f32) -> f32 {
        let index = if index <= self.size / 2 {
            index as f32
        } else {
            index as f32 - self.size as f32
        };
        index * sample_rate_hz / self.size as f32
    }
}

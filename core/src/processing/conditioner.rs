use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::interface::{BandpassCorners, ProcessingParameters};
use crate::math::fft::FftHelper;
use crate::math::interp::linear_clamped;
use crate::prelude::{DigitizeError, DigitizeResult, ProcessingStage, RunContext};
use crate::telemetry::diagnostics::names;
use crate::telemetry::{Diagnostic, LogManager, Step};

/// Number of samples in [`uniform_times`] for the same arguments.
pub fn uniform_len(start: f64, end: f64, dt: f64) -> usize {
    if dt.is_nan() || dt <= 0.0 || end < start {
        return 1;
    }
    // tolerate rounding so that an exact multiple of `dt` still lands on `end`
    ((end - start) / dt + 1e-9).floor() as usize + 1
}

/// Uniform time grid from `start` stepping `dt` without passing `end`.
pub fn uniform_times(start: f64, end: f64, dt: f64) -> Vec<f64> {
    let len = uniform_len(start, end, dt);
    if len == 1 {
        return vec![start];
    }
    (0..len)
        .map(|k| start + k as f64 * dt)
        .collect()
}

/// Linear per-trace resampling from `old_times` onto `new_times`, clamped at the ends.
pub fn resample_data(data: ArrayView2<f32>, old_times: &[f64], new_times: &[f64]) -> Array2<f32> {
    let mut out = Array2::zeros((data.nrows(), new_times.len()));
    for (src, mut dst) in data.outer_iter().zip(out.outer_iter_mut()) {
        let ys = src.to_vec();
        for (value, &t) in dst.iter_mut().zip(new_times) {
            *value = linear_clamped(old_times, &ys, t);
        }
    }
    out
}

/// Gain of the trapezoidal bandpass at `freq_hz`.
pub fn trapezoid_gain(freq_hz: f32, band: &BandpassCorners) -> f32 {
    let f = freq_hz.abs();
    if f <= band.f1 || f >= band.f4 {
        0.0
    } else if f < band.f2 {
        (f - band.f1) / (band.f2 - band.f1)
    } else if f <= band.f3 {
        1.0
    } else {
        (band.f4 - f) / (band.f4 - band.f3)
    }
}

/// FFT plan and per-bin gains for traces of one length.
pub struct BandpassFilter {
    fft: FftHelper,
    gains: Vec<f32>,
    samples: usize,
}

impl BandpassFilter {
    /// Plans for `samples`-long traces at `dt_ms`, padding to twice the length.
    pub fn new(samples: usize, dt_ms: f32, band: &BandpassCorners) -> Self {
        let size = (2 * samples.max(1)).next_power_of_two();
        let fft = FftHelper::new(size);
        let sample_rate = 1000.0 / dt_ms;
        let gains = (0..size)
            .map(|bin| trapezoid_gain(fft.bin_frequency(bin, sample_rate), band))
            .collect();
        Self {
            fft,
            gains,
            samples,
        }
    }

    /// Zero-phase filtering: the gain is real and symmetric in frequency.
    pub fn apply(&self, trace: ArrayView1<f32>) -> Vec<f32> {
        let input = trace.to_vec();
        let mut spectrum = self.fft.forward(&input);
        for (bin, gain) in spectrum.iter_mut().zip(&self.gains) {
            *bin *= *gain;
        }
        let mut output = self.fft.inverse(spectrum);
        output.truncate(self.samples);
        output
    }
}

/// Bandpass-filters every trace at sample rate `1000 / dt_ms` Hz.
pub fn filter_data(data: ArrayView2<f32>, dt_ms: f32, band: &BandpassCorners) -> Array2<f32> {
    let filter = BandpassFilter::new(data.ncols(), dt_ms, band);
    let mut out = data.to_owned();
    for (src, mut dst) in data.outer_iter().zip(out.outer_iter_mut()) {
        for (value, filtered) in dst.iter_mut().zip(filter.apply(src)) {
            *value = filtered;
        }
    }
    out
}

/// Replaces invalid traces from their nearest valid neighbours.
///
/// A trace is invalid when it is listed in `flagged` or holds any non-finite
/// sample. Interior gaps are interpolated by trace index; edge traces copy the
/// nearest valid one. With no valid trace at all everything becomes zero.
/// Returns how many traces were replaced.
pub fn fix_nan_traces(data: &mut Array2<f32>, flagged: &[usize]) -> usize {
    let traces = data.nrows();
    let valid: Vec<bool> = (0..traces)
        .map(|t| !flagged.contains(&t) && data.row(t).iter().all(|v| v.is_finite()))
        .collect();
    let good: Vec<usize> = (0..traces).filter(|&t| valid[t]).collect();

    let mut repaired = 0;
    for trace in (0..traces).filter(|&t| !valid[t]) {
        let right_slot = good.partition_point(|&g| g < trace);
        let left = right_slot.checked_sub(1).map(|i| good[i]);
        let right = good.get(right_slot).copied();
        let replacement = match (left, right) {
            (Some(l), Some(r)) => {
                let w = (trace - l) as f32 / (r - l) as f32;
                &data.row(l) * (1.0 - w) + &data.row(r) * w
            }
            (Some(nearest), None) | (None, Some(nearest)) => data.row(nearest).to_owned(),
            (None, None) => ndarray::Array1::zeros(data.ncols()),
        };
        data.row_mut(trace).assign(&replacement);
        repaired += 1;
    }
    repaired
}

/// Mean amplitude spectrum of a section, normalized to a peak of 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub frequencies: Vec<f32>,
    pub amplitudes: Vec<f32>,
}

impl Spectrum {
    /// Frequency holding the largest amplitude.
    pub fn peak_frequency(&self) -> Option<f32> {
        self.amplitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.frequencies[i])
    }
}

/// Averages per-trace FFT magnitudes over positive frequencies up to Nyquist.
pub fn amplitude_spectrum(data: ArrayView2<f32>, dt_ms: f32) -> Spectrum {
    if data.nrows() == 0 || data.ncols() == 0 {
        return Spectrum::default();
    }
    let fft = FftHelper::new(data.ncols().next_power_of_two());
    let sample_rate = 1000.0 / dt_ms;
    let bins = fft.size() / 2 + 1;
    let mut sum = vec![0.0f64; bins];
    for trace in data.axis_iter(Axis(0)) {
        let spectrum = fft.forward(&trace.to_vec());
        for (acc, value) in sum.iter_mut().zip(&spectrum) {
            *acc += value.norm() as f64;
        }
    }
    let peak = sum.iter().cloned().fold(0.0f64, f64::max);
    let scale = if peak > 0.0 { 1.0 / peak } else { 0.0 };
    Spectrum {
        frequencies: (0..bins)
            .map(|bin| fft.bin_frequency(bin, sample_rate))
            .collect(),
        amplitudes: sum.iter().map(|&v| (v * scale) as f32).collect(),
    }
}

/// Processed amplitudes on the pixel-row time axis.
#[derive(Debug, Clone)]
pub struct ConditionerInput {
    pub data: Array2<f32>,
    pub times_ms: Vec<f64>,
    pub degenerate: Vec<usize>,
}

/// Output of the conditioner: uniform, filtered and repaired traces.
#[derive(Debug, Clone)]
pub struct ConditionedSection {
    pub data: Array2<f32>,
    pub times_ms: Vec<f64>,
    pub repaired: usize,
    pub spectrum: Spectrum,
}

/// Resampling, bandpass and cross-trace repair stage.
pub struct ConditionerStage {
    params: Option<ProcessingParameters>,
    logger: LogManager,
}

impl ConditionerStage {
    pub fn new() -> Self {
        Self {
            params: None,
            logger: LogManager::new("conditioner"),
        }
    }
}

impl Default for ConditionerStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for ConditionerStage {
    type Input = ConditionerInput;
    type Output = ConditionedSection;

    fn name(&self) -> &'static str {
        "conditioner"
    }

    fn initialize(&mut self, params: &ProcessingParameters) -> DigitizeResult<()> {
        self.params = Some(params.clone());
        Ok(())
    }

    fn execute(
        &mut self,
        input: Self::Input,
        ctx: &mut RunContext<'_>,
    ) -> DigitizeResult<Self::Output> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| DigitizeError::Detection("conditioner not initialized".into()))?;
        let (first, last) = match (input.times_ms.first(), input.times_ms.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => {
                return Err(DigitizeError::Detection(
                    "no samples inside the detection band".into(),
                ))
            }
        };
        let dt = params.sample_interval_ms;
        let times_ms = uniform_times(first, last, dt as f64);
        let resampled = resample_data(input.data.view(), &input.times_ms, &times_ms);
        ctx.diagnostics
            .emit(names::RESAMPLED, Diagnostic::Matrix(resampled.view()));

        let traces = resampled.nrows();
        let filter = BandpassFilter::new(times_ms.len(), dt, &params.band);
        let mut data = resampled;
        for trace in 0..traces {
            ctx.checkpoint()?;
            let filtered = filter.apply(data.row(trace));
            for (value, f) in data.row_mut(trace).iter_mut().zip(filtered) {
                *value = f;
            }
            ctx.reporter.progress(Step::Conditioning, trace + 1, traces);
        }
        ctx.diagnostics
            .emit(names::FILTERED, Diagnostic::Matrix(data.view()));

        let repaired = fix_nan_traces(&mut data, &input.degenerate);
        if repaired > 0 {
            ctx.metrics.record_repaired(repaired);
            self.logger
                .warn(&format!("{} trace(s) repaired from neighbours", repaired));
        }

        let spectrum = amplitude_spectrum(data.view(), dt);
        ctx.diagnostics
            .emit(names::SPECTRUM, Diagnostic::Series(&spectrum.amplitudes));
        self.logger.record(&format!(
            "resampled to {} samples at {} ms, band {}/{}/{}/{} Hz",
            times_ms.len(),
            dt,
            params.band.f1,
            params.band.f2,
            params.band.f3,
            params.band.f4
        ));

        Ok(ConditionedSection {
            data,
            times_ms,
            repaired,
            spectrum,
        })
    }

    fn cleanup(&mut self) {
        self.params = None;
    }
}

use std::convert::Infallible;
use std::ops::Range;

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1};

use crate::interface::ProcessingParameters;
use crate::math::interp::{Akima, CubicSpline};
use crate::math::stats::StatsHelper;
use crate::prelude::{DigitizeError, DigitizeResult, ProcessingStage, RunContext};
use crate::processing::baselines::BaselineOutput;
use crate::telemetry::diagnostics::names;
use crate::telemetry::{Diagnostic, LogManager, Step};

/// Samples per knot of the smoothing spline.
pub const SMOOTHING_KNOT_SPACING: usize = 3;
/// Traces shorter than this fall back to a moving average.
pub const MIN_SPLINE_SAMPLES: usize = 4 * SMOOTHING_KNOT_SPACING;

/// Amplitude matrix after restoration, plus traces that could not be restored.
#[derive(Debug, Clone)]
pub struct ProcessedAmplitude {
    /// `[trace][sample]`.
    pub data: Array2<f32>,
    /// Traces filled with their median; repaired later from neighbours.
    pub degenerate: Vec<usize>,
}

/// Row-wise ink counts between consecutive baselines.
///
/// Trace `i` covers columns `[baselines[i], baselines[i + 1])`; one sample per
/// row of `rows`.
pub fn extract_amplitude(
    image: ArrayView2<bool>,
    baselines: &[usize],
    rows: Range<usize>,
) -> Array2<f32> {
    let traces = baselines.len().saturating_sub(1);
    let mut amplitude = Array2::zeros((traces, rows.len()));
    for (trace, pair) in baselines.windows(2).enumerate() {
        let (left, right) = (pair[0], pair[1].min(image.ncols()));
        for (sample, row) in rows.clone().enumerate() {
            let ink = image
                .row(row)
                .iter()
                .skip(left)
                .take(right.saturating_sub(left))
                .filter(|&&ink| ink)
                .count();
            amplitude[[trace, sample]] = ink as f32;
        }
    }
    amplitude
}

/// Ink count at or above which a row is considered saturated.
///
/// A row cannot hold more ink than the trace span; the neighbouring trace
/// line takes up to `line_thickness - 1` of those columns.
pub fn clip_threshold(span: usize, line_thickness: usize) -> f32 {
    (span + 1).saturating_sub(line_thickness).max(1) as f32
}

/// Restores every trace of `raw`, in order: sign/zero repair, declipping, smoothing.
pub fn process_amplitudes(
    raw: ArrayView2<f32>,
    baselines: &[usize],
    line_thickness: usize,
) -> ProcessedAmplitude {
    let outcome = process_amplitudes_with(raw, baselines, line_thickness, |_, _| {
        Ok::<(), Infallible>(())
    });
    match outcome {
        Ok(processed) => processed,
        Err(never) => match never {},
    }
}

/// [`process_amplitudes`] with `on_trace` called after each trace.
///
/// `on_trace` receives the trace index and, for a median-filled trace, the
/// [`DigitizeError::Interpolation`] describing it. An `Err` from `on_trace`
/// stops processing and is returned as is.
pub fn process_amplitudes_with<E>(
    raw: ArrayView2<f32>,
    baselines: &[usize],
    line_thickness: usize,
    mut on_trace: impl FnMut(usize, Option<DigitizeError>) -> Result<(), E>,
) -> Result<ProcessedAmplitude, E> {
    let mut data = raw.to_owned();
    let mut degenerate = Vec::new();
    for (trace, row) in data.outer_iter_mut().enumerate() {
        let failure = if restore_row(row, trace_span(baselines, trace), line_thickness) {
            None
        } else {
            degenerate.push(trace);
            Some(DigitizeError::Interpolation { trace })
        };
        on_trace(trace, failure)?;
    }
    Ok(ProcessedAmplitude { data, degenerate })
}

/// Column width of trace `trace`, zero when the baselines do not bound it.
fn trace_span(baselines: &[usize], trace: usize) -> usize {
    match (baselines.get(trace), baselines.get(trace + 1)) {
        (Some(&left), Some(&right)) => right.saturating_sub(left),
        _ => 0,
    }
}

/// Restores `row` in place, or fills it with its median when restoration fails.
fn restore_row(mut row: ArrayViewMut1<f32>, span: usize, line_thickness: usize) -> bool {
    let samples = row.to_vec();
    match process_trace(&samples, clip_threshold(span, line_thickness)) {
        Ok(values) => {
            row.assign(&ArrayView1::from(values.as_slice()));
            true
        }
        Err(_) => {
            row.fill(StatsHelper::median(&samples).unwrap_or(0.0));
            false
        }
    }
}

/// Restores one trace; fails when there is nothing to interpolate from.
pub fn process_trace(raw: &[f32], clip_level: f32) -> Result<Vec<f32>, TraceFailure> {
    let clipped: Vec<bool> = raw.iter().map(|&v| v >= clip_level).collect();
    let mut trace = raw.to_vec();
    subtract_trace_mean(&mut trace)?;
    interpolate_zeros(&mut trace);
    handle_clipping(&mut trace, &clipped)?;
    apply_smoothing(&mut trace);
    Ok(trace)
}

/// Why a single trace could not be restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFailure {
    NoInk,
    TooFewUnclipped,
}

/// Empty rows take the negative median of the inked rows, then the trace is centred.
fn subtract_trace_mean(trace: &mut [f32]) -> Result<(), TraceFailure> {
    let inked: Vec<f32> = trace.iter().copied().filter(|&v| v != 0.0).collect();
    let median = StatsHelper::median(&inked).ok_or(TraceFailure::NoInk)?;
    for value in trace.iter_mut() {
        if *value == 0.0 {
            *value = -median;
        }
    }
    let mean = StatsHelper::mean(trace);
    for value in trace.iter_mut() {
        *value -= mean;
    }
    Ok(())
}

/// Linearly bridges runs of exact zeros from the nearest non-zero samples.
fn interpolate_zeros(trace: &mut [f32]) {
    let n = trace.len();
    let mut i = 0;
    while i < n {
        if trace[i] != 0.0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && trace[i] == 0.0 {
            i += 1;
        }
        let left = start.checked_sub(1).map(|k| (k, trace[k]));
        let right = (i < n).then(|| (i, trace[i]));
        match (left, right) {
            (Some((l, lv)), Some((r, rv))) => {
                for k in start..i {
                    let t = (k - l) as f32 / (r - l) as f32;
                    trace[k] = lv + t * (rv - lv);
                }
            }
            (Some((_, v)), None) | (None, Some((_, v))) => {
                trace[start..i].fill(v);
            }
            (None, None) => {}
        }
    }
}

/// Indices of samples below the clip level.
fn unclipped_indices(clipped: &[bool]) -> Vec<usize> {
    clipped
        .iter()
        .enumerate()
        .filter(|(_, &c)| !c)
        .map(|(i, _)| i)
        .collect()
}

/// Replaces clipped samples with an Akima fit through the unclipped ones.
fn handle_clipping(trace: &mut [f32], clipped: &[bool]) -> Result<(), TraceFailure> {
    if !clipped.iter().any(|&c| c) {
        return Ok(());
    }
    let keep = unclipped_indices(clipped);
    if keep.len() < 2 {
        return Err(TraceFailure::TooFewUnclipped);
    }
    let xs: Vec<f32> = keep.iter().map(|&i| i as f32).collect();
    let ys: Vec<f32> = keep.iter().map(|&i| trace[i]).collect();
    let akima = Akima::new(&xs, &ys).ok_or(TraceFailure::TooFewUnclipped)?;
    for (i, value) in trace.iter_mut().enumerate() {
        if clipped[i] {
            *value = akima.evaluate(i as f32);
        }
    }
    Ok(())
}

/// Removes pixel-quantization noise.
///
/// Long traces are fitted with a natural cubic spline through block means of
/// [`SMOOTHING_KNOT_SPACING`] samples; short ones get a 3-point moving average.
fn apply_smoothing(trace: &mut [f32]) {
    let n = trace.len();
    if n < 3 {
        return;
    }
    if n < MIN_SPLINE_SAMPLES {
        let source = trace.to_vec();
        for (i, value) in trace.iter_mut().enumerate() {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(n - 1);
            *value = source[lo..=hi].iter().sum::<f32>() / (hi - lo + 1) as f32;
        }
        return;
    }

    let (xs, ys): (Vec<f32>, Vec<f32>) = trace
        .chunks(SMOOTHING_KNOT_SPACING)
        .enumerate()
        .map(|(block, chunk)| {
            let start = block * SMOOTHING_KNOT_SPACING;
            let centre = start as f32 + (chunk.len() - 1) as f32 / 2.0;
            (centre, StatsHelper::mean(chunk))
        })
        .unzip();
    if let Some(spline) = CubicSpline::natural(&xs, &ys) {
        for (i, value) in trace.iter_mut().enumerate() {
            *value = spline.evaluate(i as f32);
        }
    }
}

/// Amplitude-extraction stage.
pub struct AmplitudeStage {
    params: Option<ProcessingParameters>,
    logger: LogManager,
}

impl AmplitudeStage {
    pub fn new() -> Self {
        Self {
            params: None,
            logger: LogManager::new("amplitude"),
        }
    }
}

impl Default for AmplitudeStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for AmplitudeStage {
    type Input = BaselineOutput;
    type Output = ProcessedAmplitude;

    fn name(&self) -> &'static str {
        "amplitude"
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
            .ok_or_else(|| DigitizeError::Detection("amplitude stage not initialized".into()))?;
        let columns = input.set.columns();
        let raw = extract_amplitude(input.image.view(), &columns, params.detection_rows());
        ctx.diagnostics
            .emit(names::RAW_AMPLITUDE, Diagnostic::Matrix(raw.view()));

        let traces = raw.nrows();
        ctx.checkpoint()?;
        let logger = &self.logger;
        let processed = process_amplitudes_with(
            raw.view(),
            &columns,
            params.trace_line_thickness,
            |trace, failure| {
                if let Some(err) = failure {
                    ctx.metrics.record_degenerate();
                    logger.warn(&format!("{}, median fill", err));
                }
                ctx.metrics.record_trace();
                ctx.reporter.progress(Step::Amplitude, trace + 1, traces);
                ctx.checkpoint()
            },
        )?;
        let ProcessedAmplitude { data, degenerate } = processed;

        ctx.diagnostics
            .emit(names::PROCESSED_AMPLITUDE, Diagnostic::Matrix(data.view()));
        self.logger.record(&format!(
            "extracted {} traces x {} samples, {} degenerate",
            traces,
            data.ncols(),
            degenerate.len()
        ));
        Ok(ProcessedAmplitude { data, degenerate })
    }

    fn cleanup(&mut self) {
        self.params = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn extraction_counts_ink_between_baselines() {
        let mut image = Array2::from_elem((4, 10), false);
        image[[1, 2]] = true;
        image[[1, 3]] = true;
        image[[2, 6]] = true;
        image[[3, 9]] = true;
        let amplitude = extract_amplitude(image.view(), &[0, 5, 9], 1..4);
        assert_eq!(amplitude.dim(), (2, 3));
        assert_eq!(amplitude.row(0).to_vec(), vec![2.0, 0.0, 0.0]);
        assert_eq!(amplitude.row(1).to_vec(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn variable_area_wiggle_is_recovered() {
        let rows = 120;
        let truth: Vec<f32> = (0..rows)
            .map(|r| 8.0 * (2.0 * PI * r as f32 / 30.0).sin())
            .collect();
        let mut image = Array2::from_elem((rows, 60), false);
        for (row, &s) in truth.iter().enumerate() {
            let width = (10.0 + s).round() as usize;
            for col in 10..10 + width {
                image[[row, col]] = true;
            }
        }
        let raw = extract_amplitude(image.view(), &[10, 40], 0..rows);
        let processed = process_amplitudes(raw.view(), &[10, 40], 1);
        assert!(processed.degenerate.is_empty());

        let restored = processed.data.row(0).to_vec();
        let (mt, mr) = (StatsHelper::mean(&truth), StatsHelper::mean(&restored));
        let mut cov = 0.0;
        let mut vt = 0.0;
        let mut vr = 0.0;
        for (t, r) in truth.iter().zip(&restored) {
            cov += (t - mt) * (r - mr);
            vt += (t - mt) * (t - mt);
            vr += (r - mr) * (r - mr);
        }
        let correlation = cov / (vt.sqrt() * vr.sqrt());
        assert!(correlation > 0.95, "correlation {correlation}");
    }

    #[test]
    fn clip_threshold_accounts_for_line_thickness() {
        assert_eq!(clip_threshold(20, 1), 20.0);
        assert_eq!(clip_threshold(20, 3), 18.0);
        assert_eq!(clip_threshold(1, 5), 1.0);
    }

    #[test]
    fn empty_rows_become_negative_median_before_centring() {
        let mut trace = vec![2.0, 0.0, 4.0, 0.0, 3.0];
        subtract_trace_mean(&mut trace).unwrap();
        // zeros -> -3, mean of [2,-3,4,-3,3] is 0.6
        let expected = [1.4, -3.6, 3.4, -3.6, 2.4];
        for (a, b) in trace.iter().zip(expected) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn zero_runs_are_bridged_linearly() {
        let mut trace = vec![0.0, 1.0, 0.0, 0.0, 4.0, 0.0];
        interpolate_zeros(&mut trace);
        let expected = [1.0, 1.0, 2.0, 3.0, 4.0, 4.0];
        for (a, b) in trace.iter().zip(expected) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn blank_trace_is_degenerate() {
        let mut raw = Array2::<f32>::zeros((2, 30));
        for s in 0..30 {
            raw[[1, s]] = (s % 4 + 1) as f32;
        }
        let processed = process_amplitudes(raw.view(), &[0, 10, 20], 1);
        assert_eq!(processed.degenerate, vec![0]);
        assert!(processed.data.row(0).iter().all(|&v| v == 0.0));
        assert!(processed.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn trace_hook_sees_interpolation_failures_and_can_stop() {
        let mut raw = Array2::<f32>::zeros((3, 30));
        for s in 0..30 {
            raw[[1, s]] = (s % 4 + 1) as f32;
        }
        let mut seen = Vec::new();
        let processed = process_amplitudes_with(raw.view(), &[0, 10, 20, 30], 1, |trace, failure| {
            seen.push((trace, failure.map(|err| err.kind())));
            Ok::<(), ()>(())
        })
        .unwrap();
        assert_eq!(processed.degenerate, vec![0, 2]);
        assert_eq!(
            seen,
            vec![
                (0, Some(crate::prelude::ErrorKind::Interpolation)),
                (1, None),
                (2, Some(crate::prelude::ErrorKind::Interpolation)),
            ]
        );

        let mut calls = 0;
        let stopped = process_amplitudes_with(raw.view(), &[0, 10, 20, 30], 1, |_, _| {
            calls += 1;
            Err(DigitizeError::Cancelled)
        });
        assert!(matches!(stopped, Err(DigitizeError::Cancelled)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn fully_clipped_trace_is_degenerate() {
        let raw = Array2::from_elem((1, 16), 10.0f32);
        let processed = process_amplitudes(raw.view(), &[0, 10], 1);
        assert_eq!(processed.degenerate, vec![0]);
        assert!(processed.data.iter().all(|&v| v == 10.0));
    }

    #[test]
    fn declipping_restores_sinusoid_plateau() {
        let peak = 10.0f32;
        let clip = 8.0f32;
        let truth: Vec<f32> = (0..80).map(|i| peak * (2.0 * PI * i as f32 / 40.0).sin()).collect();
        let clipped: Vec<bool> = truth.iter().map(|&v| v >= clip).collect();
        let mut trace: Vec<f32> = truth.iter().map(|&v| v.min(clip)).collect();
        assert!(clipped.iter().filter(|&&c| c).count() >= 10);

        handle_clipping(&mut trace, &clipped).unwrap();

        for i in 1..trace.len() - 1 {
            let at_seam = clipped[i] && (!clipped[i - 1] || !clipped[i + 1]);
            if at_seam {
                let neighbour = if !clipped[i - 1] { trace[i - 1] } else { trace[i + 1] };
                assert!((trace[i] - neighbour).abs() < 2.0, "seam jump at {i}");
            }
        }
        let restored_max = trace.iter().cloned().fold(f32::MIN, f32::max);
        assert!(restored_max > clip);
        assert!(restored_max <= peak + 1.0, "overshoot {restored_max}");
    }

    #[test]
    fn smoothing_keeps_length_and_slow_shape() {
        let mut trace: Vec<f32> = (0..60).map(|i| (i as f32 / 10.0).sin()).collect();
        let original = trace.clone();
        apply_smoothing(&mut trace);
        assert_eq!(trace.len(), 60);
        for (a, b) in trace.iter().zip(&original).skip(3).take(54) {
            assert!((a - b).abs() < 0.05);
        }
    }

    #[test]
    fn processed_traces_have_no_nan_or_long_zero_runs() {
        let raw = ndarray::Array2::from_shape_fn((3, 50), |(t, s)| ((s * (t + 3)) % 7) as f32);
        let processed = process_amplitudes(raw.view(), &[0, 10, 20, 30], 1);
        assert!(processed.degenerate.is_empty());
        for row in processed.data.outer_iter() {
            let samples = row.to_vec();
            assert!(samples.iter().all(|v| v.is_finite()));
            assert!(StatsHelper::rms(&samples) > 0.0);
            assert!(StatsHelper::mean(&samples).abs() < 0.5);
        }
    }
}

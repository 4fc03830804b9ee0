use std::ops::Range;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::interface::ProcessingParameters;
use crate::math::stats::StatsHelper;
use crate::prelude::{DigitizeError, DigitizeResult, ProcessingStage, RunContext};
use crate::telemetry::diagnostics::names;
use crate::telemetry::{Diagnostic, LogManager, Step};

/// Gaps wider than this multiple of the median spacing receive synthetic baselines.
pub const SYNTHETIC_GAP_FACTOR: f64 = 1.5;

/// A detected (or inserted) trace line column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub column: usize,
    pub synthetic: bool,
}

/// Every intermediate baseline list of one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSet {
    pub transitions: Vec<u32>,
    pub raw: Vec<usize>,
    pub filtered: Vec<usize>,
    pub baselines: Vec<Baseline>,
}

impl BaselineSet {
    pub fn columns(&self) -> Vec<usize> {
        self.baselines.iter().map(|b| b.column).collect()
    }

    pub fn synthetic_count(&self) -> usize {
        self.baselines.iter().filter(|b| b.synthetic).count()
    }

    /// Number of traces bounded by consecutive baselines.
    pub fn trace_count(&self) -> usize {
        self.baselines.len().saturating_sub(1)
    }
}

/// Counts ink-to-background steps down each column within `rows`.
pub fn transitions_per_column(image: ArrayView2<bool>, rows: Range<usize>) -> Vec<u32> {
    let mut counts = vec![0u32; image.ncols()];
    let end = rows.end.min(image.nrows());
    for row in rows.start + 1..end {
        let above = image.row(row - 1);
        let here = image.row(row);
        for (count, (&a, &b)) in counts.iter_mut().zip(above.iter().zip(here.iter())) {
            if a && !b {
                *count += 1;
            }
        }
    }
    counts
}

/// Strict local maxima of `counts` above the mean count.
///
/// The comparison window reaches `ceil(line_thickness / 2)` columns (at least
/// one) past either side of a peak. Runs of equal counts are treated as one
/// peak placed at their centre.
pub fn detect_peaks(counts: &[u32], line_thickness: usize) -> Vec<usize> {
    let n = counts.len();
    if n == 0 {
        return Vec::new();
    }
    let noise_floor = counts.iter().map(|&c| c as f64).sum::<f64>() / n as f64;
    let reach = line_thickness.div_ceil(2).max(1);

    let mut peaks = Vec::new();
    let mut col = 0;
    while col < n {
        let value = counts[col];
        if value as f64 <= noise_floor {
            col += 1;
            continue;
        }
        let mut end = col;
        while end + 1 < n && counts[end + 1] == value {
            end += 1;
        }
        let lo = col.saturating_sub(reach);
        let hi = (end + reach).min(n - 1);
        if (lo..col).chain(end + 1..=hi).all(|j| counts[j] < value) {
            peaks.push((col + end) / 2);
        }
        col = end + 1;
    }
    peaks
}

/// Merges candidates closer than `threshold_percent` of the median spacing,
/// keeping whichever has more transitions.
pub fn filter_baselines(raw: &[usize], counts: &[u32], threshold_percent: f32) -> Vec<usize> {
    if raw.len() < 2 {
        return raw.to_vec();
    }
    let spacings: Vec<usize> = raw.windows(2).map(|w| w[1] - w[0]).collect();
    let median = StatsHelper::median_usize(&spacings).unwrap_or(0.0);
    let min_gap = median * threshold_percent as f64 / 100.0;

    let mut kept: Vec<usize> = vec![raw[0]];
    for &col in &raw[1..] {
        let last = kept[kept.len() - 1];
        if ((col - last) as f64) < min_gap {
            if counts[col] > counts[last] {
                let slot = kept.len() - 1;
                kept[slot] = col;
            }
        } else {
            kept.push(col);
        }
    }
    kept
}

/// Fills abnormally wide gaps with evenly spaced synthetic baselines.
///
/// With `limit` set, insertion stops once the list holds `limit` baselines;
/// gaps are filled left to right.
pub fn add_synthetic_baselines(filtered: &[usize], limit: Option<usize>) -> Vec<Baseline> {
    let detected = |column| Baseline {
        column,
        synthetic: false,
    };
    if filtered.len() < 2 {
        return filtered.iter().copied().map(detected).collect();
    }
    let spacings: Vec<usize> = filtered.windows(2).map(|w| w[1] - w[0]).collect();
    let median = StatsHelper::median_usize(&spacings).unwrap_or(0.0);
    let mut budget = limit.map_or(usize::MAX, |limit| limit.saturating_sub(filtered.len()));

    let mut out = vec![detected(filtered[0])];
    for pair in filtered.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        let gap = (right - left) as f64;
        if median > 0.0 && gap > SYNTHETIC_GAP_FACTOR * median {
            let inserts = ((gap / median).round() as usize)
                .saturating_sub(1)
                .min(budget);
            budget -= inserts;
            let step = gap / (inserts + 1) as f64;
            for k in 1..=inserts {
                let column = left + (k as f64 * step).round() as usize;
                if column > out[out.len() - 1].column && column < right {
                    out.push(Baseline {
                        column,
                        synthetic: true,
                    });
                }
            }
        }
        out.push(detected(right));
    }
    out
}

/// Full detection pass over the cleaned image.
///
/// The two-baseline minimum is enforced by [`BaselineStage`], after the lists
/// have been published as diagnostics.
pub fn detect_baselines(
    image: ArrayView2<bool>,
    line_thickness: usize,
    rows: Range<usize>,
    threshold_percent: f32,
    expected_traces: Option<usize>,
) -> BaselineSet {
    let transitions = transitions_per_column(image, rows);
    let raw = detect_peaks(&transitions, line_thickness);
    let filtered = filter_baselines(&raw, &transitions, threshold_percent);
    let baselines = add_synthetic_baselines(&filtered, expected_traces);
    BaselineSet {
        transitions,
        raw,
        filtered,
        baselines,
    }
}

/// Cleaned image together with the baselines found in it.
#[derive(Debug, Clone)]
pub struct BaselineOutput {
    pub image: Array2<bool>,
    pub set: BaselineSet,
}

/// Baseline-detection stage.
pub struct BaselineStage {
    params: Option<ProcessingParameters>,
    expected_traces: Option<usize>,
    logger: LogManager,
}

impl BaselineStage {
    pub fn new() -> Self {
        Self {
            params: None,
            expected_traces: None,
            logger: LogManager::new("baselines"),
        }
    }

    /// Caps synthetic insertion at the trace count implied by the calibration.
    pub fn with_expected_traces(mut self, expected: usize) -> Self {
        self.expected_traces = Some(expected);
        self
    }
}

impl Default for BaselineStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for BaselineStage {
    type Input = Array2<bool>;
    type Output = BaselineOutput;

    fn name(&self) -> &'static str {
        "baselines"
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
            .ok_or_else(|| DigitizeError::Detection("stage not initialized".into()))?;
        ctx.checkpoint()?;

        let rows = params.detection_rows();
        let band_end = rows.end.min(input.nrows());
        let band_has_ink = input
            .slice(ndarray::s![rows.start..band_end, ..])
            .iter()
            .any(|&ink| ink);
        if !band_has_ink {
            return Err(DigitizeError::Detection(format!(
                "no ink left in rows {}..{} after timeline removal",
                rows.start, rows.end
            )));
        }

        let cols = input.ncols();
        ctx.reporter.progress(Step::Baselines, 0, cols);
        let set = detect_baselines(
            input.view(),
            params.trace_line_thickness,
            rows,
            params.filter_threshold,
            self.expected_traces,
        );
        ctx.reporter.progress(Step::Baselines, cols, cols);

        let counts: Vec<f32> = set.transitions.iter().map(|&c| c as f32).collect();
        let final_columns = set.columns();
        ctx.diagnostics.emit(names::TRANSITIONS, Diagnostic::Series(&counts));
        ctx.diagnostics
            .emit(names::RAW_BASELINES, Diagnostic::Columns(&set.raw));
        ctx.diagnostics
            .emit(names::FILTERED_BASELINES, Diagnostic::Columns(&set.filtered));
        ctx.diagnostics
            .emit(names::FINAL_BASELINES, Diagnostic::Columns(&final_columns));

        let synthetic = set.synthetic_count();
        ctx.metrics.record_synthetic(synthetic);
        self.logger.record(&format!(
            "baselines raw {} filtered {} final {} ({} synthetic)",
            set.raw.len(),
            set.filtered.len(),
            set.baselines.len(),
            synthetic
        ));
        self.logger
            .detail(&format!("final baseline columns {:?}", final_columns));

        if set.baselines.len() < 2 {
            return Err(DigitizeError::Detection(format!(
                "found {} baseline(s), at least 2 are required",
                set.baselines.len()
            )));
        }

        Ok(BaselineOutput { image: input, set })
    }

    fn cleanup(&mut self) {
        self.params = None;
    }
}

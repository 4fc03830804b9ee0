//! Run entry point chaining the stages from a scanned image to a SEG-Y file.

use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::interface::{BandpassCorners, GeometryTable, ProcessingParameters, RoiCalibration};
use crate::output::coordinates::{assign_coordinates, CoordinateOptions, TraceCoordinate};
use crate::output::segy::{write_segy, SegyHeader};
use crate::prelude::{DigitizeError, DigitizeResult, ProcessingStage, RunContext};
use crate::processing::conditioner::uniform_len;
use crate::processing::{
    AmplitudeStage, Baseline, BaselineStage, ConditionerInput, ConditionerStage, Spectrum,
    TimelineStage,
};
use crate::telemetry::{DiagnosticsSink, LogManager, MetricsSnapshot, ProgressReporter, RunMetrics};

/// Inputs of one digitization run besides the validated configuration.
pub struct RunRequest<'a> {
    /// Full binarized scan; the calibrated rectangle is cut out of it.
    pub image: ArrayView2<'a, bool>,
    pub geometry: &'a GeometryTable,
    pub coordinates: CoordinateOptions,
    pub output: &'a Path,
    /// Name recorded in the SEG-Y textual header.
    pub source_name: &'a str,
}

/// Serializable record of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub traces: usize,
    pub samples_per_trace: usize,
    pub sample_interval_ms: f32,
    pub first_time_ms: f64,
    pub last_time_ms: f64,
    pub expected_traces: usize,
    pub raw_baselines: usize,
    pub filtered_baselines: usize,
    pub final_baselines: usize,
    pub synthetic_baselines: usize,
    pub removed_timeline_pixels: usize,
    /// Traces that could not be restored and were rebuilt from neighbours.
    pub degenerate_traces: Vec<usize>,
    pub band: BandpassCorners,
    pub metrics: MetricsSnapshot,
    pub output: PathBuf,
}

/// Everything a caller needs to plot and review the result.
#[derive(Debug, Clone)]
pub struct DigitizedSection {
    pub summary: RunSummary,
    /// Final samples, `[trace][sample]`.
    pub data: Array2<f32>,
    pub times_ms: Vec<f64>,
    pub baselines: Vec<Baseline>,
    pub coordinates: Vec<TraceCoordinate>,
    pub spectrum: Spectrum,
}

/// Runs `stage` once: initialize, execute, cleanup.
fn run_stage<S: ProcessingStage>(
    stage: &mut S,
    params: &ProcessingParameters,
    input: S::Input,
    ctx: &mut RunContext<'_>,
) -> DigitizeResult<S::Output> {
    stage.initialize(params)?;
    let output = stage.execute(input, ctx);
    stage.cleanup();
    output
}

/// Validated configuration for digitizing sections with one calibration.
pub struct Digitizer {
    params: ProcessingParameters,
    calibration: RoiCalibration,
    logger: LogManager,
}

impl Digitizer {
    /// Fails fast on ill-formed calibration or out-of-range parameters.
    pub fn new(params: ProcessingParameters, calibration: RoiCalibration) -> DigitizeResult<Self> {
        calibration.validate()?;
        params.validate(calibration.height())?;
        let band = params.detection_rows();
        let samples = uniform_len(
            calibration.row_to_time(band.start as f64),
            calibration.row_to_time((band.end - 1) as f64),
            params.sample_interval_ms as f64,
        );
        if samples > u16::MAX as usize {
            return Err(DigitizeError::ParameterRange {
                name: "DT",
                detail: format!(
                    "{} ms yields {} samples per trace, more than {}",
                    params.sample_interval_ms,
                    samples,
                    u16::MAX
                ),
            });
        }
        Ok(Self {
            params,
            calibration,
            logger: LogManager::new("pipeline"),
        })
    }

    pub fn params(&self) -> &ProcessingParameters {
        &self.params
    }

    pub fn calibration(&self) -> &RoiCalibration {
        &self.calibration
    }

    /// Digitizes one image into a SEG-Y file at `request.output`.
    ///
    /// Diagnostics already emitted stay with `sink` when a stage fails.
    pub fn run(
        &self,
        request: RunRequest<'_>,
        reporter: &dyn ProgressReporter,
        sink: &mut dyn DiagnosticsSink,
    ) -> DigitizeResult<DigitizedSection> {
        let rows = request.geometry.rows().len();
        if rows < 2 {
            return Err(DigitizeError::Geometry(format!(
                "need at least 2 control rows, found {}",
                rows
            )));
        }
        let roi = self.calibration.crop(request.image)?.to_owned();
        self.logger.record(&format!(
            "digitizing {} ({}x{} ROI)",
            request.source_name,
            roi.nrows(),
            roi.ncols()
        ));

        let metrics = RunMetrics::new();
        let mut ctx = RunContext {
            reporter,
            diagnostics: sink,
            metrics: &metrics,
        };
        let params = &self.params;

        let removal = run_stage(&mut TimelineStage::new(), params, roi, &mut ctx)?;
        let removed_timeline_pixels = removal.removed_pixels();

        let expected_traces = self.calibration.expected_traces();
        let detected = run_stage(
            &mut BaselineStage::new().with_expected_traces(expected_traces),
            params,
            removal.cleaned,
            &mut ctx,
        )?;
        let set = detected.set.clone();
        if let (Some(first), Some(last)) = (set.baselines.first(), set.baselines.last()) {
            self.logger.detail(&format!(
                "trace lines span calibrated traces {:.1}..{:.1}",
                self.calibration.column_to_trace(first.column as f64),
                self.calibration.column_to_trace(last.column as f64)
            ));
        }
        if set.baselines.len() != expected_traces {
            self.logger.warn(&format!(
                "found {} trace lines, calibration implies {}",
                set.baselines.len(),
                expected_traces
            ));
        }

        let amplitude = run_stage(&mut AmplitudeStage::new(), params, detected, &mut ctx)?;
        let degenerate_traces = amplitude.degenerate.clone();

        let conditioned = run_stage(
            &mut ConditionerStage::new(),
            params,
            ConditionerInput {
                data: amplitude.data,
                times_ms: self.calibration.row_times(params.detection_rows()),
                degenerate: amplitude.degenerate,
            },
            &mut ctx,
        )?;

        let columns = set.columns();
        let coordinates = assign_coordinates(request.geometry, &columns, request.coordinates)?;
        let first_time_ms = conditioned.times_ms.first().copied().unwrap_or(0.0);
        let last_time_ms = conditioned.times_ms.last().copied().unwrap_or(first_time_ms);
        let header = SegyHeader {
            source: request.source_name.to_string(),
            sample_interval_us: params.sample_interval_us() as u16,
            first_time_ms,
            band: params.band,
        };
        ctx.checkpoint()?;
        write_segy(
            request.output,
            conditioned.data.view(),
            &coordinates,
            &header,
            &ctx,
        )?;

        let summary = RunSummary {
            traces: conditioned.data.nrows(),
            samples_per_trace: conditioned.data.ncols(),
            sample_interval_ms: params.sample_interval_ms,
            first_time_ms,
            last_time_ms,
            expected_traces,
            raw_baselines: set.raw.len(),
            filtered_baselines: set.filtered.len(),
            final_baselines: set.baselines.len(),
            synthetic_baselines: set.synthetic_count(),
            removed_timeline_pixels,
            degenerate_traces,
            band: params.band,
            metrics: metrics.snapshot(),
            output: request.output.to_path_buf(),
        };
        self.logger.record(&format!(
            "{} traces x {} samples written to {}",
            summary.traces,
            summary.samples_per_trace,
            request.output.display()
        ));

        Ok(DigitizedSection {
            summary,
            data: conditioned.data,
            times_ms: conditioned.times_ms,
            baselines: set.baselines,
            coordinates,
            spectrum: conditioned.spectrum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::ControlPoint;
    use crate::output::segy::inspect_segy;
    use crate::prelude::ErrorKind;
    use crate::telemetry::diagnostics::names;
    use crate::telemetry::{CancelFlag, MemorySink, NullReporter, NullSink, OwnedDiagnostic};

    const LINES: [usize; 5] = [30, 90, 150, 210, 270];

    /// 200x300 scan with five 1 px trace lines and three 4 px timelines.
    fn scan() -> Array2<bool> {
        let mut image = Array2::from_elem((200, 300), false);
        for col in LINES {
            image.column_mut(col).fill(true);
        }
        for top in [50, 100, 150] {
            for row in top..top + 4 {
                image.row_mut(row).fill(true);
            }
        }
        image
    }

    fn calibration() -> RoiCalibration {
        RoiCalibration::new(
            ControlPoint::new(0, 0, 1, 0.0),
            ControlPoint::new(0, 299, 5, 0.0),
            ControlPoint::new(199, 0, 1, 199.0),
        )
        .unwrap()
    }

    fn params() -> ProcessingParameters {
        ProcessingParameters {
            trace_line_thickness: 1,
            timeline_thickness: 4,
            horizontal_erosion: 20,
            detection_begin: 10,
            detection_end: 190,
            filter_threshold: 85.0,
            sample_interval_ms: 1.0,
            band: BandpassCorners::new(10.0, 12.0, 70.0, 80.0),
        }
    }

    fn geometry() -> GeometryTable {
        GeometryTable::parse("1 500000 4500000\n5 500100 4500080\n").unwrap()
    }

    fn request<'a>(image: &'a Array2<bool>, geometry: &'a GeometryTable, out: &'a Path) -> RunRequest<'a> {
        RunRequest {
            image: image.view(),
            geometry,
            coordinates: CoordinateOptions::default(),
            output: out,
            source_name: "synthetic",
        }
    }

    #[test]
    fn synthetic_section_digitizes_to_four_traces() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("section.sgy");
        let image = scan();
        let geometry = geometry();
        let digitizer = Digitizer::new(params(), calibration()).unwrap();
        let mut sink = MemorySink::new();

        let section = digitizer
            .run(request(&image, &geometry, &out), &NullReporter, &mut sink)
            .unwrap();

        let columns: Vec<usize> = section.baselines.iter().map(|b| b.column).collect();
        assert_eq!(columns, LINES.to_vec());
        assert!(section.baselines.iter().all(|b| !b.synthetic));
        assert_eq!(section.summary.traces, 4);
        assert_eq!(section.summary.samples_per_trace, 190 - 10);
        assert_eq!(section.summary.expected_traces, 5);
        assert!(section.data.iter().all(|v| v.is_finite()));

        let file = inspect_segy(&out).unwrap();
        assert_eq!(file.trace_count, 4);
        assert_eq!(file.traces.len(), 4);
        assert_eq!(file.samples, 180);
        assert_eq!(file.sample_interval_us, 1000);
        assert_eq!(file.traces[0].delay_ms, 10);
        assert_eq!(file.traces[1].cdp, 2);
        assert_eq!((file.traces[1].x, file.traces[1].y), (500025.0, 4500020.0));

        for name in [
            names::TIMELINE_MASK,
            names::FINAL_BASELINES,
            names::PROCESSED_AMPLITUDE,
            names::SPECTRUM,
        ] {
            assert!(sink.get(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.sgy");
        let second = dir.path().join("b.sgy");
        let image = scan();
        let geometry = geometry();
        let digitizer = Digitizer::new(params(), calibration()).unwrap();

        let a = digitizer
            .run(request(&image, &geometry, &first), &NullReporter, &mut NullSink)
            .unwrap();
        let b = digitizer
            .run(request(&image, &geometry, &second), &NullReporter, &mut NullSink)
            .unwrap();

        assert_eq!(a.data, b.data);
        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[test]
    fn invalid_parameters_fail_before_processing() {
        let mut bad = params();
        bad.detection_end = 500;
        let err = Digitizer::new(bad, calibration()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ParameterRange);
    }

    #[test]
    fn oversized_trace_length_is_rejected_before_processing() {
        let long_section = RoiCalibration::new(
            ControlPoint::new(0, 0, 1, 0.0),
            ControlPoint::new(0, 299, 5, 0.0),
            ControlPoint::new(199, 0, 1, 4000.0),
        )
        .unwrap();
        let mut fine = params();
        fine.sample_interval_ms = 0.05;
        let err = Digitizer::new(fine, long_section).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ParameterRange);
        assert!(err.to_string().contains("samples per trace"));

        let mut coarse = params();
        coarse.sample_interval_ms = 2.0;
        assert!(Digitizer::new(coarse, long_section).is_ok());
    }

    #[test]
    fn blank_scan_fails_detection_and_keeps_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("blank.sgy");
        // a single dashed trace line
        let mut image = Array2::from_elem((200, 300), false);
        for row in (0..200).filter(|row| row % 10 < 7) {
            image[[row, 120]] = true;
        }
        let geometry = geometry();
        let digitizer = Digitizer::new(params(), calibration()).unwrap();
        let mut sink = MemorySink::new();

        let err = digitizer
            .run(request(&image, &geometry, &out), &NullReporter, &mut sink)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Detection);
        assert!(!out.exists());
        match sink.get(names::FINAL_BASELINES) {
            Some(OwnedDiagnostic::Columns(columns)) => assert_eq!(columns, &vec![120]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancelled_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cancelled.sgy");
        let image = scan();
        let geometry = geometry();
        let digitizer = Digitizer::new(params(), calibration()).unwrap();
        let flag = CancelFlag::new();
        flag.cancel();

        let err = digitizer
            .run(request(&image, &geometry, &out), &flag, &mut NullSink)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!out.exists());
    }

    #[test]
    fn roi_outside_image_is_a_calibration_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("small.sgy");
        let image = Array2::from_elem((100, 100), false);
        let geometry = geometry();
        let digitizer = Digitizer::new(params(), calibration()).unwrap();
        let err = digitizer
            .run(request(&image, &geometry, &out), &NullReporter, &mut NullSink)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Calibration);
    }
}

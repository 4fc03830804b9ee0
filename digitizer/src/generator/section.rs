use crate::workflow::config::WorkflowConfig;
use anyhow::{ensure, Context};
use image::GrayImage;
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use segycore::interface::{
    BandpassCorners, CdpDirection, ControlPoint, GeometryRow, GeometryTable, ProcessingParameters,
    RoiCalibration,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

/// Rows between the ROI edge and the detection band.
const DETECTION_MARGIN: usize = 10;
/// Rows between the ROI edge and the first or last drawn wiggle.
const WIGGLE_GUARD: usize = 2 * DETECTION_MARGIN;

/// Layout of a synthetic variable-area section.
///
/// Every trace line is dashed so it crosses many more ink edges than the
/// filled wiggles beside it, the way scanned trace lines do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionConfig {
    pub traces: usize,
    pub trace_spacing: usize,
    /// ROI height in rows.
    pub rows: usize,
    /// Blank paper around the ROI.
    pub margin: usize,
    pub row_ms: f64,
    pub timeline_interval_ms: f64,
    pub timeline_thickness: usize,
    pub min_frequency: f64,
    pub max_frequency: f64,
    /// Wiggle peak as a fraction of the trace spacing; above 1 clips.
    pub min_amplitude: f64,
    pub max_amplitude: f64,
    pub dash_period: usize,
    pub dash_on: usize,
    pub origin_x: f64,
    pub origin_y: f64,
    pub cdp_spacing_m: f64,
    pub seed: u64,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            traces: 12,
            trace_spacing: 24,
            rows: 400,
            margin: 20,
            row_ms: 2.0,
            timeline_interval_ms: 100.0,
            timeline_thickness: 4,
            min_frequency: 15.0,
            max_frequency: 35.0,
            min_amplitude: 0.5,
            max_amplitude: 1.1,
            dash_period: 5,
            dash_on: 3,
            origin_x: 500_000.0,
            origin_y: 4_500_000.0,
            cdp_spacing_m: 12.5,
            seed: 0,
        }
    }
}

/// A drawn section together with everything needed to digitize it.
pub struct SyntheticSection {
    /// Grayscale scan, `[row][col]`, dark ink on light paper.
    pub gray: Array2<u8>,
    pub roi: RoiCalibration,
    pub params: ProcessingParameters,
    pub geometry: GeometryTable,
    /// Trace line columns relative to the ROI.
    pub baselines: Vec<usize>,
}

impl SectionConfig {
    fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.traces >= 2, "need at least 2 traces, got {}", self.traces);
        ensure!(self.trace_spacing >= 4, "trace spacing {} is too narrow", self.trace_spacing);
        ensure!(self.rows > 40, "ROI of {} rows is too short", self.rows);
        ensure!(
            self.dash_on > 0 && self.dash_on < self.dash_period,
            "dash of {} rows does not fit a period of {}",
            self.dash_on,
            self.dash_period
        );
        ensure!(self.row_ms > 0.0, "row interval must be positive");
        ensure!(
            self.min_frequency > 0.0 && self.min_frequency <= self.max_frequency,
            "frequency range {}..{} is empty",
            self.min_frequency,
            self.max_frequency
        );
        ensure!(
            self.min_amplitude > 0.0 && self.min_amplitude <= self.max_amplitude,
            "amplitude range {}..{} is empty",
            self.min_amplitude,
            self.max_amplitude
        );
        Ok(())
    }

    fn roi_width(&self) -> usize {
        self.traces * self.trace_spacing
    }

    /// Parameters tuned to the drawing.
    pub fn parameters(&self) -> ProcessingParameters {
        let nyquist = 500.0 / self.row_ms;
        let f3 = (self.max_frequency * 1.5).min(nyquist * 0.6);
        ProcessingParameters {
            trace_line_thickness: 1,
            timeline_thickness: self.timeline_thickness,
            horizontal_erosion: (self.roi_width() / 3).max(1),
            detection_begin: DETECTION_MARGIN,
            detection_end: self.rows - DETECTION_MARGIN,
            filter_threshold: 80.0,
            sample_interval_ms: self.row_ms as f32,
            band: BandpassCorners::new(
                (self.min_frequency * 0.4) as f32,
                (self.min_frequency * 0.6) as f32,
                f3 as f32,
                (f3 * 1.25).min(nyquist * 0.9) as f32,
            ),
        }
    }

    pub fn calibration(&self) -> anyhow::Result<RoiCalibration> {
        let (top, left) = (self.margin, self.margin);
        let bottom = top + self.rows - 1;
        let right = left + self.roi_width() - 1;
        RoiCalibration::new(
            ControlPoint::new(top, left, 1, 0.0),
            ControlPoint::new(top, right, self.traces as i64, 0.0),
            ControlPoint::new(bottom, left, 1, (self.rows - 1) as f64 * self.row_ms),
        )
        .context("building synthetic calibration")
    }

    pub fn geometry(&self) -> anyhow::Result<GeometryTable> {
        let last = (self.traces - 1) as f64 * self.cdp_spacing_m;
        GeometryTable::new(vec![
            GeometryRow {
                cdp: 1,
                x: self.origin_x,
                y: self.origin_y,
            },
            GeometryRow {
                cdp: self.traces as i64,
                x: self.origin_x + last * 0.8,
                y: self.origin_y + last * 0.6,
            },
        ])
        .context("building synthetic geometry")
    }
}

/// Draws a section; the same seed always yields the same pixels.
pub fn build_section(config: &SectionConfig) -> anyhow::Result<SyntheticSection> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let height = config.rows + 2 * config.margin;
    let width = config.roi_width() + 2 * config.margin;
    let mut ink = Array2::from_elem((height, width), false);

    let baselines: Vec<usize> = (0..config.traces)
        .map(|trace| config.trace_spacing / 2 + trace * config.trace_spacing)
        .collect();
    let top = config.margin;

    for (trace, &baseline) in baselines.iter().enumerate() {
        let col = config.margin + baseline;
        for row in (top..top + config.rows).filter(|row| row % config.dash_period < config.dash_on)
        {
            ink[[row, col]] = true;
        }
        if trace + 1 == baselines.len() {
            break;
        }
        let frequency = rng.gen_range(config.min_frequency..=config.max_frequency);
        let phase = rng.gen_range(0.0..2.0 * PI);
        let peak =
            rng.gen_range(config.min_amplitude..=config.max_amplitude) * config.trace_spacing as f64;
        let widest = config.trace_spacing - 1;
        // every lobe starts and ends inside the detection band
        for roi_row in WIGGLE_GUARD..config.rows - WIGGLE_GUARD {
            let t = roi_row as f64 * config.row_ms / 1000.0;
            let value = peak * (2.0 * PI * frequency * t + phase).sin();
            let fill = (value.round().max(0.0) as usize).min(widest);
            for offset in 1..=fill {
                ink[[top + roi_row, col + offset]] = true;
            }
        }
    }

    let interval_rows = (config.timeline_interval_ms / config.row_ms).round().max(1.0) as usize;
    let mut roi_row = interval_rows;
    while roi_row + config.timeline_thickness < config.rows {
        for row in roi_row..roi_row + config.timeline_thickness {
            ink.row_mut(top + row).fill(true);
        }
        roi_row += interval_rows;
    }

    let gray = ink.mapv(|dark| {
        if dark {
            rng.gen_range(0..=50)
        } else {
            rng.gen_range(215..=255)
        }
    });

    Ok(SyntheticSection {
        gray,
        roi: config.calibration()?,
        params: config.parameters(),
        geometry: config.geometry()?,
        baselines,
    })
}

/// Writes the scan, geometry and workflow file of a section into `dir`.
///
/// Returns the workflow that digitizes it into `dir/section.sgy`.
pub fn write_section(config: &SectionConfig, dir: &Path) -> anyhow::Result<WorkflowConfig> {
    let section = build_section(config)?;
    log::info!("trace lines drawn at ROI columns {:?}", section.baselines);
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let image_path = dir.join("section.png");
    let (rows, cols) = section.gray.dim();
    let picture = GrayImage::from_raw(cols as u32, rows as u32, section.gray.into_raw_vec())
        .context("packing synthetic scan")?;
    picture
        .save(&image_path)
        .with_context(|| format!("writing {}", image_path.display()))?;

    let geometry_path = dir.join("geometry.txt");
    let table: String = section
        .geometry
        .rows()
        .iter()
        .map(|row| format!("{} {} {}\n", row.cdp, row.x, row.y))
        .collect();
    fs::write(&geometry_path, table)
        .with_context(|| format!("writing {}", geometry_path.display()))?;

    let workflow = WorkflowConfig {
        image: image_path,
        roi: section.roi,
        parameters: section.params,
        par_file: None,
        geometry: geometry_path,
        cdp_direction: CdpDirection::Increasing,
        start_cdp: None,
        threshold: segycore::processing::timelines::DEFAULT_INK_THRESHOLD,
        output: dir.join("section.sgy"),
        diagnostics: None,
    };
    let workflow_path = dir.join("workflow.yaml");
    let yaml = serde_yaml::to_string(&workflow).context("serializing synthetic workflow")?;
    fs::write(&workflow_path, yaml)
        .with_context(|| format!("writing {}", workflow_path.display()))?;
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use segycore::processing::timelines::binarize;
    use segycore::telemetry::{NullReporter, NullSink};
    use segycore::{Digitizer, RunRequest};

    #[test]
    fn same_seed_draws_same_section() {
        let config = SectionConfig {
            seed: 7,
            ..Default::default()
        };
        let a = build_section(&config).unwrap();
        let b = build_section(&config).unwrap();
        assert_eq!(a.gray, b.gray);

        let other = build_section(&SectionConfig {
            seed: 8,
            ..Default::default()
        })
        .unwrap();
        assert_ne!(a.gray, other.gray);
    }

    #[test]
    fn section_dimensions_follow_config() {
        let config = SectionConfig::default();
        let section = build_section(&config).unwrap();
        assert_eq!(section.gray.dim(), (440, 328));
        assert_eq!(section.roi.width(), 288);
        assert_eq!(section.roi.height(), 400);
        assert_eq!(section.roi.expected_traces(), 12);
        assert_eq!(section.baselines[0], 12);
        assert_eq!(section.baselines[11], 276);
        assert!(section.params.validate(section.roi.height()).is_ok());
    }

    #[test]
    fn generated_section_digitizes_at_drawn_baselines() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("synthetic.sgy");
        let section = build_section(&SectionConfig::default()).unwrap();
        let image = binarize(section.gray.view(), 128);
        let digitizer = Digitizer::new(section.params.clone(), section.roi).unwrap();

        let result = digitizer
            .run(
                RunRequest {
                    image: image.view(),
                    geometry: &section.geometry,
                    coordinates: Default::default(),
                    output: &out,
                    source_name: "synthetic",
                },
                &NullReporter,
                &mut NullSink,
            )
            .unwrap();

        let columns: Vec<usize> = result.baselines.iter().map(|b| b.column).collect();
        assert_eq!(columns, section.baselines);
        assert_eq!(result.summary.traces, 11);
        assert!(result.data.iter().all(|v| v.is_finite()));
        assert!(out.exists());
    }

    #[test]
    fn degenerate_layouts_are_rejected() {
        let config = SectionConfig {
            traces: 1,
            ..Default::default()
        };
        assert!(build_section(&config).is_err());
        let config = SectionConfig {
            dash_on: 5,
            ..Default::default()
        };
        assert!(build_section(&config).is_err());
    }
}

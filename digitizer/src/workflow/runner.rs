use crate::workflow::config::{ParFile, WorkflowConfig};
use crate::workflow::diagnostics::DirectorySink;
use anyhow::Context;
use image::ImageReader;
use ndarray::Array2;
use segycore::interface::{GeometryTable, ProcessingParameters, RoiCalibration};
use segycore::processing::timelines::binarize;
use segycore::telemetry::{DiagnosticsSink, NullSink, ProgressReporter, Step};
use segycore::{Digitizer, RunRequest, RunSummary};
use std::cell::Cell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Decodes any supported raster into an 8-bit grayscale `[row][col]` array.
pub fn load_grayscale<P: AsRef<Path>>(path: P) -> anyhow::Result<Array2<u8>> {
    let path_ref = path.as_ref();
    let gray = ImageReader::open(path_ref)
        .with_context(|| format!("opening {}", path_ref.display()))?
        .decode()
        .with_context(|| format!("decoding {}", path_ref.display()))?
        .into_luma8();
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    Array2::from_shape_vec((height, width), gray.into_raw())
        .with_context(|| format!("reshaping {} pixels", path_ref.display()))
}

/// Writes the run summary next to the SEG-Y file, replacing any earlier one
/// in a single rename.
pub fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(summary).context("serializing run summary")?;
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temporary file in {}", parent.display()))?;
    temp.write_all(json.as_bytes())
        .and_then(|()| temp.as_file().sync_all())
        .with_context(|| format!("writing run summary {}", path.display()))?;
    temp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("replacing run summary {}", path.display()))?;
    Ok(())
}

/// Logs each step once when it starts and again when it finishes.
pub struct LoggingReporter<'a> {
    inner: &'a dyn ProgressReporter,
    current: Cell<Option<Step>>,
}

impl<'a> LoggingReporter<'a> {
    pub fn new(inner: &'a dyn ProgressReporter) -> Self {
        Self {
            inner,
            current: Cell::new(None),
        }
    }
}

impl ProgressReporter for LoggingReporter<'_> {
    fn progress(&self, step: Step, done: usize, total: usize) {
        if self.current.get() != Some(step) {
            self.current.set(Some(step));
            log::info!("{:?}: {} items", step, total);
        }
        if done == total {
            log::debug!("{:?}: done", step);
        }
        self.inner.progress(step, done, total);
    }

    fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

pub struct WorkflowResult {
    pub summary: RunSummary,
    pub summary_path: PathBuf,
    pub params: ProcessingParameters,
    pub roi: RoiCalibration,
}

impl WorkflowResult {
    /// Effective calibration and parameters in `.par` form.
    pub fn par_file(&self) -> ParFile {
        ParFile::from_run(&self.roi, &self.params)
    }
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, reporter: &dyn ProgressReporter) -> anyhow::Result<WorkflowResult> {
        let (params, roi) = self.config.resolve()?;
        let digitizer =
            Digitizer::new(params.clone(), roi).context("validating calibration and parameters")?;

        let gray = load_grayscale(&self.config.image)?;
        let image = binarize(gray.view(), self.config.threshold);
        let geometry = GeometryTable::load(&self.config.geometry)
            .with_context(|| format!("loading geometry {}", self.config.geometry.display()))?;

        let mut sink: Box<dyn DiagnosticsSink> = match &self.config.diagnostics {
            Some(dir) => Box::new(DirectorySink::create(dir)?),
            None => Box::new(NullSink),
        };
        if let Some(parent) = self.config.output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating output directory {}", parent.display()))?;
            }
        }

        let source_name = self
            .config
            .image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.image.display().to_string());
        let reporter = LoggingReporter::new(reporter);
        let section = digitizer
            .run(
                RunRequest {
                    image: image.view(),
                    geometry: &geometry,
                    coordinates: self.config.coordinate_options(),
                    output: &self.config.output,
                    source_name: &source_name,
                },
                &reporter,
                sink.as_mut(),
            )
            .with_context(|| format!("digitizing {}", self.config.image.display()))?;

        let summary_path = self.config.output.with_extension("json");
        write_summary(&summary_path, &section.summary)?;

        Ok(WorkflowResult {
            summary: section.summary,
            summary_path,
            params,
            roi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::section::{write_section, SectionConfig};
    use segycore::output::inspect_segy;
    use segycore::telemetry::{CancelFlag, NullReporter};

    #[test]
    fn grayscale_loader_keeps_row_major_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        let mut picture = image::GrayImage::new(3, 2);
        picture.put_pixel(2, 1, image::Luma([7]));
        picture.save(&path).unwrap();

        let gray = load_grayscale(&path).unwrap();
        assert_eq!(gray.dim(), (2, 3));
        assert_eq!(gray[[1, 2]], 7);
        assert_eq!(gray[[0, 0]], 0);
    }

    #[test]
    fn runner_digitizes_generated_section() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SectionConfig::default();
        let mut workflow = write_section(&cfg, dir.path()).unwrap();
        workflow.diagnostics = Some(dir.path().join("diagnostics"));

        let result = Runner::new(workflow.clone()).execute(&NullReporter).unwrap();

        assert_eq!(result.summary.final_baselines, cfg.traces);
        assert_eq!(result.summary.traces, cfg.traces - 1);
        let file = inspect_segy(&workflow.output).unwrap();
        assert_eq!(file.trace_count, (cfg.traces - 1) as u64);
        let json = fs::read_to_string(&result.summary_path).unwrap();
        let parsed: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result.summary);
        assert!(dir.path().join("diagnostics/baselines.final.txt").exists());
        assert!(dir.path().join("diagnostics/timelines.mask.png").exists());
    }

    #[test]
    fn summary_replaces_previous_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("line.json");
        fs::write(&path, "stale").unwrap();
        let summary = RunSummary::default();

        write_summary(&path, &summary).unwrap();

        let parsed: RunSummary =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, summary);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn summary_into_missing_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent/line.json");
        let err = write_summary(&path, &RunSummary::default()).unwrap_err();
        assert!(format!("{err:#}").contains("absent"));
        assert!(!path.exists());
    }

    #[test]
    fn cancelled_runner_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = write_section(&SectionConfig::default(), dir.path()).unwrap();
        let flag = CancelFlag::new();
        flag.cancel();

        assert!(Runner::new(workflow.clone()).execute(&flag).is_err());
        assert!(!workflow.output.exists());
        assert!(!workflow.output.with_extension("json").exists());
    }

    #[test]
    fn missing_image_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut workflow = write_section(&SectionConfig::default(), dir.path()).unwrap();
        workflow.image = dir.path().join("absent.png");
        let err = Runner::new(workflow).execute(&NullReporter).err().unwrap();
        assert!(format!("{err:#}").contains("absent.png"));
    }
}

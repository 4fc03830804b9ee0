use anyhow::{bail, Context};
use segycore::interface::{CdpDirection, ProcessingParameters, RoiCalibration};
use segycore::output::CoordinateOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

fn default_threshold() -> u8 {
    segycore::processing::timelines::DEFAULT_INK_THRESHOLD
}

/// One digitization job as described in a YAML workflow file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub image: PathBuf,
    /// ROI corners; trace numbers and times may be overridden by `par_file`.
    pub roi: RoiCalibration,
    #[serde(default)]
    pub parameters: ProcessingParameters,
    #[serde(default)]
    pub par_file: Option<PathBuf>,
    pub geometry: PathBuf,
    #[serde(default)]
    pub cdp_direction: CdpDirection,
    #[serde(default)]
    pub start_cdp: Option<i64>,
    /// Grey level below which a pixel is ink.
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    pub output: PathBuf,
    #[serde(default)]
    pub diagnostics: Option<PathBuf>,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Parameters and calibration after applying the `.par` file, if any.
    pub fn resolve(&self) -> anyhow::Result<(ProcessingParameters, RoiCalibration)> {
        match &self.par_file {
            Some(path) => {
                let par = ParFile::load(path)?;
                let mut roi = self.roi;
                par.apply_to(&mut roi);
                Ok((par.params, roi))
            }
            None => Ok((self.parameters.clone(), self.roi)),
        }
    }

    pub fn coordinate_options(&self) -> CoordinateOptions {
        CoordinateOptions {
            direction: self.cdp_direction,
            start_cdp: self.start_cdp,
        }
    }
}

/// Contents of a tab-separated `.par` parameter file.
///
/// Processing keys missing from the file keep their defaults; missing
/// `Trace_P*`/`TWT_P*` keys leave the workflow's ROI values untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParFile {
    pub traces: [Option<i64>; 3],
    pub twt_ms: [Option<f64>; 3],
    pub params: ProcessingParameters,
}

const POINTS: [&str; 3] = ["P1", "P2", "P3"];

impl ParFile {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut values = BTreeMap::new();
        for (index, line) in text.lines().enumerate() {
            let Some((key, value)) = line.split_once('\t') else {
                continue;
            };
            let value: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("line {}: value of {} is not a number", index + 1, key))?;
            values.insert(key.trim().to_string(), value);
        }

        let mut par = ParFile::default();
        for (slot, point) in POINTS.iter().enumerate() {
            par.traces[slot] = values.get(&format!("Trace_{point}")).map(|&v| v.round() as i64);
            par.twt_ms[slot] = values.get(&format!("TWT_{point}")).copied();
        }

        let params = &mut par.params;
        let count = |key: &str, current: usize| -> anyhow::Result<usize> {
            match values.get(key) {
                Some(&v) if v < 0.0 || v.fract() != 0.0 => {
                    bail!("{} must be a non-negative integer, found {}", key, v)
                }
                Some(&v) => Ok(v as usize),
                None => Ok(current),
            }
        };
        let real = |key: &str, current: f32| values.get(key).map_or(current, |&v| v as f32);

        params.trace_line_thickness = count("TLT", params.trace_line_thickness)?;
        params.timeline_thickness = count("HLT", params.timeline_thickness)?;
        params.horizontal_erosion = count("HE", params.horizontal_erosion)?;
        params.detection_begin = count("BDB", params.detection_begin)?;
        params.detection_end = count("BDE", params.detection_end)?;
        params.filter_threshold = real("BFT", params.filter_threshold);
        params.sample_interval_ms = real("DT", params.sample_interval_ms);
        params.band.f1 = real("F1", params.band.f1);
        params.band.f2 = real("F2", params.band.f2);
        params.band.f3 = real("F3", params.band.f3);
        params.band.f4 = real("F4", params.band.f4);
        Ok(par)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading parameter file {}", path_ref.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("parsing parameter file {}", path_ref.display()))
    }

    /// Captures the effective calibration and parameters of a run.
    pub fn from_run(roi: &RoiCalibration, params: &ProcessingParameters) -> Self {
        let points = [roi.p1, roi.p2, roi.p3];
        Self {
            traces: points.map(|p| Some(p.trace)),
            twt_ms: points.map(|p| Some(p.twt_ms)),
            params: params.clone(),
        }
    }

    pub fn apply_to(&self, roi: &mut RoiCalibration) {
        for (slot, point) in [&mut roi.p1, &mut roi.p2, &mut roi.p3].into_iter().enumerate() {
            if let Some(trace) = self.traces[slot] {
                point.trace = trace;
            }
            if let Some(twt) = self.twt_ms[slot] {
                point.twt_ms = twt;
            }
        }
    }

    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        for (slot, point) in POINTS.iter().enumerate() {
            if let Some(trace) = self.traces[slot] {
                lines.push(format!("Trace_{point}\t{trace}"));
            }
            if let Some(twt) = self.twt_ms[slot] {
                lines.push(format!("TWT_{point}\t{twt}"));
            }
        }
        let p = &self.params;
        lines.push(format!("DT\t{}", p.sample_interval_ms));
        lines.push(format!("F1\t{}", p.band.f1));
        lines.push(format!("F2\t{}", p.band.f2));
        lines.push(format!("F3\t{}", p.band.f3));
        lines.push(format!("F4\t{}", p.band.f4));
        lines.push(format!("TLT\t{}", p.trace_line_thickness));
        lines.push(format!("HLT\t{}", p.timeline_thickness));
        lines.push(format!("HE\t{}", p.horizontal_erosion));
        lines.push(format!("BDB\t{}", p.detection_begin));
        lines.push(format!("BDE\t{}", p.detection_end));
        lines.push(format!("BFT\t{}", p.filter_threshold));
        lines.join("\n") + "\n"
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path_ref = path.as_ref();
        fs::write(path_ref, self.to_text())
            .with_context(|| format!("writing parameter file {}", path_ref.display()))
    }
}

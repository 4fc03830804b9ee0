use serde::{Deserialize, Serialize};

use crate::prelude::{DigitizeError, DigitizeResult};

/// Tunable settings for one digitization run.
///
/// Validated once at pipeline entry and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParameters {
    /// Thickness of the vertical trace lines, in pixels (TLT).
    #[serde(alias = "TLT")]
    pub trace_line_thickness: usize,
    /// Maximum thickness of a printed timeline, in pixels (HLT).
    #[serde(alias = "HLT")]
    pub timeline_thickness: usize,
    /// Horizontal erosion run length, in pixels (HE).
    #[serde(alias = "HE")]
    pub horizontal_erosion: usize,
    /// First row of the baseline detection band (BDB).
    #[serde(alias = "BDB")]
    pub detection_begin: usize,
    /// Row after the last one in the detection band (BDE).
    #[serde(alias = "BDE")]
    pub detection_end: usize,
    /// Baseline merge threshold, percent of the median spacing (BFT).
    #[serde(alias = "BFT")]
    pub filter_threshold: f32,
    /// Output sample interval in milliseconds (DT).
    #[serde(alias = "DT")]
    pub sample_interval_ms: f32,
    #[serde(flatten)]
    pub band: BandpassCorners,
}

/// Corner frequencies of the trapezoidal bandpass, in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandpassCorners {
    #[serde(alias = "F1")]
    pub f1: f32,
    #[serde(alias = "F2")]
    pub f2: f32,
    #[serde(alias = "F3")]
    pub f3: f32,
    #[serde(alias = "F4")]
    pub f4: f32,
}

impl BandpassCorners {
    pub fn new(f1: f32, f2: f32, f3: f32, f4: f32) -> Self {
        Self { f1, f2, f3, f4 }
    }

    pub fn validate(&self) -> DigitizeResult<()> {
        let corners = [self.f1, self.f2, self.f3, self.f4];
        if corners.iter().any(|f| !f.is_finite()) {
            return Err(out_of_range("F1..F4", "corner frequencies must be finite"));
        }
        if self.f1 < 0.0 {
            return Err(out_of_range("F1", format!("{} must be >= 0", self.f1)));
        }
        if self.f1 >= self.f2 {
            return Err(out_of_range("F2", format!("F1 {} must be < F2 {}", self.f1, self.f2)));
        }
        if self.f2 > self.f3 {
            return Err(out_of_range("F3", format!("F2 {} must be <= F3 {}", self.f2, self.f3)));
        }
        if self.f3 >= self.f4 {
            return Err(out_of_range("F4", format!("F3 {} must be < F4 {}", self.f3, self.f4)));
        }
        Ok(())
    }
}

impl Default for BandpassCorners {
    fn default() -> Self {
        Self::new(10.0, 12.0, 70.0, 80.0)
    }
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            trace_line_thickness: 1,
            timeline_thickness: 5,
            horizontal_erosion: 50,
            detection_begin: 5,
            detection_end: 100,
            filter_threshold: 80.0,
            sample_interval_ms: 1.0,
            band: BandpassCorners::default(),
        }
    }
}

impl ProcessingParameters {
    /// Checks every range constraint against an image of `image_height` rows.
    pub fn validate(&self, image_height: usize) -> DigitizeResult<()> {
        if self.trace_line_thickness < 1 {
            return Err(out_of_range("TLT", "must be >= 1"));
        }
        if self.timeline_thickness < 1 {
            return Err(out_of_range("HLT", "must be >= 1"));
        }
        if self.horizontal_erosion == 0 {
            return Err(out_of_range("HE", "must be > 0"));
        }
        if self.detection_begin >= self.detection_end {
            return Err(out_of_range(
                "BDB",
                format!(
                    "BDB {} must be < BDE {}",
                    self.detection_begin, self.detection_end
                ),
            ));
        }
        if self.detection_end > image_height {
            return Err(out_of_range(
                "BDE",
                format!(
                    "BDE {} exceeds image height {}",
                    self.detection_end, image_height
                ),
            ));
        }
        if !(self.filter_threshold > 0.0 && self.filter_threshold < 100.0) {
            return Err(out_of_range(
                "BFT",
                format!("{} must lie in (0, 100)", self.filter_threshold),
            ));
        }
        if !(self.sample_interval_ms.is_finite() && self.sample_interval_ms > 0.0) {
            return Err(out_of_range(
                "DT",
                format!("{} must be > 0", self.sample_interval_ms),
            ));
        }
        if self.sample_interval_us() == 0 {
            return Err(out_of_range(
                "DT",
                format!("{} ms rounds to 0 us", self.sample_interval_ms),
            ));
        }
        // SEG-Y stores the interval in microseconds as an unsigned 16-bit field.
        if self.sample_interval_us() > u16::MAX as u32 {
            return Err(out_of_range(
                "DT",
                format!("{} ms does not fit the trace header", self.sample_interval_ms),
            ));
        }
        self.band.validate()
    }

    pub fn sample_interval_us(&self) -> u32 {
        (self.sample_interval_ms as f64 * 1000.0).round() as u32
    }

    pub fn detection_rows(&self) -> std::ops::Range<usize> {
        self.detection_begin..self.detection_end
    }
}

fn out_of_range(name: &'static str, detail: impl Into<String>) -> DigitizeError {
    DigitizeError::ParameterRange {
        name,
        detail: detail.into(),
    }
}

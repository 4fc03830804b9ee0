use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::prelude::{DigitizeError, DigitizeResult};

/// A pixel location tied to its trace number and two-way time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub row: usize,
    pub col: usize,
    pub trace: i64,
    pub twt_ms: f64,
}

impl ControlPoint {
    pub fn new(row: usize, col: usize, trace: i64, twt_ms: f64) -> Self {
        Self {
            row,
            col,
            trace,
            twt_ms,
        }
    }
}

/// Rectangular region of interest defined by three control points.
///
/// `p1` is top-left, `p2` top-right and `p3` bottom-left; the bottom-right
/// corner is implied at `(p3.row, p2.col)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiCalibration {
    pub p1: ControlPoint,
    pub p2: ControlPoint,
    pub p3: ControlPoint,
}

impl RoiCalibration {
    /// Builds a calibration, rejecting point sets that do not span a rectangle.
    pub fn new(p1: ControlPoint, p2: ControlPoint, p3: ControlPoint) -> DigitizeResult<Self> {
        let calibration = Self { p1, p2, p3 };
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn validate(&self) -> DigitizeResult<()> {
        let (p1, p2, p3) = (&self.p1, &self.p2, &self.p3);
        if p1.col != p3.col {
            return Err(DigitizeError::Calibration(format!(
                "P1 column {} and P3 column {} must share the left edge",
                p1.col, p3.col
            )));
        }
        if p1.row != p2.row {
            return Err(DigitizeError::Calibration(format!(
                "P1 row {} and P2 row {} must share the top edge",
                p1.row, p2.row
            )));
        }
        if p2.col <= p1.col {
            return Err(DigitizeError::Calibration(
                "P2 must lie to the right of P1".into(),
            ));
        }
        if p3.row <= p1.row {
            return Err(DigitizeError::Calibration("P3 must lie below P1".into()));
        }
        if p1.trace == p2.trace {
            return Err(DigitizeError::Calibration(
                "P1 and P2 carry the same trace number".into(),
            ));
        }
        if !(p1.twt_ms.is_finite() && p3.twt_ms.is_finite()) || p3.twt_ms <= p1.twt_ms {
            return Err(DigitizeError::Calibration(format!(
                "TWT at P3 ({}) must be greater than TWT at P1 ({})",
                p3.twt_ms, p1.twt_ms
            )));
        }
        Ok(())
    }

    /// Implied bottom-right corner as `(row, col)`.
    pub fn fourth_corner(&self) -> (usize, usize) {
        (self.p3.row, self.p2.col)
    }

    /// Crop height in pixels, corners inclusive.
    pub fn height(&self) -> usize {
        self.p3.row - self.p1.row + 1
    }

    /// Crop width in pixels, corners inclusive.
    pub fn width(&self) -> usize {
        self.p2.col - self.p1.col + 1
    }

    /// Trace range implied by the top edge, endpoints inclusive.
    pub fn expected_traces(&self) -> usize {
        (self.p2.trace - self.p1.trace).unsigned_abs() as usize + 1
    }

    /// Maps a column of the cropped image to its (fractional) trace number.
    pub fn column_to_trace(&self, col: f64) -> f64 {
        let span = (self.width() - 1) as f64;
        self.p1.trace as f64 + col * (self.p2.trace - self.p1.trace) as f64 / span
    }

    /// Maps a row of the cropped image to two-way time in milliseconds.
    pub fn row_to_time(&self, row: f64) -> f64 {
        let span = (self.height() - 1) as f64;
        self.p1.twt_ms + row * (self.p3.twt_ms - self.p1.twt_ms) / span
    }

    /// Times of `rows` in the cropped image.
    pub fn row_times(&self, rows: std::ops::Range<usize>) -> Vec<f64> {
        rows.map(|row| self.row_to_time(row as f64)).collect()
    }

    /// Cuts the calibrated rectangle out of a full-size image.
    pub fn crop<'a, T>(&self, image: ArrayView2<'a, T>) -> DigitizeResult<ArrayView2<'a, T>> {
        let (rows, cols) = image.dim();
        let (bottom, right) = self.fourth_corner();
        if bottom >= rows || right >= cols {
            return Err(DigitizeError::Calibration(format!(
                "corner ({}, {}) lies outside the {}x{} image",
                bottom, right, rows, cols
            )));
        }
        Ok(image.slice_move(s![self.p1.row..=bottom, self.p1.col..=right]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::ErrorKind;
    use ndarray::Array2;

    fn calibration() -> RoiCalibration {
        RoiCalibration::new(
            ControlPoint::new(10, 20, 1, 0.0),
            ControlPoint::new(10, 120, 51, 0.0),
            ControlPoint::new(210, 20, 1, 2000.0),
        )
        .unwrap()
    }

    #[test]
    fn affine_maps_hit_control_points() {
        let roi = calibration();
        assert_eq!(roi.row_to_time(0.0), 0.0);
        assert_eq!(roi.row_to_time(200.0), 2000.0);
        assert_eq!(roi.row_to_time(100.0), 1000.0);
        assert_eq!(roi.column_to_trace(0.0), 1.0);
        assert_eq!(roi.column_to_trace(100.0), 51.0);
        assert_eq!(roi.expected_traces(), 51);
        assert_eq!(roi.fourth_corner(), (210, 120));
    }

    #[test]
    fn misaligned_edges_are_rejected() {
        let err = RoiCalibration::new(
            ControlPoint::new(10, 20, 1, 0.0),
            ControlPoint::new(12, 120, 51, 0.0),
            ControlPoint::new(210, 20, 1, 2000.0),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Calibration);

        let err = RoiCalibration::new(
            ControlPoint::new(10, 20, 1, 0.0),
            ControlPoint::new(10, 120, 51, 0.0),
            ControlPoint::new(210, 21, 1, 2000.0),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Calibration);
    }

    #[test]
    fn time_must_increase_downwards() {
        let err = RoiCalibration::new(
            ControlPoint::new(10, 20, 1, 500.0),
            ControlPoint::new(10, 120, 51, 500.0),
            ControlPoint::new(210, 20, 1, 100.0),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Calibration);
    }

    #[test]
    fn crop_returns_inclusive_rectangle() {
        let image = Array2::from_shape_fn((300, 200), |(r, c)| r * 1000 + c);
        let roi = calibration();
        let cropped = roi.crop(image.view()).unwrap();
        assert_eq!(cropped.dim(), (201, 101));
        assert_eq!(cropped[[0, 0]], 10 * 1000 + 20);
        assert_eq!(cropped[[200, 100]], 210 * 1000 + 120);
    }

    #[test]
    fn crop_outside_image_fails() {
        let image = Array2::<u8>::zeros((100, 100));
        assert!(calibration().crop(image.view()).is_err());
    }
}

use anyhow::Context;
use image::{GrayImage, ImageFormat};
use ndarray::ArrayView2;
use segycore::telemetry::{Diagnostic, DiagnosticsSink};
use std::fs;
use std::path::{Path, PathBuf};

/// Boolean mask as a black-on-white picture (ink is black).
pub fn mask_to_gray(mask: ArrayView2<bool>) -> Option<GrayImage> {
    let (rows, cols) = mask.dim();
    let bytes: Vec<u8> = mask.iter().map(|&ink| if ink { 0 } else { 255 }).collect();
    GrayImage::from_raw(cols as u32, rows as u32, bytes)
}

/// Matrix stretched to the full grey range.
pub fn matrix_to_gray(matrix: ArrayView2<f32>) -> Option<GrayImage> {
    let (rows, cols) = matrix.dim();
    let finite = || matrix.iter().copied().filter(|v| v.is_finite());
    let min = finite().fold(f32::INFINITY, f32::min);
    let max = finite().fold(f32::NEG_INFINITY, f32::max);
    let range = (max - min).max(1e-10);
    let bytes: Vec<u8> = matrix
        .iter()
        .map(|&v| {
            if v.is_finite() {
                (((v - min) / range) * 255.0) as u8
            } else {
                0
            }
        })
        .collect();
    GrayImage::from_raw(cols as u32, rows as u32, bytes)
}

/// Writes every diagnostic into one directory, named after the artifact.
///
/// Masks and matrices become PNG files, column lists and series become text
/// with one value per line. Failures are logged and never abort the run.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn create<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating diagnostics directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn store(&self, name: &str, artifact: Diagnostic<'_>) -> anyhow::Result<PathBuf> {
        match artifact {
            Diagnostic::Mask(mask) => self.save_png(name, mask_to_gray(mask)),
            Diagnostic::Matrix(matrix) => self.save_png(name, matrix_to_gray(matrix)),
            Diagnostic::Columns(columns) => {
                self.save_text(name, columns.iter().map(|c| c.to_string()))
            }
            Diagnostic::Series(series) => self.save_text(name, series.iter().map(|v| v.to_string())),
        }
    }

    fn save_png(&self, name: &str, picture: Option<GrayImage>) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(format!("{name}.png"));
        let picture = picture.with_context(|| format!("{name} has no pixel buffer"))?;
        picture
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    fn save_text(
        &self,
        name: &str,
        values: impl Iterator<Item = String>,
    ) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(format!("{name}.txt"));
        let mut text: String = values.collect::<Vec<_>>().join("\n");
        text.push('\n');
        fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

impl DiagnosticsSink for DirectorySink {
    fn emit(&mut self, name: &str, artifact: Diagnostic<'_>) {
        match self.store(name, artifact) {
            Ok(path) => log::debug!("diagnostic {} -> {}", name, path.display()),
            Err(err) => log::warn!("skipping diagnostic {}: {:#}", name, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    #[test]
    fn mask_is_drawn_black_on_white() {
        let picture = mask_to_gray(arr2(&[[true, false, false]]).view()).unwrap();
        assert_eq!((picture.width(), picture.height()), (3, 1));
        assert_eq!(picture.get_pixel(0, 0).0, [0]);
        assert_eq!(picture.get_pixel(1, 0).0, [255]);
    }

    #[test]
    fn matrix_is_stretched_and_nan_is_black() {
        let picture = matrix_to_gray(arr2(&[[-1.0f32, 1.0], [f32::NAN, 0.0]]).view()).unwrap();
        assert_eq!(picture.get_pixel(0, 0).0, [0]);
        assert_eq!(picture.get_pixel(1, 0).0, [255]);
        assert_eq!(picture.get_pixel(0, 1).0, [0]);
        assert_eq!(picture.get_pixel(1, 1).0, [127]);
    }

    #[test]
    fn directory_sink_writes_png_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::create(dir.path().join("diag")).unwrap();
        let mask = Array2::from_elem((4, 5), true);
        sink.emit("timelines.mask", Diagnostic::Mask(mask.view()));
        sink.emit("baselines.final", Diagnostic::Columns(&[3, 9, 15]));

        let png = dir.path().join("diag/timelines.mask.png");
        let decoded = image::open(&png).unwrap().into_luma8();
        assert_eq!((decoded.width(), decoded.height()), (5, 4));
        let text = fs::read_to_string(dir.path().join("diag/baselines.final.txt")).unwrap();
        assert_eq!(text, "3\n9\n15\n");
    }

    #[test]
    fn write_failures_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("gone");
        let mut sink = DirectorySink::create(&target).unwrap();
        fs::remove_dir(&target).unwrap();
        sink.emit("conditioner.spectrum", Diagnostic::Series(&[0.5, 1.0]));
        assert!(!target.exists());
    }
}

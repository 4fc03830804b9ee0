use ndarray::{Array2, ArrayView2, Zip};

use crate::interface::ProcessingParameters;
use crate::prelude::{DigitizeError, DigitizeResult, ProcessingStage, RunContext};
use crate::telemetry::diagnostics::names;
use crate::telemetry::{Diagnostic, LogManager, Step};

/// Grey level below which a scanned pixel counts as ink.
pub const DEFAULT_INK_THRESHOLD: u8 = 128;

/// Cleaned image and the pixels classified as timeline.
#[derive(Debug, Clone)]
pub struct TimelineRemoval {
    pub cleaned: Array2<bool>,
    pub mask: Array2<bool>,
}

impl TimelineRemoval {
    pub fn removed_pixels(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// Turns a greyscale scan into an ink map (dark pixels are ink).
pub fn binarize(gray: ArrayView2<u8>, threshold: u8) -> Array2<bool> {
    gray.mapv(|value| value < threshold)
}

/// Removes horizontal grid lines while keeping vertical trace strokes.
///
/// Rows are eroded by `erosion` pixels from the left and from the right
/// independently; only pixels surviving both passes belong to a run longer
/// than `2 * erosion`. Those runs are restored to full length, then grown
/// vertically through ink up to `thickness` rows to form the mask.
pub fn remove_timelines(
    image: ArrayView2<bool>,
    erosion: usize,
    thickness: usize,
) -> TimelineRemoval {
    let left = erode_from_left(image, erosion);
    let right = erode_from_right(image, erosion);
    let core = &left & &right;
    let candidates = restore_runs(image, &core);
    let mask = grow_vertically(image, &candidates, thickness);

    let mut cleaned = image.to_owned();
    Zip::from(&mut cleaned).and(&mask).for_each(|pixel, &masked| {
        if masked {
            *pixel = false;
        }
    });

    TimelineRemoval { cleaned, mask }
}

fn erode_from_left(image: ArrayView2<bool>, erosion: usize) -> Array2<bool> {
    let mut out = Array2::from_elem(image.dim(), false);
    for (row, mut out_row) in image.outer_iter().zip(out.outer_iter_mut()) {
        let mut run = 0usize;
        for (col, &ink) in row.iter().enumerate() {
            run = if ink { run + 1 } else { 0 };
            out_row[col] = ink && run > erosion;
        }
    }
    out
}

fn erode_from_right(image: ArrayView2<bool>, erosion: usize) -> Array2<bool> {
    let mut out = Array2::from_elem(image.dim(), false);
    for (row, mut out_row) in image.outer_iter().zip(out.outer_iter_mut()) {
        let mut run = 0usize;
        for col in (0..row.len()).rev() {
            let ink = row[col];
            run = if ink { run + 1 } else { 0 };
            out_row[col] = ink && run > erosion;
        }
    }
    out
}

/// Marks every ink run that contains at least one surviving pixel.
fn restore_runs(image: ArrayView2<bool>, core: &Array2<bool>) -> Array2<bool> {
    let mut out = Array2::from_elem(image.dim(), false);
    let cols = image.ncols();
    for ((row, core_row), mut out_row) in image
        .outer_iter()
        .zip(core.outer_iter())
        .zip(out.outer_iter_mut())
    {
        let mut col = 0;
        while col < cols {
            if !row[col] {
                col += 1;
                continue;
            }
            let start = col;
            while col < cols && row[col] {
                col += 1;
            }
            if (start..col).any(|c| core_row[c]) {
                for c in start..col {
                    out_row[c] = true;
                }
            }
        }
    }
    out
}

/// Builds the timeline mask column by column from the candidate runs.
///
/// Candidate runs thinner than `thickness` grow through adjacent ink, one row
/// up then one row down, until they reach `thickness`. Runs at least
/// `thickness` rows tall are masked whole, so a second pass finds nothing.
fn grow_vertically(
    image: ArrayView2<bool>,
    candidates: &Array2<bool>,
    thickness: usize,
) -> Array2<bool> {
    let (rows, cols) = image.dim();
    let mut mask = Array2::from_elem(image.dim(), false);
    for col in 0..cols {
        let mut row = 0;
        while row < rows {
            if !candidates[[row, col]] {
                row += 1;
                continue;
            }
            let start = row;
            while row < rows && candidates[[row, col]] {
                row += 1;
            }
            let (mut top, mut bottom) = (start, row);
            let length = bottom - top;
            if length < thickness {
                let mut budget = thickness - length;
                while budget > 0 {
                    let mut grew = false;
                    if top > 0 && image[[top - 1, col]] && !candidates[[top - 1, col]] {
                        top -= 1;
                        budget -= 1;
                        grew = true;
                    }
                    if budget > 0
                        && bottom < rows
                        && image[[bottom, col]]
                        && !candidates[[bottom, col]]
                    {
                        bottom += 1;
                        budget -= 1;
                        grew = true;
                    }
                    if !grew {
                        break;
                    }
                }
            }
            for r in top..bottom {
                mask[[r, col]] = true;
            }
        }
    }
    mask
}

/// Timeline-removal stage: binary ROI in, cleaned image and mask out.
pub struct TimelineStage {
    erosion: usize,
    thickness: usize,
    logger: LogManager,
}

impl TimelineStage {
    pub fn new() -> Self {
        Self {
            erosion: 0,
            thickness: 0,
            logger: LogManager::new("timelines"),
        }
    }
}

impl Default for TimelineStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for TimelineStage {
    type Input = Array2<bool>;
    type Output = TimelineRemoval;

    fn name(&self) -> &'static str {
        "timelines"
    }

    fn initialize(&mut self, params: &ProcessingParameters) -> DigitizeResult<()> {
        self.erosion = params.horizontal_erosion;
        self.thickness = params.timeline_thickness;
        Ok(())
    }

    fn execute(
        &mut self,
        input: Self::Input,
        ctx: &mut RunContext<'_>,
    ) -> DigitizeResult<Self::Output> {
        if self.erosion == 0 || self.thickness == 0 {
            return Err(DigitizeError::ParameterRange {
                name: "HE",
                detail: "timeline stage not initialized".into(),
            });
        }
        ctx.checkpoint()?;
        let rows = input.nrows();
        ctx.reporter.progress(Step::Timelines, 0, rows);

        let removal = remove_timelines(input.view(), self.erosion, self.thickness);

        ctx.reporter.progress(Step::Timelines, rows, rows);
        ctx.diagnostics
            .emit(names::TIMELINE_MASK, Diagnostic::Mask(removal.mask.view()));
        ctx.diagnostics
            .emit(names::CLEANED_IMAGE, Diagnostic::Mask(removal.cleaned.view()));
        self.logger.record(&format!(
            "removed {} timeline pixels (HE {}, HLT {})",
            removal.removed_pixels(),
            self.erosion,
            self.thickness
        ));
        Ok(removal)
    }

    fn cleanup(&mut self) {
        self.erosion = 0;
        self.thickness = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(rows: usize, cols: usize, traces: &[usize], lines: &[(usize, usize)]) -> Array2<bool> {
        let mut image = Array2::from_elem((rows, cols), false);
        for &col in traces {
            image.column_mut(col).fill(true);
        }
        for &(top, height) in lines {
            for row in top..top + height {
                image.row_mut(row).fill(true);
            }
        }
        image
    }

    #[test]
    fn binarize_marks_dark_pixels_as_ink() {
        let gray = ndarray::arr2(&[[0u8, 127, 128, 255]]);
        let ink = binarize(gray.view(), DEFAULT_INK_THRESHOLD);
        assert_eq!(ink, ndarray::arr2(&[[true, true, false, false]]));
    }

    #[test]
    fn horizontal_lines_are_removed_and_traces_kept() {
        let image = section(60, 80, &[10, 40, 70], &[(20, 3), (45, 3)]);
        let removal = remove_timelines(image.view(), 10, 3);

        for row in [20, 21, 22, 45, 46, 47] {
            assert!(removal.cleaned.row(row).iter().all(|&ink| !ink), "row {row}");
            assert!(removal.mask.row(row).iter().all(|&m| m), "row {row}");
        }
        for col in [10, 40, 70] {
            let kept = removal.cleaned.column(col).iter().filter(|&&ink| ink).count();
            assert_eq!(kept, 60 - 6);
        }
        assert_eq!(removal.removed_pixels(), 6 * 80);
    }

    #[test]
    fn short_runs_survive_erosion() {
        let mut image = Array2::from_elem((5, 50), false);
        for col in 5..25 {
            image[[2, col]] = true;
        }
        // run of 20 does not exceed 2 * 10
        let removal = remove_timelines(image.view(), 10, 2);
        assert_eq!(removal.removed_pixels(), 0);

        image[[2, 25]] = true;
        let removal = remove_timelines(image.view(), 10, 2);
        assert_eq!(removal.removed_pixels(), 21);
    }

    #[test]
    fn thin_line_grows_through_adjacent_ink_up_to_thickness() {
        let mut image = section(20, 60, &[], &[(10, 1)]);
        // stroke crossing the line
        for row in 5..15 {
            image[[row, 30]] = true;
        }
        let removal = remove_timelines(image.view(), 5, 3);
        assert!(removal.mask[[9, 30]]);
        assert!(removal.mask[[11, 30]]);
        assert!(!removal.mask[[8, 30]]);
        assert!(!removal.mask[[12, 30]]);
        assert!(removal.cleaned[[8, 30]]);
    }

    #[test]
    fn second_pass_removes_nothing() {
        let image = section(100, 120, &[15, 55, 95], &[(30, 4), (70, 3)]);
        let first = remove_timelines(image.view(), 20, 4);
        let second = remove_timelines(first.cleaned.view(), 20, 4);
        assert_eq!(second.removed_pixels(), 0);
        assert_eq!(second.cleaned, first.cleaned);
    }

    #[test]
    fn thick_line_is_removed_in_one_pass() {
        let mut image = section(30, 60, &[], &[(10, 6)]);
        for row in 0..30 {
            image[[row, 20]] = true;
        }
        let first = remove_timelines(image.view(), 5, 2);
        assert_eq!(first.removed_pixels(), 6 * 60);
        assert!((10..16).all(|row| first.mask[[row, 0]]));
        assert!(first.cleaned[[9, 20]] && first.cleaned[[16, 20]]);

        let second = remove_timelines(first.cleaned.view(), 5, 2);
        assert_eq!(second.removed_pixels(), 0);
    }
}

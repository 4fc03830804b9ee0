use serde::{Deserialize, Serialize};

use crate::interface::{CdpDirection, GeometryTable};
use crate::prelude::{DigitizeError, DigitizeResult};

/// CDP number and projected position of one baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceCoordinate {
    pub cdp: i64,
    pub x: f64,
    pub y: f64,
}

/// How baselines are numbered before looking up positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateOptions {
    pub direction: CdpDirection,
    /// CDP of the leftmost baseline; defaults to the table edge matching `direction`.
    #[serde(default)]
    pub start_cdp: Option<i64>,
}

/// CDP numbers counted from the leftmost baseline, one step per baseline.
pub fn number_baselines(count: usize, start: i64, direction: CdpDirection) -> Vec<i64> {
    let step = match direction {
        CdpDirection::Increasing => 1,
        CdpDirection::Decreasing => -1,
    };
    (0..count as i64).map(|k| start + step * k).collect()
}

/// Assigns a CDP and an interpolated X/Y to every baseline, left to right.
pub fn assign_coordinates(
    table: &GeometryTable,
    baselines: &[usize],
    options: CoordinateOptions,
) -> DigitizeResult<Vec<TraceCoordinate>> {
    if table.rows().len() < 2 {
        return Err(DigitizeError::Geometry(format!(
            "need at least 2 control rows, found {}",
            table.rows().len()
        )));
    }
    let start = options.start_cdp.unwrap_or(match options.direction {
        CdpDirection::Increasing => table.min_cdp(),
        CdpDirection::Decreasing => table.max_cdp(),
    });
    Ok(number_baselines(baselines.len(), start, options.direction)
        .into_iter()
        .map(|cdp| {
            let (x, y) = table.locate(cdp);
            TraceCoordinate { cdp, x, y }
        })
        .collect())
}

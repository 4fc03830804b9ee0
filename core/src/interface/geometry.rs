use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::prelude::{DigitizeError, DigitizeResult};

/// Surveyed position of one CDP in a projected coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryRow {
    pub cdp: i64,
    pub x: f64,
    pub y: f64,
}

/// Sparse CDP → (X, Y) table, sorted by CDP with no duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryTable {
    rows: Vec<GeometryRow>,
}

impl GeometryTable {
    pub fn new(mut rows: Vec<GeometryRow>) -> DigitizeResult<Self> {
        if rows.len() < 2 {
            return Err(DigitizeError::Geometry(format!(
                "need at least 2 control rows, found {}",
                rows.len()
            )));
        }
        if let Some(row) = rows.iter().find(|row| !(row.x.is_finite() && row.y.is_finite())) {
            return Err(DigitizeError::Geometry(format!(
                "CDP {} has a non-finite coordinate",
                row.cdp
            )));
        }
        rows.sort_by_key(|row| row.cdp);
        if let Some(pair) = rows.windows(2).find(|pair| pair[0].cdp == pair[1].cdp) {
            return Err(DigitizeError::Geometry(format!(
                "CDP {} listed more than once",
                pair[0].cdp
            )));
        }
        Ok(Self { rows })
    }

    /// Parses the whitespace-delimited `CDP X Y` text format.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn parse(text: &str) -> DigitizeResult<Self> {
        let mut rows = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return Err(DigitizeError::Geometry(format!(
                    "line {}: expected `CDP X Y`, found {:?}",
                    index + 1,
                    line
                )));
            }
            let malformed = |what: &str| {
                DigitizeError::Geometry(format!("line {}: malformed {}", index + 1, what))
            };
            rows.push(GeometryRow {
                cdp: fields[0].parse().map_err(|_| malformed("CDP"))?,
                x: fields[1].parse().map_err(|_| malformed("X"))?,
                y: fields[2].parse().map_err(|_| malformed("Y"))?,
            });
        }
        Self::new(rows)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> DigitizeResult<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            DigitizeError::Geometry(format!("reading {}: {}", path_ref.display(), err))
        })?;
        Self::parse(&contents)
    }

    pub fn rows(&self) -> &[GeometryRow] {
        &self.rows
    }

    pub fn min_cdp(&self) -> i64 {
        self.rows[0].cdp
    }

    pub fn max_cdp(&self) -> i64 {
        self.rows[self.rows.len() - 1].cdp
    }

    /// Piecewise-linear position of `cdp`, extrapolated from the edge segments.
    pub fn locate(&self, cdp: i64) -> (f64, f64) {
        let upper = self
            .rows
            .partition_point(|row| row.cdp < cdp)
            .clamp(1, self.rows.len() - 1);
        let a = &self.rows[upper - 1];
        let b = &self.rows[upper];
        let t = (cdp - a.cdp) as f64 / (b.cdp - a.cdp) as f64;
        (a.x + t * (b.x - a.x), a.y + t * (b.y - a.y))
    }
}

/// Whether CDP numbers grow or shrink from the leftmost trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdpDirection {
    #[default]
    Increasing,
    Decreasing,
}

impl FromStr for CdpDirection {
    type Err = DigitizeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "increasing" | "inc" | "up" => Ok(CdpDirection::Increasing),
            "decreasing" | "dec" | "down" => Ok(CdpDirection::Decreasing),
            other => Err(DigitizeError::Geometry(format!(
                "unknown CDP direction {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::ErrorKind;

    #[test]
    fn parse_sorts_rows_and_skips_comments() {
        let table = GeometryTable::parse(
            "# cdp x y\n\n120 500100.0 4500080.0\n100 500000 4500000\n110\t500050\t4500040\n",
        )
        .unwrap();
        let cdps: Vec<i64> = table.rows().iter().map(|row| row.cdp).collect();
        assert_eq!(cdps, vec![100, 110, 120]);
        assert_eq!(table.min_cdp(), 100);
        assert_eq!(table.max_cdp(), 120);
    }

    #[test]
    fn single_row_table_is_rejected() {
        let err = GeometryTable::parse("100 1 2\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Geometry);
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let err = GeometryTable::parse("100 1 2\n101 abc 3\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn duplicate_cdp_is_rejected() {
        assert!(GeometryTable::parse("100 1 2\n100 3 4\n").is_err());
    }

    #[test]
    fn locate_interpolates_and_extrapolates() {
        let table = GeometryTable::parse("100 0 0\n110 100 50\n").unwrap();
        assert_eq!(table.locate(105), (50.0, 25.0));
        assert_eq!(table.locate(120), (200.0, 100.0));
        assert_eq!(table.locate(90), (-100.0, -50.0));
    }

    #[test]
    fn direction_parses_from_text() {
        assert_eq!(
            "Decreasing".parse::<CdpDirection>().unwrap(),
            CdpDirection::Decreasing
        );
        assert!("sideways".parse::<CdpDirection>().is_err());
    }
}

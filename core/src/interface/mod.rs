pub mod calibration;
pub mod geometry;
pub mod parameters;

pub use calibration::{ControlPoint, RoiCalibration};
pub use geometry::{CdpDirection, GeometryRow, GeometryTable};
pub use parameters::{BandpassCorners, ProcessingParameters};

pub mod coordinates;
pub mod segy;

pub use coordinates::{assign_coordinates, CoordinateOptions, TraceCoordinate};
pub use segy::{inspect_segy, write_segy, SegyHeader, SegyInspection};

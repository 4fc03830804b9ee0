//! Core image-to-waveform reconstruction for scanned seismic sections.
//!
//! A binarized scan is cropped to its calibrated rectangle, stripped of
//! timelines, split into traces along detected baselines, turned into
//! amplitude series and written out as SEG-Y with interpolated coordinates.

pub mod interface;
pub mod math;
pub mod output;
pub mod pipeline;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use pipeline::{DigitizedSection, Digitizer, RunRequest, RunSummary};
pub use prelude::{DigitizeError, DigitizeResult, ErrorKind, ProcessingStage};

pub mod fft;
pub mod interp;
pub mod stats;

pub use fft::FftHelper;
pub use interp::{Akima, CubicSpline};
pub use stats::StatsHelper;

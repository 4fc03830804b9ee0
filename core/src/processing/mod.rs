pub mod amplitude;
pub mod baselines;
pub mod conditioner;
pub mod timelines;

pub use amplitude::{AmplitudeStage, ProcessedAmplitude};
pub use baselines::{Baseline, BaselineOutput, BaselineSet, BaselineStage};
pub use conditioner::{ConditionedSection, ConditionerInput, ConditionerStage, Spectrum};
pub use timelines::{TimelineRemoval, TimelineStage};

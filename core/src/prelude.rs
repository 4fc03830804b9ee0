use std::path::PathBuf;

use crate::interface::ProcessingParameters;
use crate::telemetry::{DiagnosticsSink, ProgressReporter, RunMetrics};

/// Broad category of a [`DigitizeError`], for callers that branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Calibration,
    ParameterRange,
    Detection,
    Interpolation,
    Geometry,
    Write,
    Cancelled,
}

/// Common error type for the digitization pipeline.
#[derive(thiserror::Error, Debug)]
pub enum DigitizeError {
    #[error("calibration error: {0}")]
    Calibration(String),
    #[error("parameter {name} out of range: {detail}")]
    ParameterRange { name: &'static str, detail: String },
    #[error("detection failure: {0}")]
    Detection(String),
    #[error("trace {trace} could not be interpolated")]
    Interpolation { trace: usize },
    #[error("geometry error: {0}")]
    Geometry(String),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("run cancelled")]
    Cancelled,
}

impl DigitizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DigitizeError::Calibration(_) => ErrorKind::Calibration,
            DigitizeError::ParameterRange { .. } => ErrorKind::ParameterRange,
            DigitizeError::Detection(_) => ErrorKind::Detection,
            DigitizeError::Interpolation { .. } => ErrorKind::Interpolation,
            DigitizeError::Geometry(_) => ErrorKind::Geometry,
            DigitizeError::Write { .. } => ErrorKind::Write,
            DigitizeError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DigitizeError::Write {
            path: path.into(),
            source,
        }
    }
}

pub type DigitizeResult<T> = Result<T, DigitizeError>;

/// Borrowed collaborators a stage may report through while it runs.
pub struct RunContext<'a> {
    pub reporter: &'a dyn ProgressReporter,
    pub diagnostics: &'a mut dyn DiagnosticsSink,
    pub metrics: &'a RunMetrics,
}

impl RunContext<'_> {
    /// Fails with [`DigitizeError::Cancelled`] once the reporter asks for it.
    pub fn checkpoint(&self) -> DigitizeResult<()> {
        if self.reporter.is_cancelled() {
            Err(DigitizeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trait describing the pipeline's processing stages.
///
/// Stages are configured once per run from validated parameters, consume the
/// previous stage's output by value and hand ownership of their result on.
pub trait ProcessingStage {
    type Input;
    type Output;

    fn name(&self) -> &'static str;
    fn initialize(&mut self, params: &ProcessingParameters) -> DigitizeResult<()>;
    fn execute(
        &mut self,
        input: Self::Input,
        ctx: &mut RunContext<'_>,
    ) -> DigitizeResult<Self::Output>;
    fn cleanup(&mut self);
}

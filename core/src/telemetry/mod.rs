pub mod diagnostics;
pub mod log;
pub mod metrics;
pub mod reporter;

pub use diagnostics::{Diagnostic, DiagnosticsSink, MemorySink, NullSink, OwnedDiagnostic};
pub use log::LogManager;
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use reporter::{CancelFlag, NullReporter, ProgressReporter, Step};

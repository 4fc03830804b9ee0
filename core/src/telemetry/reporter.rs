use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline step a progress update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Timelines,
    Baselines,
    Amplitude,
    Conditioning,
    Writing,
}

/// Receives coarse progress and answers cancellation polls.
///
/// The pipeline calls [`ProgressReporter::is_cancelled`] at every trace
/// boundary; individual traces are never interrupted.
pub trait ProgressReporter {
    fn progress(&self, step: Step, done: usize, total: usize);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Reporter that ignores progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn progress(&self, _step: Step, _done: usize, _total: usize) {}
}

/// Shared cancellation flag, cheap to clone into a signal handler.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl ProgressReporter for CancelFlag {
    fn progress(&self, _step: Step, _done: usize, _total: usize) {}

    fn is_cancelled(&self) -> bool {
        self.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }
}

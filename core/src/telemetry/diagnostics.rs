use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2};

/// Stable names under which stages publish their intermediate arrays.
pub mod names {
    pub const TIMELINE_MASK: &str = "timelines.mask";
    pub const CLEANED_IMAGE: &str = "timelines.cleaned";
    pub const TRANSITIONS: &str = "baselines.transitions";
    pub const RAW_BASELINES: &str = "baselines.raw";
    pub const FILTERED_BASELINES: &str = "baselines.filtered";
    pub const FINAL_BASELINES: &str = "baselines.final";
    pub const RAW_AMPLITUDE: &str = "amplitude.raw";
    pub const PROCESSED_AMPLITUDE: &str = "amplitude.processed";
    pub const RESAMPLED: &str = "conditioner.resampled";
    pub const FILTERED: &str = "conditioner.filtered";
    pub const SPECTRUM: &str = "conditioner.spectrum";
}

/// Borrowed view of a diagnostic artifact.
#[derive(Debug, Clone, Copy)]
pub enum Diagnostic<'a> {
    Mask(ArrayView2<'a, bool>),
    Matrix(ArrayView2<'a, f32>),
    Columns(&'a [usize]),
    Series(&'a [f32]),
}

/// Owned copy of a diagnostic artifact, as kept by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedDiagnostic {
    Mask(Array2<bool>),
    Matrix(Array2<f32>),
    Columns(Vec<usize>),
    Series(Vec<f32>),
}

impl From<Diagnostic<'_>> for OwnedDiagnostic {
    fn from(value: Diagnostic<'_>) -> Self {
        match value {
            Diagnostic::Mask(view) => OwnedDiagnostic::Mask(view.to_owned()),
            Diagnostic::Matrix(view) => OwnedDiagnostic::Matrix(view.to_owned()),
            Diagnostic::Columns(columns) => OwnedDiagnostic::Columns(columns.to_vec()),
            Diagnostic::Series(series) => OwnedDiagnostic::Series(series.to_vec()),
        }
    }
}

/// Destination for per-stage artifacts used in visual review.
///
/// The core only emits; rendering or persisting them is up to the caller.
pub trait DiagnosticsSink {
    fn emit(&mut self, name: &str, artifact: Diagnostic<'_>);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn emit(&mut self, _name: &str, _artifact: Diagnostic<'_>) {}
}

/// Sink that keeps owned copies keyed by name.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    artifacts: BTreeMap<String, OwnedDiagnostic>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&OwnedDiagnostic> {
        self.artifacts.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&mut self, name: &str, artifact: Diagnostic<'_>) {
        self.artifacts.insert(name.to_string(), artifact.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_replaces_artifacts_by_name() {
        let mut sink = MemorySink::new();
        sink.emit(names::RAW_BASELINES, Diagnostic::Columns(&[1, 2]));
        sink.emit(names::RAW_BASELINES, Diagnostic::Columns(&[4]));
        assert_eq!(sink.len(), 1);
        assert_eq!(
            sink.get(names::RAW_BASELINES),
            Some(&OwnedDiagnostic::Columns(vec![4]))
        );
    }
}

//! Diagnosis producer port.

use crate::domain::models::{DiagnosisReport, ErrorRecord};

/// Pure, CPU-bound error analysis. Never performs network calls; the
/// pipeline always runs it on a worker thread.
pub trait Diagnoser: Send + Sync + 'static {
    fn diagnose(&self, prompt: &str, errors: &[ErrorRecord], total_count: usize) -> DiagnosisReport;
}

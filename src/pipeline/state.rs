//! Per-process triage state: the dedup set and the counters.

use std::collections::HashSet;

use crate::channels::MessageFingerprint;
use crate::pipeline::metrics::{MetricsSnapshot, ProcessingMetrics};

/// Single-owner state threaded through the poll loop by `&mut`.
///
/// Lives for the process only; a restart forgets every fingerprint.
#[derive(Debug, Default)]
pub struct TriageState {
    processed: HashSet<MessageFingerprint>,
    pub metrics: ProcessingMetrics,
}

impl TriageState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, fingerprint: &MessageFingerprint) -> bool {
        self.processed.contains(fingerprint)
    }

    /// Returns `false` if the fingerprint was already present.
    pub fn mark_processed(&mut self, fingerprint: MessageFingerprint) -> bool {
        self.processed.insert(fingerprint)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Point-in-time view of the counters, as written to the metrics file.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Forget every fingerprint and zero the counters. Operator action only;
    /// the poll loop never calls this.
    pub fn reset(&mut self) {
        self.processed.clear();
        self.metrics.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_processed_is_idempotent() {
        let mut state = TriageState::new();
        let fp = MessageFingerprint::from_parts("a@example.it", "Pompa", "Mon, 6 Jan 2025");
        assert!(!state.is_processed(&fp));
        assert!(state.mark_processed(fp.clone()));
        assert!(!state.mark_processed(fp.clone()));
        assert!(state.is_processed(&fp));
        assert_eq!(state.processed_count(), 1);
    }

    #[test]
    fn reset_forgets_fingerprints_and_counters() {
        let mut state = TriageState::new();
        let fp = MessageFingerprint::from_parts("a@example.it", "Pompa", "Mon, 6 Jan 2025");
        state.mark_processed(fp.clone());
        state.metrics.record_success();
        state.metrics.record_failure();
        state.metrics.record_low_confidence();

        let before = state.snapshot();
        assert_eq!(before.total_processed, 2);
        assert_eq!(before.success_rate, 50.0);

        state.reset();
        assert!(!state.is_processed(&fp));
        assert_eq!(state.processed_count(), 0);
        let after = state.snapshot();
        assert_eq!(after.total_processed, 0);
        assert_eq!(after.low_confidence, 0);
        assert_eq!(after.success_rate, 0.0);
    }
}

//! Progress counters exposed to pollers.

use serde::{Deserialize, Serialize};

/// Result of processing one candidate record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOutcome {
    Succeeded,
    Skipped,
    Failed,
}

/// Counters for one task run.
///
/// `total_candidates` is `None` until the candidate set has been sized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_candidates: Option<u64>,
    pub attempted: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl ProgressSnapshot {
    /// Fresh counters for a candidate set of known size.
    pub fn with_total(total: u64) -> Self {
        Self {
            total_candidates: Some(total),
            ..Self::default()
        }
    }

    /// Count one processed candidate.
    pub fn record(&mut self, outcome: CandidateOutcome) {
        self.attempted += 1;
        match outcome {
            CandidateOutcome::Succeeded => self.succeeded += 1,
            CandidateOutcome::Skipped => self.skipped += 1,
            CandidateOutcome::Failed => self.failed += 1,
        }
    }

    /// Whether the counters satisfy the snapshot invariants:
    /// buckets sum to `attempted`, and `attempted` never exceeds the total.
    pub fn is_consistent(&self) -> bool {
        let buckets = self.succeeded + self.skipped + self.failed;
        let within_total = self.total_candidates.map_or(self.attempted == 0, |t| self.attempted <= t);
        buckets == self.attempted && within_total
    }

    /// Whether every sized candidate has been attempted.
    pub fn is_complete(&self) -> bool {
        self.total_candidates == Some(self.attempted)
    }

    /// Whether `next` can follow `self` (same total, no counter goes backwards).
    pub fn can_advance_to(&self, next: &ProgressSnapshot) -> bool {
        self.total_candidates == next.total_candidates
            && next.attempted >= self.attempted
            && next.succeeded >= self.succeeded
            && next.skipped >= self.skipped
            && next.failed >= self.failed
    }
}

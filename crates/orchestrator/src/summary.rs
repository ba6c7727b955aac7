//! Per-batch outcomes and run totals reported at the end of a run.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Succeeded => write!(f, "succeeded"),
            BatchStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How one batch went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub index: usize,
    pub marketplace_id: String,
    pub product_type: String,
    pub records: usize,
    pub status: BatchStatus,
    /// Endpoint calls made for the batch, retries included
    pub attempts: u32,
    /// Endpoint calls needed without any retry (0 if the batch never got that far)
    pub calls: u32,
    pub reason: Option<String>,
}

impl BatchOutcome {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(self.calls)
    }

    pub fn is_failed(&self) -> bool {
        self.status == BatchStatus::Failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub input_rows: usize,
    pub output_rows: usize,
    /// Ordered by batch index
    pub batches: Vec<BatchOutcome>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded_batches(&self) -> usize {
        self.batches.iter().filter(|b| !b.is_failed()).count()
    }

    pub fn failed_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.is_failed()).count()
    }

    pub fn failed_rows(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.is_failed())
            .map(|b| b.records)
            .sum()
    }

    pub fn total_retries(&self) -> u32 {
        self.batches.iter().map(BatchOutcome::retries).sum()
    }

    /// Batches that needed at least one retry
    pub fn retried_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.retries() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, status: BatchStatus, records: usize, attempts: u32) -> BatchOutcome {
        BatchOutcome {
            index,
            marketplace_id: "000000".into(),
            product_type: "PT".into(),
            records,
            status,
            attempts,
            calls: 2,
            reason: None,
        }
    }

    #[test]
    fn test_summary_totals() {
        let summary = RunSummary {
            input_rows: 40,
            output_rows: 40,
            batches: vec![
                outcome(0, BatchStatus::Succeeded, 32, 2),
                outcome(1, BatchStatus::Failed, 8, 5),
            ],
            elapsed: Duration::from_secs(1),
        };

        assert_eq!(summary.succeeded_batches(), 1);
        assert_eq!(summary.failed_batches(), 1);
        assert_eq!(summary.failed_rows(), 8);
        assert_eq!(summary.total_retries(), 3);
        assert_eq!(summary.retried_batches(), 1);
    }
}

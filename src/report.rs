// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured outcomes produced by a run.

use chrono::{DateTime, Local};

/// How a run concluded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunStatus {
    /// Every event was exhausted and no fatal error was stored.
    Completed,
    /// The run terminated early (caller-requested or consumer-requested)
    /// without a fatal error.
    Canceled,
    /// The runner or dispatcher stored a fatal error.
    Failed,
}

/// Per-consumer counters and captured errors, collected at `close()`.
#[derive(Clone, Debug, Default)]
pub struct ConsumerReport {
    pub name: String,
    /// Number of frames handed to this consumer's worker.
    pub submitted: u64,
    /// Number of frames handed to this consumer's `frame()` method, whether
    /// or not that call returned an error (see `errors` for the latter).
    pub processed: u64,
    /// Number of frames dropped before or instead of reaching `frame()`.
    pub dropped: u64,
    /// Ordered, non-fatal errors captured while running this consumer.
    pub errors: Vec<String>,
}

impl ConsumerReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// `submitted = processed + dropped`, the invariant every surviving
    /// consumer satisfies once its worker has been joined.
    pub fn is_balanced(&self) -> bool {
        self.submitted == self.processed + self.dropped
    }
}

/// The structured outcome of exactly one run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub consumer_reports: Vec<ConsumerReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_report_accounts_for_every_submitted_frame() {
        let report = ConsumerReport {
            name: "writer".to_string(),
            submitted: 10,
            processed: 7,
            dropped: 3,
            errors: vec![],
        };
        assert!(report.is_balanced());
    }

    #[test]
    fn unbalanced_report_is_detected() {
        let report = ConsumerReport {
            name: "writer".to_string(),
            submitted: 10,
            processed: 7,
            dropped: 2,
            errors: vec![],
        };
        assert!(!report.is_balanced());
    }
}

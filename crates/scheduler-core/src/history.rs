//! Bounded per-job run history (spec §4.I Introspection: "last N history entries").

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failed,
    Cancelled,
}

/// One completed attempt at running a job, kept for the administration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: JobOutcome,
    pub error: Option<String>,
}

/// A bounded ring of a job's most recent runs, same shape as the supervisor's crash
/// history: push-and-evict, read as a plain `Vec` for reporting.
#[derive(Debug, Clone, Default)]
pub struct JobHistory {
    entries: VecDeque<JobRun>,
    capacity: usize,
}

impl JobHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, run: JobRun) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(run);
    }

    pub fn recent(&self) -> Vec<JobRun> {
        self.entries.iter().cloned().collect()
    }

    /// The most recent run's outcome, if any — used by dependency eligibility to check
    /// "whose most recent run failed" (spec §4.I Priorities and dependencies).
    pub fn last_outcome(&self) -> Option<JobOutcome> {
        self.entries.back().map(|r| r.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(outcome: JobOutcome) -> JobRun {
        let now = Utc::now();
        JobRun {
            attempt: 1,
            started_at: now,
            finished_at: now,
            outcome,
            error: None,
        }
    }

    #[test]
    fn test_history_bounded() {
        let mut history = JobHistory::new(2);
        history.push(run(JobOutcome::Success));
        history.push(run(JobOutcome::Failed));
        history.push(run(JobOutcome::Success));

        assert_eq!(history.recent().len(), 2);
        assert_eq!(history.last_outcome(), Some(JobOutcome::Success));
    }

    #[test]
    fn test_empty_history_has_no_last_outcome() {
        let history = JobHistory::new(5);
        assert_eq!(history.last_outcome(), None);
    }
}

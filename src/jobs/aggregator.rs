//! Job state aggregation.
//!
//! Folds lifecycle events into per-job records and a [`JobSummary`]. The
//! summary is only ever changed together with the record map, so its total
//! always equals the number of live records.

use std::collections::HashMap;

use super::state::{JobDetails, JobRecord, JobState, JobSummary};

/// Default role shown for jobs that never reported one.
pub const DEFAULT_ROLE: &str = "sub-agent";

/// Effect of applying a state to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed (same state again, or removal of an untracked job).
    Unchanged,
    /// The job moved into `to`; `from` is `None` for newly tracked jobs.
    Entered {
        from: Option<JobState>,
        to: JobState,
    },
    /// The job reported an unknown state and was dropped.
    Removed { from: JobState },
}

impl Transition {
    /// Returns true if counters or records changed.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    /// The terminal state entered by this transition, if any.
    #[must_use]
    pub fn entered_terminal(&self) -> Option<JobState> {
        match self {
            Self::Entered { to, .. } if to.is_terminal() => Some(*to),
            _ => None,
        }
    }
}

/// One job in a full status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub job_id: String,
    pub state: Option<JobState>,
    pub details: JobDetails,
}

/// State machine over all tracked jobs, keyed by job id.
#[derive(Debug, Default)]
pub struct JobStateAggregator {
    records: HashMap<String, JobRecord>,
    summary: JobSummary,
}

impl JobStateAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a new state (or `None` for an unknown state) to a job.
    pub fn apply(
        &mut self,
        job_id: &str,
        new_state: Option<JobState>,
        details: JobDetails,
    ) -> Transition {
        let transition = match new_state {
            Some(state) => self.enter(job_id, state, details),
            None => self.remove(job_id),
        };
        self.check_invariant();
        transition
    }

    /// Apply a raw status string; strings outside the known states remove the job.
    pub fn apply_status(
        &mut self,
        job_id: &str,
        status: Option<&str>,
        details: JobDetails,
    ) -> Transition {
        let state = status.and_then(|s| s.parse::<JobState>().ok());
        if state.is_none() {
            tracing::debug!(job_id, status = ?status, "Job reported untracked status");
        }
        self.apply(job_id, state, details)
    }

    fn enter(&mut self, job_id: &str, state: JobState, details: JobDetails) -> Transition {
        if let Some(record) = self.records.get_mut(job_id) {
            if record.state == state {
                return Transition::Unchanged;
            }
            let from = record.state;
            self.summary.decrement(from);
            self.summary.increment(state);
            record.state = state;
            if let Some(role) = details.role {
                record.role = role;
            }
            if let Some(command_text) = details.command_text {
                record.command_text = command_text;
            }
            if details.log_path.is_some() {
                record.log_path = details.log_path;
            }
            return Transition::Entered {
                from: Some(from),
                to: state,
            };
        }

        self.summary.increment(state);
        self.records.insert(
            job_id.to_string(),
            JobRecord {
                job_id: job_id.to_string(),
                state,
                role: details.role.unwrap_or_else(|| DEFAULT_ROLE.to_string()),
                command_text: details.command_text.unwrap_or_default(),
                log_path: details.log_path,
            },
        );
        Transition::Entered {
            from: None,
            to: state,
        }
    }

    fn remove(&mut self, job_id: &str) -> Transition {
        match self.records.remove(job_id) {
            Some(record) => {
                self.summary.decrement(record.state);
                Transition::Removed { from: record.state }
            }
            None => Transition::Unchanged,
        }
    }

    /// Forget every job and zero all counters.
    pub fn reset(&mut self) {
        self.records.clear();
        self.summary = JobSummary::default();
    }

    /// Replace all state with a full snapshot, applied in order.
    ///
    /// The result depends only on `entries`, not on prior history.
    pub fn replace_snapshot<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = SnapshotEntry>,
    {
        self.reset();
        for entry in entries {
            self.apply(&entry.job_id, entry.state, entry.details);
        }
        tracing::debug!(jobs = self.records.len(), "Applied job status snapshot");
    }

    /// Current summary.
    #[must_use]
    pub fn summary(&self) -> JobSummary {
        self.summary
    }

    /// Get a job by id.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<&JobRecord> {
        self.records.get(job_id)
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no jobs are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_invariant(&self) {
        debug_assert_eq!(
            self.summary.total(),
            self.records.len() as u64,
            "job summary out of sync with records"
        );
    }
}

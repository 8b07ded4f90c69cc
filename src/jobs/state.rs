//! Job states, records, and the derived summary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Returns true for `succeeded` and `failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status string outside the four known states.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown job state: {0}")]
pub struct UnknownJobState(pub String);

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

/// Record of a tracked job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: String,
    pub state: JobState,
    pub role: String,
    pub command_text: String,
    pub log_path: Option<String>,
}

/// Descriptive job fields carried alongside a state change.
///
/// `None` fields leave the existing record value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobDetails {
    pub role: Option<String>,
    pub command_text: Option<String>,
    pub log_path: Option<String>,
}

/// Per-state job counts.
///
/// Only the aggregator produces these; the sum always equals the number of
/// live job records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub pending: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl JobSummary {
    /// Total number of tracked jobs.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.succeeded + self.failed
    }

    pub(crate) fn increment(&mut self, state: JobState) {
        *self.slot(state) += 1;
    }

    pub(crate) fn decrement(&mut self, state: JobState) {
        let slot = self.slot(state);
        *slot = slot.saturating_sub(1);
    }

    fn slot(&mut self, state: JobState) -> &mut u64 {
        match state {
            JobState::Pending => &mut self.pending,
            JobState::Running => &mut self.running,
            JobState::Succeeded => &mut self.succeeded,
            JobState::Failed => &mut self.failed,
        }
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} running · {} pending (completed {}, failed {})",
            self.running, self.pending, self.succeeded, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_parse() {
        assert_eq!("pending".parse::<JobState>(), Ok(JobState::Pending));
        assert_eq!("succeeded".parse::<JobState>(), Ok(JobState::Succeeded));
        assert_eq!(
            "cancelled".parse::<JobState>(),
            Err(UnknownJobState("cancelled".to_string()))
        );
        assert!("Running".parse::<JobState>().is_err());
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_summary_decrement_floors_at_zero() {
        let mut summary = JobSummary::default();
        summary.decrement(JobState::Running);
        assert_eq!(summary.running, 0);

        summary.increment(JobState::Running);
        summary.increment(JobState::Pending);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.running, 1);
    }

    #[test]
    fn test_summary_display() {
        let summary = JobSummary {
            pending: 1,
            running: 2,
            succeeded: 3,
            failed: 0,
        };
        assert_eq!(
            summary.to_string(),
            "2 running · 1 pending (completed 3, failed 0)"
        );
    }
}

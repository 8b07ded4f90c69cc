//! Job lifecycle tracking.

mod aggregator;
mod state;

pub use aggregator::{JobStateAggregator, SnapshotEntry, Transition, DEFAULT_ROLE};
pub use state::{JobDetails, JobRecord, JobState, JobSummary, UnknownJobState};

//! Presentation boundary.
//!
//! The dispatcher only talks to a [`NotificationSink`]. Hosts decide how a
//! summary, a log line, or a finished-job notice is shown.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::jobs::{JobState, JobSummary};

/// Notice emitted once when a job enters `succeeded` or `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTerminalNotice {
    /// Human readable outcome, e.g. `[Editor] !polish ch1 failed`.
    pub message: String,
    /// Log file the host may offer to open.
    pub log_path: Option<String>,
    /// True when the host should offer an "open log" action by default.
    pub offer_open_log: bool,
    /// Terminal state the job entered.
    pub state: JobState,
}

/// Receiver of everything the dispatcher wants displayed.
pub trait NotificationSink: Send {
    /// Show the current job summary.
    fn render_summary(&mut self, summary: &JobSummary);

    /// Append a line to the event log view.
    fn append_line(&mut self, line: &str);

    /// Announce a job that just finished.
    fn notify_job_terminal(&mut self, notice: &JobTerminalNotice);

    /// Present candidate log files for the user to pick from.
    fn offer_log_files(&mut self, files: &[String]) {
        for file in files {
            self.append_line(&format!("Log: {file}"));
        }
    }
}

/// Everything a [`MemorySink`] has received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkRecord {
    pub summaries: Vec<JobSummary>,
    pub lines: Vec<String>,
    pub notices: Vec<JobTerminalNotice>,
    pub log_offers: Vec<Vec<String>>,
}

/// Sink that records into shared memory.
///
/// Clones share the same record, so a clone kept by the caller observes what
/// a dispatcher running elsewhere delivered.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    record: Arc<Mutex<SinkRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far.
    #[must_use]
    pub fn snapshot(&self) -> SinkRecord {
        self.lock().clone()
    }

    /// Most recently rendered summary.
    #[must_use]
    pub fn last_summary(&self) -> Option<JobSummary> {
        self.lock().summaries.last().copied()
    }

    fn lock(&self) -> MutexGuard<'_, SinkRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationSink for MemorySink {
    fn render_summary(&mut self, summary: &JobSummary) {
        self.lock().summaries.push(*summary);
    }

    fn append_line(&mut self, line: &str) {
        self.lock().lines.push(line.to_string());
    }

    fn notify_job_terminal(&mut self, notice: &JobTerminalNotice) {
        self.lock().notices.push(notice.clone());
    }

    fn offer_log_files(&mut self, files: &[String]) {
        self.lock().log_offers.push(files.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LinesOnly(Vec<String>);

    impl NotificationSink for LinesOnly {
        fn render_summary(&mut self, _summary: &JobSummary) {}

        fn append_line(&mut self, line: &str) {
            self.0.push(line.to_string());
        }

        fn notify_job_terminal(&mut self, _notice: &JobTerminalNotice) {}
    }

    #[test]
    fn test_default_offer_log_files_appends_lines() {
        let mut sink = LinesOnly(Vec::new());
        sink.offer_log_files(&["/logs/a.md".to_string(), "/logs/b.md".to_string()]);
        assert_eq!(sink.0, vec!["Log: /logs/a.md", "Log: /logs/b.md"]);
    }

    #[test]
    fn test_memory_sink_clones_share_record() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.append_line("hello");
        writer.render_summary(&JobSummary {
            running: 1,
            ..JobSummary::default()
        });

        let record = sink.snapshot();
        assert_eq!(record.lines, vec!["hello"]);
        assert_eq!(sink.last_summary().map(|s| s.running), Some(1));
    }
}

//! Event routing.
//!
//! [`EventDispatcher`] owns the job aggregator and the sink. Every decoded
//! event goes through [`EventDispatcher::dispatch`]: lifecycle and snapshot
//! events update the aggregator, everything else becomes display text.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::NotificationSettings;
use crate::jobs::{JobDetails, JobState, JobStateAggregator, JobSummary, SnapshotEntry};
use crate::sink::{JobTerminalNotice, NotificationSink};
use crate::watcher::{
    ChatCommand, ChatTurn, EventBatch, EventLine, JobUpdate, LifecyclePhase, LogList,
    Payload, SessionStarted, StatusSnapshot, StreamEvent,
};

/// Routes decoded events to the aggregator and the sink.
pub struct EventDispatcher {
    aggregator: JobStateAggregator,
    sink: Box<dyn NotificationSink>,
    settings: Arc<dyn NotificationSettings>,
    summary_tx: Option<watch::Sender<JobSummary>>,
}

impl EventDispatcher {
    /// Create a dispatcher with an empty aggregator.
    #[must_use]
    pub fn new(sink: Box<dyn NotificationSink>, settings: Arc<dyn NotificationSettings>) -> Self {
        Self {
            aggregator: JobStateAggregator::new(),
            sink,
            settings,
            summary_tx: None,
        }
    }

    /// Also publish every rendered summary on `tx`.
    #[must_use]
    pub fn with_summary_channel(mut self, tx: watch::Sender<JobSummary>) -> Self {
        self.summary_tx = Some(tx);
        self
    }

    /// Current job summary.
    #[must_use]
    pub fn summary(&self) -> JobSummary {
        self.aggregator.summary()
    }

    /// The job aggregator.
    #[must_use]
    pub fn aggregator(&self) -> &JobStateAggregator {
        &self.aggregator
    }

    /// Dispatch every line of a batch in order.
    ///
    /// A batch whose reader was disposed after it was queued is dropped.
    pub fn dispatch_batch(&mut self, batch: EventBatch) {
        if batch.is_disposed() {
            tracing::debug!(
                path = %batch.path.display(),
                discarded = batch.lines.len(),
                "Dropping batch from disposed reader"
            );
            return;
        }
        tracing::debug!(
            path = %batch.path.display(),
            events = batch.lines.len(),
            "Dispatching event batch"
        );
        for line in batch.lines {
            self.dispatch_line(line);
        }
    }

    /// Dispatch one parsed line.
    pub fn dispatch_line(&mut self, line: EventLine) {
        tracing::trace!(raw = %line.raw, "Dispatching event");
        self.dispatch(line.event);
    }

    /// Dispatch one event.
    pub fn dispatch(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::SessionStarted(started) => self.on_session_started(started),
            StreamEvent::SessionEnded(_) => self.sink.append_line("=== Session ended ==="),
            StreamEvent::ChatCommand(command) => self.on_chat_command(command),
            StreamEvent::ChatTurn(turn) => self.on_chat_turn(turn),
            StreamEvent::Lifecycle { phase, job } => self.on_lifecycle(phase, &job),
            StreamEvent::Logs(list) => self.on_logs(&list),
            StreamEvent::Status(snapshot) => self.on_status(snapshot),
            StreamEvent::Unrecognized { event, payload } => self.on_unrecognized(&event, &payload),
        }
    }

    fn on_session_started(&mut self, started: SessionStarted) {
        self.sink.append_line("=== Session started ===");
        if let Some(book) = started.book_path.filter(|b| !b.is_empty()) {
            self.sink.append_line(&format!("Workspace: {book}"));
        }
        self.aggregator.reset();
        self.publish_summary();
    }

    fn on_chat_command(&mut self, command: ChatCommand) {
        let input = command.input.unwrap_or_default();
        self.sink.append_line(&format!("> {input}"));
    }

    fn on_chat_turn(&mut self, turn: ChatTurn) {
        let user = turn.user.unwrap_or_default();
        let answer = turn.answer.unwrap_or_default();
        self.sink.append_line(&format!("You: {user}"));
        self.sink.append_line(&format!("Assistant:\n{answer}\n"));
    }

    fn on_lifecycle(&mut self, phase: LifecyclePhase, job: &JobUpdate) {
        let role = job.display_role();
        let command = job.command();
        self.sink
            .append_line(&format!("[{role}] {command} · {}", phase.as_str()));

        let Some(job_id) = job.job_id.as_deref().filter(|id| !id.is_empty()) else {
            tracing::warn!(
                phase = phase.as_str(),
                "Lifecycle event without job_id, not tracked"
            );
            return;
        };

        // An explicit status wins over the event name; unknown statuses untrack the job.
        let details = job_details(job);
        let transition = match job.status.as_deref() {
            Some(status) => self.aggregator.apply_status(job_id, Some(status), details),
            None => self
                .aggregator
                .apply(job_id, Some(phase.implied_state()), details),
        };
        if transition.is_mutation() {
            self.publish_summary();
        }

        if let Some(terminal) = transition.entered_terminal() {
            let outcome = match terminal {
                JobState::Succeeded => "completed successfully",
                _ => "failed",
            };
            let log_path = self
                .aggregator
                .get(job_id)
                .and_then(|record| record.log_path.clone());
            let offer_open_log = log_path.is_some() && self.settings.auto_open_logs();
            self.sink.notify_job_terminal(&JobTerminalNotice {
                message: format!("[{role}] {command} {outcome}"),
                log_path,
                offer_open_log,
                state: terminal,
            });
        }
    }

    fn on_logs(&mut self, list: &LogList) {
        if list.files.is_empty() {
            self.sink
                .append_line("Log list requested but no files were provided.");
        } else {
            self.sink.offer_log_files(&list.files);
        }
    }

    fn on_status(&mut self, snapshot: StatusSnapshot) {
        let entries = snapshot.jobs.iter().filter_map(|job| {
            let job_id = job.job_id.as_deref().filter(|id| !id.is_empty())?;
            let status = job.status.as_deref().filter(|s| !s.is_empty())?;
            Some(SnapshotEntry {
                job_id: job_id.to_string(),
                state: status.parse::<JobState>().ok(),
                details: job_details(job),
            })
        });
        self.aggregator.replace_snapshot(entries);
        self.publish_summary();
    }

    fn on_unrecognized(&mut self, event: &str, payload: &Payload) {
        let body = serde_json::to_string_pretty(payload).unwrap_or_else(|_| format!("{payload:?}"));
        self.sink.append_line(&format!("[event:{event}] {body}"));
    }

    fn publish_summary(&mut self) {
        let summary = self.aggregator.summary();
        self.sink.render_summary(&summary);
        if let Some(tx) = &self.summary_tx {
            tx.send_replace(summary);
        }
    }
}

fn job_details(job: &JobUpdate) -> JobDetails {
    JobDetails {
        role: job.role_name.clone().or_else(|| job.role.clone()),
        command_text: job.command_text.clone(),
        log_path: job.log_path.clone(),
    }
}

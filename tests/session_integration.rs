//! End-to-end tests for a monitor session on the polling backend.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use subagent_monitor::config::FixedSettings;
use subagent_monitor::jobs::{JobState, JobSummary};
use subagent_monitor::session::{MonitorSession, SessionOptions};
use subagent_monitor::sink::MemorySink;
use subagent_monitor::watcher::{DiscoveryPattern, PollSubscriber};

const POLL: Duration = Duration::from_millis(20);

fn event_log(root: &Path, project: &str) -> PathBuf {
    let dir = root.join(project).join(".storycraftr");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("vscode-events.jsonl")
}

fn append(path: &Path, line: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    writeln!(file, "{line}").unwrap();
}

fn lifecycle(phase: &str, job_id: &str) -> String {
    format!(
        r#"{{"event":"sub_agent.{phase}","payload":{{"job_id":"{job_id}","role_name":"Editor","command_text":"!polish","status":"{}","log_path":"/logs/{job_id}.md"}}}}"#,
        if phase == "queued" { "pending" } else { phase }
    )
}

async fn start(root: &Path, process_existing: bool, sink: &MemorySink) -> MonitorSession {
    MonitorSession::start(
        root,
        SessionOptions {
            pattern: DiscoveryPattern::default(),
            process_existing,
        },
        Arc::new(PollSubscriber::new(POLL)),
        Box::new(sink.clone()),
        Arc::new(FixedSettings::default()),
    )
    .await
    .unwrap()
}

/// Run the session until `done` holds for the published summary, or time out.
async fn run_until<F>(session: &mut MonitorSession, done: F) -> bool
where
    F: Fn(&JobSummary) -> bool,
{
    let shutdown = CancellationToken::new();
    let mut summary = session.subscribe_summary();
    let waiter = {
        let shutdown = shutdown.clone();
        async move {
            let reached = tokio::time::timeout(Duration::from_secs(10), summary.wait_for(done))
                .await
                .is_ok_and(|r| r.is_ok());
            shutdown.cancel();
            reached
        }
    };
    let ((), reached) = tokio::join!(session.run(shutdown), waiter);
    reached
}

#[tokio::test]
async fn test_jobs_across_files_are_aggregated() {
    let temp_dir = TempDir::new().unwrap();
    let first = event_log(temp_dir.path(), "book-one");
    let second = event_log(temp_dir.path(), "book-two");
    append(&first, &lifecycle("running", "a"));
    append(&second, &lifecycle("queued", "b"));

    let sink = MemorySink::new();
    let mut session = start(temp_dir.path(), true, &sink).await;
    assert_eq!(session.discovery().attached_paths().len(), 2);

    assert!(run_until(&mut session, |s| s.running == 1 && s.pending == 1).await);

    let dispatcher = session.dispose().await.unwrap();
    assert_eq!(dispatcher.aggregator().len(), 2);
}

#[tokio::test]
async fn test_appended_lines_drive_lifecycle_to_completion() {
    let temp_dir = TempDir::new().unwrap();
    let log = event_log(temp_dir.path(), "book");
    append(&log, &lifecycle("queued", "job-1"));

    let sink = MemorySink::new();
    let mut session = start(temp_dir.path(), true, &sink).await;
    assert!(run_until(&mut session, |s| s.pending == 1).await);

    append(&log, &lifecycle("running", "job-1"));
    append(&log, "{not json");
    append(&log, &lifecycle("succeeded", "job-1"));
    append(&log, &lifecycle("succeeded", "job-1"));
    assert!(run_until(&mut session, |s| s.succeeded == 1).await);

    let dispatcher = session.dispose().await.unwrap();
    assert_eq!(
        dispatcher.summary(),
        JobSummary {
            succeeded: 1,
            ..JobSummary::default()
        }
    );

    let record = sink.snapshot();
    assert_eq!(record.notices.len(), 1);
    assert_eq!(record.notices[0].state, JobState::Succeeded);
    assert_eq!(
        record.notices[0].message,
        "[Editor] !polish completed successfully"
    );
    assert!(record.notices[0].offer_open_log);
}

#[tokio::test]
async fn test_new_log_is_discovered_and_drained() {
    let temp_dir = TempDir::new().unwrap();
    let sink = MemorySink::new();
    let mut session = start(temp_dir.path(), false, &sink).await;
    assert!(session.discovery().attached_paths().is_empty());

    let log = event_log(temp_dir.path(), "late-book");
    append(&log, &lifecycle("running", "late"));

    assert!(run_until(&mut session, |s| s.running == 1).await);
    assert_eq!(session.discovery().attached_paths().len(), 1);
    session.dispose().await.unwrap();
}

#[tokio::test]
async fn test_truncated_log_is_read_from_start() {
    let temp_dir = TempDir::new().unwrap();
    let log = event_log(temp_dir.path(), "book");
    append(&log, &lifecycle("running", "old-1"));
    append(&log, &lifecycle("running", "old-2"));

    let sink = MemorySink::new();
    let mut session = start(temp_dir.path(), true, &sink).await;
    assert!(run_until(&mut session, |s| s.running == 2).await);

    std::fs::write(&log, format!("{}\n", lifecycle("failed", "fresh"))).unwrap();
    assert!(run_until(&mut session, |s| s.failed == 1).await);

    let dispatcher = session.dispose().await.unwrap();
    assert!(dispatcher.aggregator().get("fresh").is_some());
    assert_eq!(dispatcher.summary().running, 2);
}

#[tokio::test]
async fn test_skip_existing_ignores_history() {
    let temp_dir = TempDir::new().unwrap();
    let log = event_log(temp_dir.path(), "book");
    append(&log, &lifecycle("running", "history"));

    let sink = MemorySink::new();
    let mut session = start(temp_dir.path(), false, &sink).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    append(&log, &lifecycle("queued", "new"));
    assert!(run_until(&mut session, |s| s.pending == 1).await);

    let dispatcher = session.dispose().await.unwrap();
    assert!(dispatcher.aggregator().get("history").is_none());
    assert_eq!(dispatcher.summary().running, 0);
}

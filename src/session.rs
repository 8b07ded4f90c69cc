//! Monitor session.
//!
//! A [`MonitorSession`] owns everything with a lifetime: the reader registry,
//! the tree watch that reports new and deleted logs, and the dispatcher task
//! that holds the job aggregate. Creating one starts monitoring; disposing it
//! stops every watch and hands the dispatcher back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DiscoveryConfig, NotificationSettings};
use crate::dispatch::EventDispatcher;
use crate::jobs::JobSummary;
use crate::sink::NotificationSink;
use crate::watcher::{
    DiscoveryPattern, EventBatch, FileDiscovery, FileEvent, FileEventCallback, FileSubscriber,
    Subscription, WatcherError,
};

/// What a session looks for and how it treats existing content.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub pattern: DiscoveryPattern,
    /// Replay logs already present at startup instead of seeding their cursors.
    pub process_existing: bool,
}

impl SessionOptions {
    /// Build options from the `[discovery]` section.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured glob does not compile.
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, WatcherError> {
        Ok(Self {
            pattern: config.compiled_pattern()?,
            process_existing: config.process_existing,
        })
    }
}

/// A running monitor over one project root.
pub struct MonitorSession {
    discovery: FileDiscovery,
    tree_watch: Option<Box<dyn Subscription>>,
    file_events_tx: mpsc::UnboundedSender<FileEvent>,
    file_events: mpsc::UnboundedReceiver<FileEvent>,
    summary_rx: watch::Receiver<JobSummary>,
    dispatcher_task: JoinHandle<EventDispatcher>,
}

impl MonitorSession {
    /// Start monitoring `root`.
    ///
    /// Logs already under the root are attached before this returns; the
    /// scan for them runs on a blocking thread. If the tree watch cannot be
    /// created, the session still tails the logs found at startup.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::FileAccess`] if `root` cannot be resolved.
    pub async fn start(
        root: &Path,
        options: SessionOptions,
        subscriber: Arc<dyn FileSubscriber>,
        sink: Box<dyn NotificationSink>,
        settings: Arc<dyn NotificationSettings>,
    ) -> Result<Self, WatcherError> {
        let root: PathBuf = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| WatcherError::file_access(root, e))?;

        let (summary_tx, summary_rx) = watch::channel(JobSummary::default());
        let dispatcher = EventDispatcher::new(sink, settings).with_summary_channel(summary_tx);

        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let dispatcher_task = tokio::spawn(run_dispatcher(dispatcher, batch_rx));

        let (file_events_tx, file_events) = mpsc::unbounded_channel();
        let on_event: FileEventCallback = {
            let tx = file_events_tx.clone();
            Arc::new(move |event| {
                let _ = tx.send(event);
            })
        };

        let tree_watch = match subscriber.watch_tree(&root, options.pattern.clone(), on_event) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::warn!(
                    root = %root.display(),
                    error = %e,
                    "Failed to watch project root, new event logs will not be detected"
                );
                None
            }
        };

        let mut discovery = FileDiscovery::new(root, options.pattern, subscriber, batch_tx);
        let attached = discovery.discover(options.process_existing).await;
        tracing::info!(
            root = %discovery.root().display(),
            pattern = discovery.pattern().as_str(),
            attached,
            "Monitor session started"
        );

        Ok(Self {
            discovery,
            tree_watch,
            file_events_tx,
            file_events,
            summary_rx,
            dispatcher_task,
        })
    }

    /// Latest published job summary.
    #[must_use]
    pub fn summary(&self) -> JobSummary {
        *self.summary_rx.borrow()
    }

    /// Receiver that observes every published summary.
    #[must_use]
    pub fn subscribe_summary(&self) -> watch::Receiver<JobSummary> {
        self.summary_rx.clone()
    }

    /// The reader registry.
    #[must_use]
    pub fn discovery(&self) -> &FileDiscovery {
        &self.discovery
    }

    /// Sender for file events from an external source.
    ///
    /// Events sent here are handled by [`MonitorSession::run`] exactly like
    /// those from the tree watch.
    #[must_use]
    pub fn file_event_sender(&self) -> mpsc::UnboundedSender<FileEvent> {
        self.file_events_tx.clone()
    }

    /// Handle one file event immediately.
    pub async fn handle_file_event(&mut self, event: &FileEvent) {
        tracing::trace!(
            kind = ?event.kind,
            path = %event.path.display(),
            "File event"
        );
        self.discovery.on_file_event(event.kind, &event.path).await;
    }

    /// Route file events to the registry until `shutdown` is cancelled.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = self.file_events.recv() => event,
            };
            match event {
                Some(event) => self.handle_file_event(&event).await,
                // The session holds a sender, so this only happens on teardown.
                None => break,
            }
        }
    }

    /// Stop every watch and reader, then wait for the dispatcher to drain.
    ///
    /// Batches still queued from the disposed readers are dropped, not dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::ChannelClosed`] if the dispatcher task panicked.
    pub async fn dispose(self) -> Result<EventDispatcher, WatcherError> {
        let Self {
            mut discovery,
            tree_watch,
            dispatcher_task,
            ..
        } = self;

        if let Some(mut tree_watch) = tree_watch {
            tree_watch.cancel();
        }
        discovery.dispose_all();
        // Dropping the registry releases the last batch sender it holds.
        drop(discovery);

        let dispatcher = dispatcher_task.await.map_err(|e| {
            tracing::error!(error = %e, "Dispatcher task failed");
            WatcherError::ChannelClosed
        })?;
        tracing::info!("Monitor session disposed");
        Ok(dispatcher)
    }
}

async fn run_dispatcher(
    mut dispatcher: EventDispatcher,
    mut batches: mpsc::UnboundedReceiver<EventBatch>,
) -> EventDispatcher {
    while let Some(batch) = batches.recv().await {
        dispatcher.dispatch_batch(batch);
    }
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixedSettings;
    use crate::sink::MemorySink;
    use crate::watcher::{ChangeCallback, FileEventKind};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Subscriber that never fires; file events are injected by the test.
    struct QuietSubscriber;

    struct NoopSubscription;

    impl Subscription for NoopSubscription {
        fn cancel(&mut self) {}
    }

    impl FileSubscriber for QuietSubscriber {
        fn subscribe(
            &self,
            _path: &Path,
            _on_change: ChangeCallback,
        ) -> Result<Box<dyn Subscription>, WatcherError> {
            Ok(Box::new(NoopSubscription))
        }

        fn watch_tree(
            &self,
            _root: &Path,
            _pattern: DiscoveryPattern,
            _on_event: FileEventCallback,
        ) -> Result<Box<dyn Subscription>, WatcherError> {
            Ok(Box::new(NoopSubscription))
        }
    }

    fn write_log(root: &Path, lines: &[&str]) -> PathBuf {
        let dir = root.join(".storycraftr");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vscode-events.jsonl");
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn start(root: &Path, process_existing: bool, sink: &MemorySink) -> MonitorSession {
        MonitorSession::start(
            root,
            SessionOptions {
                pattern: DiscoveryPattern::default(),
                process_existing,
            },
            Arc::new(QuietSubscriber),
            Box::new(sink.clone()),
            Arc::new(FixedSettings::default()),
        )
        .await
        .unwrap()
    }

    async fn wait_for_running(session: &MonitorSession, running: u64) {
        let mut rx = session.subscribe_summary();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.running == running))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_drains_existing_logs() {
        let temp_dir = TempDir::new().unwrap();
        write_log(
            temp_dir.path(),
            &[r#"{"event":"sub_agent.running","payload":{"job_id":"a","status":"running"}}"#],
        );

        let sink = MemorySink::new();
        let session = start(temp_dir.path(), true, &sink).await;
        assert_eq!(session.discovery().attached_paths().len(), 1);

        wait_for_running(&session, 1).await;
        assert_eq!(session.summary().running, 1);

        let dispatcher = session.dispose().await.unwrap();
        assert_eq!(dispatcher.summary().running, 1);
    }

    #[tokio::test]
    async fn test_skip_existing_seeds_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_log(
            temp_dir.path(),
            &[r#"{"event":"sub_agent.running","payload":{"job_id":"a","status":"running"}}"#],
        );

        let sink = MemorySink::new();
        let mut session = start(temp_dir.path(), false, &sink).await;
        // Let the seeding refresh run before appending.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str(
            "{\"event\":\"sub_agent.running\",\"payload\":{\"job_id\":\"b\",\"status\":\"running\"}}\n",
        );
        std::fs::write(&path, content).unwrap();
        session
            .handle_file_event(&FileEvent {
                kind: FileEventKind::Changed,
                path: std::fs::canonicalize(&path).unwrap(),
            })
            .await;

        wait_for_running(&session, 1).await;
        let dispatcher = session.dispose().await.unwrap();
        assert!(dispatcher.aggregator().get("a").is_none());
        assert!(dispatcher.aggregator().get("b").is_some());
    }

    #[tokio::test]
    async fn test_run_routes_injected_file_events() {
        let temp_dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let mut session = start(temp_dir.path(), true, &sink).await;
        assert!(session.discovery().attached_paths().is_empty());

        let root = std::fs::canonicalize(temp_dir.path()).unwrap();
        let path = write_log(
            &root,
            &[r#"{"event":"chat.command","payload":{"input":"!outline"}}"#],
        );
        session
            .file_event_sender()
            .send(FileEvent {
                kind: FileEventKind::Created,
                path: path.clone(),
            })
            .unwrap();

        let shutdown = CancellationToken::new();
        let stopper = {
            let shutdown = shutdown.clone();
            let sink = sink.clone();
            async move {
                for _ in 0..100 {
                    if !sink.snapshot().lines.is_empty() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                shutdown.cancel();
            }
        };
        tokio::join!(session.run(shutdown), stopper);

        assert!(session.discovery().is_attached(&path));
        assert_eq!(sink.snapshot().lines, vec!["> !outline"]);
        session.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_root_is_file_access_error() {
        let result = MonitorSession::start(
            Path::new("/nonexistent/project/root"),
            SessionOptions::default(),
            Arc::new(QuietSubscriber),
            Box::new(MemorySink::new()),
            Arc::new(FixedSettings::default()),
        )
        .await;
        assert!(matches!(result, Err(WatcherError::FileAccess { .. })));
    }
}

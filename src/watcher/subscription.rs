//! File change subscriptions.
//!
//! [`FileSubscriber`] hides how change notifications are produced. The
//! notify backend uses native OS events through `notify-debouncer-full`; the
//! polling backend compares file metadata on a tokio interval. Both hand back
//! a [`Subscription`] that stops delivery when cancelled or dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify_debouncer_full::{
    new_debouncer,
    notify::{self, RecommendedWatcher, RecursiveMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::discovery::{find_matching_files, DiscoveryPattern};
use super::error::WatcherError;

/// Called whenever a watched file may have changed.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Called for every file event under a watched tree.
pub type FileEventCallback = Arc<dyn Fn(FileEvent) + Send + Sync>;

/// What happened to a file under a watched tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Changed,
    Deleted,
}

/// A file event under a watched tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

/// Handle to an active watch.
pub trait Subscription: Send {
    /// Stop delivering notifications. Calling twice is harmless.
    fn cancel(&mut self);
}

/// Source of file change notifications.
pub trait FileSubscriber: Send + Sync {
    /// Invoke `on_change` whenever the file at `path` changes.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::WatchSetup`] if the watch cannot be created.
    fn subscribe(
        &self,
        path: &Path,
        on_change: ChangeCallback,
    ) -> Result<Box<dyn Subscription>, WatcherError>;

    /// Report created, changed, and deleted files under `root` that match `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree watch cannot be created.
    fn watch_tree(
        &self,
        root: &Path,
        pattern: DiscoveryPattern,
        on_event: FileEventCallback,
    ) -> Result<Box<dyn Subscription>, WatcherError>;
}

/// Native notifications through `notify-debouncer-full`.
#[derive(Debug, Clone)]
pub struct NotifySubscriber {
    debounce: Duration,
}

impl NotifySubscriber {
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }
}

impl Default for NotifySubscriber {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

struct NotifySubscription {
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl Subscription for NotifySubscription {
    fn cancel(&mut self) {
        // Dropping the debouncer releases the OS watch.
        self.debouncer = None;
    }
}

fn classify(kind: notify::EventKind) -> Option<FileEventKind> {
    match kind {
        notify::EventKind::Create(_) => Some(FileEventKind::Created),
        notify::EventKind::Modify(_) => Some(FileEventKind::Changed),
        notify::EventKind::Remove(_) => Some(FileEventKind::Deleted),
        _ => None,
    }
}

fn log_notify_errors(errors: Vec<notify::Error>) {
    for error in errors {
        tracing::warn!(error = %error, "File watcher error");
    }
}

impl FileSubscriber for NotifySubscriber {
    fn subscribe(
        &self,
        path: &Path,
        on_change: ChangeCallback,
    ) -> Result<Box<dyn Subscription>, WatcherError> {
        let setup_error = |e: notify::Error| WatcherError::WatchSetup {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let changed = events.iter().any(|event| {
                        matches!(
                            classify(event.kind),
                            Some(FileEventKind::Created | FileEventKind::Changed)
                        )
                    });
                    if changed {
                        on_change();
                    }
                }
                Err(errors) => log_notify_errors(errors),
            }
        })
        .map_err(setup_error)?;

        debouncer
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(setup_error)?;

        Ok(Box::new(NotifySubscription {
            debouncer: Some(debouncer),
        }))
    }

    fn watch_tree(
        &self,
        root: &Path,
        pattern: DiscoveryPattern,
        on_event: FileEventCallback,
    ) -> Result<Box<dyn Subscription>, WatcherError> {
        let tree_root = root.to_path_buf();
        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in &events {
                        let Some(kind) = classify(event.kind) else {
                            continue;
                        };
                        for path in &event.paths {
                            if pattern.matches(&tree_root, path) {
                                on_event(FileEvent {
                                    kind,
                                    path: path.clone(),
                                });
                            }
                        }
                    }
                }
                Err(errors) => log_notify_errors(errors),
            }
        })?;

        debouncer.watch(root, RecursiveMode::Recursive)?;

        Ok(Box::new(NotifySubscription {
            debouncer: Some(debouncer),
        }))
    }
}

/// Metadata polling on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct PollSubscriber {
    interval: Duration,
}

impl PollSubscriber {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    fn runtime(path: &Path) -> Result<tokio::runtime::Handle, WatcherError> {
        tokio::runtime::Handle::try_current().map_err(|e| WatcherError::WatchSetup {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn ticker(&self) -> tokio::time::Interval {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

impl Default for PollSubscriber {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

struct PollSubscription {
    cancel: CancellationToken,
}

impl Subscription for PollSubscription {
    fn cancel(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for PollSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type Fingerprint = (u64, Option<SystemTime>);

async fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    Some((metadata.len(), metadata.modified().ok()))
}

fn fingerprint_blocking(path: &Path) -> Option<Fingerprint> {
    let metadata = std::fs::metadata(path).ok()?;
    Some((metadata.len(), metadata.modified().ok()))
}

fn scan_tree(root: &Path, pattern: &DiscoveryPattern) -> HashMap<PathBuf, Fingerprint> {
    find_matching_files(root, pattern)
        .into_iter()
        .filter_map(|path| fingerprint_blocking(&path).map(|fp| (path, fp)))
        .collect()
}

fn diff_scans(
    before: &HashMap<PathBuf, Fingerprint>,
    after: &HashMap<PathBuf, Fingerprint>,
) -> Vec<FileEvent> {
    let mut events: Vec<FileEvent> = after
        .iter()
        .filter_map(|(path, fp)| {
            let kind = match before.get(path) {
                None => FileEventKind::Created,
                Some(old) if old != fp => FileEventKind::Changed,
                Some(_) => return None,
            };
            Some(FileEvent {
                kind,
                path: path.clone(),
            })
        })
        .chain(
            before
                .keys()
                .filter(|path| !after.contains_key(*path))
                .map(|path| FileEvent {
                    kind: FileEventKind::Deleted,
                    path: path.clone(),
                }),
        )
        .collect();
    events.sort_by(|a, b| a.path.cmp(&b.path));
    events
}

impl FileSubscriber for PollSubscriber {
    fn subscribe(
        &self,
        path: &Path,
        on_change: ChangeCallback,
    ) -> Result<Box<dyn Subscription>, WatcherError> {
        let runtime = Self::runtime(path)?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let path = path.to_path_buf();
        let mut ticker = self.ticker();

        runtime.spawn(async move {
            let mut last = fingerprint(&path).await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let current = fingerprint(&path).await;
                if current.is_some() && current != last {
                    on_change();
                }
                last = current;
            }
        });

        Ok(Box::new(PollSubscription { cancel }))
    }

    fn watch_tree(
        &self,
        root: &Path,
        pattern: DiscoveryPattern,
        on_event: FileEventCallback,
    ) -> Result<Box<dyn Subscription>, WatcherError> {
        let runtime = Self::runtime(root)?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let root = root.to_path_buf();
        let mut ticker = self.ticker();

        runtime.spawn(async move {
            let mut known = {
                let (root, pattern) = (root.clone(), pattern.clone());
                tokio::task::spawn_blocking(move || scan_tree(&root, &pattern))
                    .await
                    .unwrap_or_default()
            };
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let (scan_root, scan_pattern) = (root.clone(), pattern.clone());
                let current =
                    match tokio::task::spawn_blocking(move || scan_tree(&scan_root, &scan_pattern))
                        .await
                    {
                        Ok(current) => current,
                        Err(e) => {
                            tracing::warn!(root = %root.display(), error = %e, "Tree scan failed");
                            continue;
                        }
                    };
                if token.is_cancelled() {
                    break;
                }
                for event in diff_scans(&known, &current) {
                    on_event(event);
                }
                known = current;
            }
        });

        Ok(Box::new(PollSubscription { cancel }))
    }
}

//! Event log discovery.
//!
//! Locates event logs under a project root by glob pattern and keeps exactly
//! one reader per file. Each reader is owned by its own task; refresh
//! requests are queued to it over a channel, so refreshes of the same file
//! never overlap and requests that pile up during a refresh are coalesced.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::error::WatcherError;
use super::jsonl::EventLine;
use super::subscription::{ChangeCallback, FileEventKind, FileSubscriber, Subscription};
use super::tailer::EventStreamReader;

/// Default location of the event log relative to a project root.
pub const DEFAULT_PATTERN: &str = "**/.storycraftr/vscode-events.jsonl";

/// Directories never descended into during discovery.
const SKIPPED_DIRS: [&str; 3] = [".git", "node_modules", "target"];

/// A glob over paths relative to a root.
///
/// Supports `*` and `?` within one path segment and `**/` for any number of
/// leading directories.
#[derive(Debug, Clone)]
pub struct DiscoveryPattern {
    glob: String,
    regex: Regex,
}

impl DiscoveryPattern {
    /// Compile a glob.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Pattern`] if the glob does not compile.
    pub fn new(glob: &str) -> Result<Self, WatcherError> {
        let regex = Regex::new(&glob_to_regex(glob)).map_err(|source| WatcherError::Pattern {
            pattern: glob.to_string(),
            source,
        })?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    /// The source glob.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.glob
    }

    /// Match a path relative to the root.
    #[must_use]
    pub fn matches_relative(&self, relative: &Path) -> bool {
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.regex.is_match(&joined)
    }

    /// Match an absolute path that must live under `root`.
    #[must_use]
    pub fn matches(&self, root: &Path, path: &Path) -> bool {
        path.strip_prefix(root)
            .is_ok_and(|relative| self.matches_relative(relative))
    }
}

impl Default for DiscoveryPattern {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN).unwrap_or_else(|_| unreachable!("default pattern is valid"))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:[^/]*/)*");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

/// Find every file under `root` matching `pattern`, sorted by path.
///
/// Symlinks are not followed and unreadable entries are skipped.
#[must_use]
pub fn find_matching_files(root: &Path, pattern: &DiscoveryPattern) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry during discovery");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| pattern.matches(root, path))
        .collect();
    found.sort();
    found
}

/// Events read from one file in a single refresh, in file order.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub path: PathBuf,
    pub lines: Vec<EventLine>,
    reader: CancellationToken,
}

impl EventBatch {
    /// A batch not tied to an attached reader.
    #[must_use]
    pub fn new(path: PathBuf, lines: Vec<EventLine>) -> Self {
        Self {
            path,
            lines,
            reader: CancellationToken::new(),
        }
    }

    pub(crate) fn from_reader(
        path: PathBuf,
        lines: Vec<EventLine>,
        reader: &CancellationToken,
    ) -> Self {
        Self {
            path,
            lines,
            reader: reader.clone(),
        }
    }

    /// Returns true if the reader that produced this batch has been disposed.
    ///
    /// Batches still queued when their reader is disposed must not be dispatched.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.reader.is_cancelled()
    }
}

struct AttachedReader {
    requests: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    subscription: Box<dyn Subscription>,
}

impl AttachedReader {
    fn request_refresh(&self) {
        // A closed channel means the worker already stopped.
        let _ = self.requests.send(());
    }

    fn dispose(mut self) {
        self.cancel.cancel();
        self.subscription.cancel();
    }
}

/// Registry of attached event logs under one root.
pub struct FileDiscovery {
    root: PathBuf,
    pattern: DiscoveryPattern,
    subscriber: Arc<dyn FileSubscriber>,
    batches: mpsc::UnboundedSender<EventBatch>,
    readers: HashMap<PathBuf, AttachedReader>,
}

impl FileDiscovery {
    /// Create a registry that forwards every refreshed batch to `batches`.
    #[must_use]
    pub fn new(
        root: PathBuf,
        pattern: DiscoveryPattern,
        subscriber: Arc<dyn FileSubscriber>,
        batches: mpsc::UnboundedSender<EventBatch>,
    ) -> Self {
        Self {
            root,
            pattern,
            subscriber,
            batches,
            readers: HashMap::new(),
        }
    }

    /// Root directory searched for event logs.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pattern that event log paths must match.
    #[must_use]
    pub fn pattern(&self) -> &DiscoveryPattern {
        &self.pattern
    }

    /// Attach a reader to every matching file already under the root.
    ///
    /// The tree walk runs on a blocking thread. Returns the number of newly
    /// attached files.
    pub async fn discover(&mut self, process_existing: bool) -> usize {
        let (root, pattern) = (self.root.clone(), self.pattern.clone());
        let files =
            match tokio::task::spawn_blocking(move || find_matching_files(&root, &pattern)).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(
                        root = %self.root.display(),
                        error = %e,
                        "Event log scan failed"
                    );
                    return 0;
                }
            };
        tracing::debug!(
            root = %self.root.display(),
            pattern = self.pattern.as_str(),
            found = files.len(),
            "Discovered event logs"
        );
        files
            .into_iter()
            .filter(|path| self.attach(path, process_existing))
            .count()
    }

    /// Attach a reader to `path` unless one is already attached.
    ///
    /// Returns true if a new reader was attached. A watch that cannot be set
    /// up leaves nothing behind and returns false.
    pub fn attach(&mut self, path: &Path, process_existing: bool) -> bool {
        let path = absolute(path);
        if self.readers.contains_key(&path) {
            return false;
        }

        let (requests, request_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let on_change: ChangeCallback = {
            let requests = requests.clone();
            Arc::new(move || {
                let _ = requests.send(());
            })
        };

        let subscription = match self.subscriber.subscribe(&path, on_change) {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to watch event log"
                );
                return false;
            }
        };

        tokio::spawn(run_reader(
            EventStreamReader::new(path.clone()),
            process_existing,
            request_rx,
            cancel.clone(),
            self.batches.clone(),
        ));

        tracing::info!(
            path = %path.display(),
            process_existing,
            "Attached event log"
        );
        self.readers.insert(
            path,
            AttachedReader {
                requests,
                cancel,
                subscription,
            },
        );
        true
    }

    /// React to a file event under the root.
    pub async fn on_file_event(&mut self, kind: FileEventKind, path: &Path) {
        let path = absolute(path);
        match kind {
            FileEventKind::Created | FileEventKind::Changed => {
                if let Some(reader) = self.readers.get(&path) {
                    reader.request_refresh();
                } else if self.pattern.matches(&self.root, &path) && is_regular_file(&path).await {
                    self.attach(&path, true);
                }
            }
            FileEventKind::Deleted => {
                self.dispose(&path);
            }
        }
    }

    /// Queue a refresh for an attached file.
    ///
    /// Returns false if no reader is attached to `path`.
    pub fn refresh(&self, path: &Path) -> bool {
        match self.readers.get(&absolute(path)) {
            Some(reader) => {
                reader.request_refresh();
                true
            }
            None => false,
        }
    }

    /// Stop watching `path` and drop its reader.
    ///
    /// A refresh already in flight finishes, but its events are discarded.
    pub fn dispose(&mut self, path: &Path) -> bool {
        match self.readers.remove(&absolute(path)) {
            Some(reader) => {
                reader.dispose();
                tracing::info!(path = %path.display(), "Detached event log");
                true
            }
            None => false,
        }
    }

    /// Stop watching every attached file.
    pub fn dispose_all(&mut self) {
        for (path, reader) in self.readers.drain() {
            reader.dispose();
            tracing::debug!(path = %path.display(), "Detached event log");
        }
    }

    /// Returns true if a reader is attached to `path`.
    #[must_use]
    pub fn is_attached(&self, path: &Path) -> bool {
        self.readers.contains_key(&absolute(path))
    }

    /// Paths of all attached files, sorted.
    #[must_use]
    pub fn attached_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.readers.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Drop for FileDiscovery {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

async fn run_reader(
    mut reader: EventStreamReader,
    process_existing: bool,
    mut requests: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
    batches: mpsc::UnboundedSender<EventBatch>,
) {
    if refresh_once(&mut reader, process_existing, &cancel, &batches).await {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                request = requests.recv() => {
                    if request.is_none() {
                        break;
                    }
                }
            }

            let mut coalesced = 0usize;
            while requests.try_recv().is_ok() {
                coalesced += 1;
            }
            if coalesced > 0 {
                tracing::trace!(
                    path = %reader.path().display(),
                    coalesced,
                    "Coalesced refresh requests"
                );
            }

            if !refresh_once(&mut reader, process_existing, &cancel, &batches).await {
                break;
            }
        }
    }
    tracing::debug!(path = %reader.path().display(), "Reader stopped");
}

/// Run one refresh and forward its events. Returns false once the reader
/// should stop.
async fn refresh_once(
    reader: &mut EventStreamReader,
    process_existing: bool,
    cancel: &CancellationToken,
    batches: &mpsc::UnboundedSender<EventBatch>,
) -> bool {
    match reader.refresh(process_existing).await {
        Ok(lines) => {
            if cancel.is_cancelled() {
                tracing::debug!(
                    path = %reader.path().display(),
                    discarded = lines.len(),
                    "Reader disposed during refresh, discarding events"
                );
                return false;
            }
            if lines.is_empty() {
                return true;
            }
            batches
                .send(EventBatch::from_reader(
                    reader.path().to_path_buf(),
                    lines,
                    cancel,
                ))
                .is_ok()
        }
        Err(e) => {
            tracing::warn!(
                path = %reader.path().display(),
                error = %e,
                "Unable to read event log, will retry on next change"
            );
            !cancel.is_cancelled()
        }
    }
}

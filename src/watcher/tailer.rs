//! Incremental event-log reader.
//!
//! Reads new events from a JSONL file as they are appended.

use std::path::{Path, PathBuf};

use super::error::WatcherError;
use super::jsonl::{parse_line, EventLine};

/// Incremental JSONL reader that tracks how many bytes it has consumed.
///
/// Every refresh re-reads the whole file and folds only the bytes past the
/// cursor into lines, so each byte range is parsed at most once. A file that
/// shrinks is treated as rotated and read again from the start.
#[derive(Debug)]
pub struct EventStreamReader {
    /// Path to the event log.
    path: PathBuf,
    /// Bytes already folded into lines.
    cursor: usize,
    /// Set after the first successful refresh.
    attached: bool,
}

impl EventStreamReader {
    /// Create a reader for the given path. Nothing is read until the first refresh.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cursor: 0,
            attached: false,
        }
    }

    /// Get the current byte cursor.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Get the path being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once the reader has completed its first refresh.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Read the file and return events appended since the last refresh.
    ///
    /// On the first refresh, `process_existing` decides whether content
    /// already in the file is emitted or only marked as seen. Later refreshes
    /// ignore the flag.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::FileAccess`] if the file cannot be read. The
    /// cursor is left untouched so the next refresh retries.
    pub async fn refresh(&mut self, process_existing: bool) -> Result<Vec<EventLine>, WatcherError> {
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| WatcherError::file_access(&self.path, e))?;
        Ok(self.ingest(&content, process_existing))
    }

    /// Fold the full current file `content` into events past the cursor.
    pub fn ingest(&mut self, content: &[u8], process_existing: bool) -> Vec<EventLine> {
        if !self.attached {
            self.attached = true;
            if !process_existing {
                self.cursor = content.len();
                tracing::debug!(
                    path = %self.path.display(),
                    cursor = self.cursor,
                    "Skipping existing event log content"
                );
                return Vec::new();
            }
        }

        if content.len() < self.cursor {
            tracing::warn!(
                path = %self.path.display(),
                old_cursor = self.cursor,
                new_len = content.len(),
                "Event log truncated, resetting cursor to 0"
            );
            self.cursor = 0;
        }

        let unseen = &content[self.cursor..];
        self.cursor = content.len();
        if unseen.is_empty() {
            return Vec::new();
        }

        let text = String::from_utf8_lossy(unseen);
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match parse_line(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = %line,
                        error = %e,
                        "Skipping malformed event line"
                    );
                    None
                }
            })
            .collect()
    }
}

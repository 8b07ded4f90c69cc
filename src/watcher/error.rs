//! Watcher error types.

use std::path::PathBuf;

/// Errors that can occur while discovering, watching, or tailing event logs.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// Event log missing or unreadable at refresh time.
    #[error("Cannot read event log {path}: {source}")]
    FileAccess {
        path: PathBuf,
        source: std::io::Error,
    },

    /// OS-level watch could not be created for a file.
    #[error("Failed to watch {path}: {reason}")]
    WatchSetup { path: PathBuf, reason: String },

    /// Discovery pattern could not be compiled.
    #[error("Invalid discovery pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// Channel send error.
    #[error("Channel closed")]
    ChannelClosed,
}

impl WatcherError {
    /// Wrap an I/O error raised while reading `path`.
    #[must_use]
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }
}

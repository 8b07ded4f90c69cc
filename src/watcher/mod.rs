//! Watcher module for event logs.
//!
//! Finds event logs under a project root, tails them incrementally, and
//! decodes each line into a [`StreamEvent`].

mod discovery;
mod error;
mod jsonl;
mod subscription;
mod tailer;

pub use discovery::{
    find_matching_files, DiscoveryPattern, EventBatch, FileDiscovery, DEFAULT_PATTERN,
};
pub use error::WatcherError;
pub use jsonl::*;
pub use subscription::{
    ChangeCallback, FileEvent, FileEventCallback, FileEventKind, FileSubscriber, NotifySubscriber,
    PollSubscriber, Subscription,
};
pub use tailer::EventStreamReader;

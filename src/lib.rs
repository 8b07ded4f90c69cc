//! Subagent Monitor - live job status from append-only event logs.

pub mod config;
pub mod dispatch;
pub mod display;
pub mod jobs;
pub mod session;
pub mod sink;
pub mod watcher;

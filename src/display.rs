//! Colored terminal sink.
//!
//! [`ConsoleSink`] renders summaries, event lines, and finished-job notices
//! as tagged, timestamped lines.

use std::io::{self, Stdout, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::jobs::{JobState, JobSummary};
use crate::sink::{JobTerminalNotice, NotificationSink};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length of one displayed line outside raw mode.
const DEFAULT_MAX_LEN: usize = 200;

/// Truncate a string to a maximum number of characters, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

#[derive(Debug, Clone, Copy)]
enum Tag {
    Jobs,
    Event,
    Done,
    Failed,
    Log,
}

impl Tag {
    fn label(self) -> &'static str {
        match self {
            Self::Jobs => "[JOBS]",
            Self::Event => "[EVENT]",
            Self::Done => "[DONE]",
            Self::Failed => "[FAILED]",
            Self::Log => "[LOG]",
        }
    }

    fn render(self, color: bool) -> String {
        let label = self.label();
        if !color {
            return label.to_string();
        }
        match self {
            Self::Jobs => label.blue().bold().to_string(),
            Self::Event => label.cyan().bold().to_string(),
            Self::Done => label.green().bold().to_string(),
            Self::Failed => label.red().bold().to_string(),
            Self::Log => label.yellow().bold().to_string(),
        }
    }
}

/// Sink that writes to a terminal or any other writer.
pub struct ConsoleSink<W = Stdout> {
    out: W,
    color: bool,
    raw_mode: bool,
    timestamps: bool,
}

impl ConsoleSink<Stdout> {
    /// Colored, timestamped sink on stdout.
    #[must_use]
    pub fn stdout(raw_mode: bool) -> Self {
        Self {
            out: io::stdout(),
            color: true,
            raw_mode,
            timestamps: true,
        }
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    /// Plain sink on `out`: no color, no timestamps.
    #[must_use]
    pub fn plain(out: W, raw_mode: bool) -> Self {
        Self {
            out,
            color: false,
            raw_mode,
            timestamps: false,
        }
    }

    /// Consume the sink and return its writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_tagged(&mut self, tag: Tag, text: &str) {
        let prefix = if self.timestamps {
            let ts = timestamp();
            let ts = if self.color {
                ts.dimmed().to_string()
            } else {
                ts
            };
            format!("{ts} {}", tag.render(self.color))
        } else {
            tag.render(self.color)
        };

        let mut lines = text.split('\n');
        let first = lines.next().unwrap_or_default();
        let _ = writeln!(
            self.out,
            "{prefix} {}",
            truncate(first, DEFAULT_MAX_LEN, self.raw_mode)
        );
        for line in lines {
            let _ = writeln!(
                self.out,
                "{}",
                truncate(line, DEFAULT_MAX_LEN, self.raw_mode)
            );
        }
        let _ = self.out.flush();
    }

    fn write_hint(&mut self, hint: &str) {
        let indent = "  ";
        if self.color {
            let _ = writeln!(self.out, "{indent}{}", hint.dimmed());
        } else {
            let _ = writeln!(self.out, "{indent}{hint}");
        }
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> NotificationSink for ConsoleSink<W> {
    fn render_summary(&mut self, summary: &JobSummary) {
        self.write_tagged(Tag::Jobs, &summary.to_string());
    }

    fn append_line(&mut self, line: &str) {
        self.write_tagged(Tag::Event, line);
    }

    fn notify_job_terminal(&mut self, notice: &JobTerminalNotice) {
        let tag = match notice.state {
            JobState::Failed => Tag::Failed,
            _ => Tag::Done,
        };
        self.write_tagged(tag, &notice.message);
        if let Some(log_path) = &notice.log_path {
            if notice.offer_open_log {
                self.write_hint(&format!("open log: {log_path}"));
            } else {
                self.write_hint(&format!("log: {log_path}"));
            }
        }
    }

    fn offer_log_files(&mut self, files: &[String]) {
        for file in files {
            self.write_tagged(Tag::Log, file);
        }
    }
}

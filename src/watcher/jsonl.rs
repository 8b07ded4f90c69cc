//! JSONL event-line parser.
//!
//! Each line of an event log is `{"event": "<kind>", "payload": {...}}`.
//! Lines are decoded here into [`StreamEvent`], a closed union of the known
//! event kinds plus an `Unrecognized` catch-all, so nothing downstream reads
//! payload fields ad hoc.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::jobs::JobState;

/// Opaque event payload.
pub type Payload = Map<String, Value>;

/// Catalog of event kinds the dispatcher knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStarted,
    SessionEnded,
    ChatCommand,
    ChatTurn,
    SubAgentQueued,
    SubAgentRunning,
    SubAgentSucceeded,
    SubAgentFailed,
    SubAgentLogs,
    SubAgentStatus,
}

impl EventKind {
    /// Every known kind.
    pub const ALL: [EventKind; 10] = [
        EventKind::SessionStarted,
        EventKind::SessionEnded,
        EventKind::ChatCommand,
        EventKind::ChatTurn,
        EventKind::SubAgentQueued,
        EventKind::SubAgentRunning,
        EventKind::SubAgentSucceeded,
        EventKind::SubAgentFailed,
        EventKind::SubAgentLogs,
        EventKind::SubAgentStatus,
    ];

    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session.started",
            Self::SessionEnded => "session.ended",
            Self::ChatCommand => "chat.command",
            Self::ChatTurn => "chat.turn",
            Self::SubAgentQueued => "sub_agent.queued",
            Self::SubAgentRunning => "sub_agent.running",
            Self::SubAgentSucceeded => "sub_agent.succeeded",
            Self::SubAgentFailed => "sub_agent.failed",
            Self::SubAgentLogs => "sub_agent.logs",
            Self::SubAgentStatus => "sub_agent.status",
        }
    }

    /// Look up a kind by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

/// Phase named by a `sub_agent.<phase>` lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl LifecyclePhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Job state implied by the event name when the payload carries no status.
    #[must_use]
    pub fn implied_state(self) -> JobState {
        match self {
            Self::Queued => JobState::Pending,
            Self::Running => JobState::Running,
            Self::Succeeded => JobState::Succeeded,
            Self::Failed => JobState::Failed,
        }
    }
}

// Payload fields are read leniently: a field of the wrong JSON type decodes
// as absent, so one bad field never discards the event's effect.

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect())
}

fn lenient_jobs<'de, D>(deserializer: D) -> Result<Vec<JobUpdate>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping status entry that is not an object");
                None
            }
        })
        .collect())
}

/// Payload of `session.started`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionStarted {
    #[serde(default, deserialize_with = "lenient_string")]
    pub book_path: Option<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

/// Payload of `chat.command`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatCommand {
    #[serde(default, deserialize_with = "lenient_string")]
    pub input: Option<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

/// Payload of `chat.turn`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatTurn {
    #[serde(default, deserialize_with = "lenient_string")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub answer: Option<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

/// A job as described by a lifecycle event or a status snapshot entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobUpdate {
    #[serde(default, deserialize_with = "lenient_string")]
    pub job_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub role_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub command_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub log_path: Option<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

impl JobUpdate {
    /// Display name of the role: `role_name`, then `role`, then `sub-agent`.
    #[must_use]
    pub fn display_role(&self) -> &str {
        self.role_name
            .as_deref()
            .or(self.role.as_deref())
            .unwrap_or("sub-agent")
    }

    /// Command text, empty when absent.
    #[must_use]
    pub fn command(&self) -> &str {
        self.command_text.as_deref().unwrap_or_default()
    }
}

/// Payload of `sub_agent.logs`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogList {
    #[serde(default, deserialize_with = "lenient_strings")]
    pub files: Vec<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

/// Payload of `sub_agent.status`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default, deserialize_with = "lenient_jobs")]
    pub jobs: Vec<JobUpdate>,
    #[serde(flatten)]
    pub extra: Payload,
}

/// A decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    SessionStarted(SessionStarted),
    SessionEnded(Payload),
    ChatCommand(ChatCommand),
    ChatTurn(ChatTurn),
    Lifecycle {
        phase: LifecyclePhase,
        job: JobUpdate,
    },
    Logs(LogList),
    Status(StatusSnapshot),
    /// Valid JSON with an event name outside the catalog.
    Unrecognized { event: String, payload: Payload },
}

impl StreamEvent {
    /// Decode an event name and payload into a typed event.
    ///
    /// Never fails: anything that cannot be decoded as a known kind becomes
    /// [`StreamEvent::Unrecognized`].
    #[must_use]
    pub fn decode(event: String, payload: Payload) -> Self {
        let Some(kind) = EventKind::from_name(&event) else {
            return Self::Unrecognized { event, payload };
        };

        match Self::decode_known(kind, payload.clone()) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(
                    event = %event,
                    error = %e,
                    "Payload does not match event kind, treating as unrecognized"
                );
                Self::Unrecognized { event, payload }
            }
        }
    }

    fn decode_known(kind: EventKind, payload: Payload) -> Result<Self, serde_json::Error> {
        let lifecycle = |phase: LifecyclePhase, payload: Payload| {
            serde_json::from_value(Value::Object(payload)).map(|job| Self::Lifecycle { phase, job })
        };

        match kind {
            EventKind::SessionStarted => {
                serde_json::from_value(Value::Object(payload)).map(Self::SessionStarted)
            }
            EventKind::SessionEnded => Ok(Self::SessionEnded(payload)),
            EventKind::ChatCommand => {
                serde_json::from_value(Value::Object(payload)).map(Self::ChatCommand)
            }
            EventKind::ChatTurn => serde_json::from_value(Value::Object(payload)).map(Self::ChatTurn),
            EventKind::SubAgentQueued => lifecycle(LifecyclePhase::Queued, payload),
            EventKind::SubAgentRunning => lifecycle(LifecyclePhase::Running, payload),
            EventKind::SubAgentSucceeded => lifecycle(LifecyclePhase::Succeeded, payload),
            EventKind::SubAgentFailed => lifecycle(LifecyclePhase::Failed, payload),
            EventKind::SubAgentLogs => serde_json::from_value(Value::Object(payload)).map(Self::Logs),
            EventKind::SubAgentStatus => {
                serde_json::from_value(Value::Object(payload)).map(Self::Status)
            }
        }
    }

    /// Known kind of this event, `None` for unrecognized events.
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        let kind = match self {
            Self::SessionStarted(_) => EventKind::SessionStarted,
            Self::SessionEnded(_) => EventKind::SessionEnded,
            Self::ChatCommand(_) => EventKind::ChatCommand,
            Self::ChatTurn(_) => EventKind::ChatTurn,
            Self::Lifecycle { phase, .. } => match phase {
                LifecyclePhase::Queued => EventKind::SubAgentQueued,
                LifecyclePhase::Running => EventKind::SubAgentRunning,
                LifecyclePhase::Succeeded => EventKind::SubAgentSucceeded,
                LifecyclePhase::Failed => EventKind::SubAgentFailed,
            },
            Self::Logs(_) => EventKind::SubAgentLogs,
            Self::Status(_) => EventKind::SubAgentStatus,
            Self::Unrecognized { .. } => return None,
        };
        Some(kind)
    }

    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Unrecognized { event, .. } => event,
            other => other.kind().map_or("", EventKind::as_str),
        }
    }
}

/// A line that parsed into an event, with the trimmed raw text kept.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLine {
    pub event: StreamEvent,
    pub raw: String,
}

/// A line that is not a valid event envelope.
#[derive(thiserror::Error, Debug)]
#[error("Malformed event line: {0}")]
pub struct EventParseError(#[from] serde_json::Error);

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Option<Payload>,
}

/// Parse one trimmed, non-empty log line.
///
/// # Errors
///
/// Returns an error if the line is not JSON, has no string `event` field, or
/// has a payload that is neither an object nor `null`.
pub fn parse_line(line: &str) -> Result<EventLine, EventParseError> {
    let envelope: Envelope = serde_json::from_str(line)?;
    Ok(EventLine {
        event: StreamEvent::decode(envelope.event, envelope.payload.unwrap_or_default()),
        raw: line.to_string(),
    })
}

//! Task types for the quarry lifecycle.
//!
//! A [`Task`] is a unit of trackable, potentially long-running, potentially
//! resumable work. Tasks progress through a one-directional lifecycle toward
//! a terminal state and carry opaque, consumer-defined parameter and result
//! payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Key inside [`Task::params`] holding the resume checkpoint.
///
/// Params are immutable after creation with this one exception: operations
/// rewrite the checkpoint as they pass stage boundaries so an interrupted
/// task can be continued from where it stopped.
pub const CHECKPOINT_KEY: &str = "resume_from";

/// Errors that can occur when parsing a [`TaskId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTaskId {
    /// Task id is empty or contains only whitespace.
    #[error("task id cannot be empty")]
    Empty,

    /// Task id exceeds the maximum allowed length.
    #[error("task id too long: {0} characters (max {max})", max = TaskId::MAX_LENGTH)]
    TooLong(usize),

    /// Task id contains characters outside the identifier-safe set.
    #[error("task id contains invalid characters: '{0}'")]
    InvalidChars(String),
}

/// Unique identifier for a task.
///
/// Ids are generated as UUID v4 text at creation time and are stable for the
/// task's lifetime. External input (CLI flags, re-entry arguments) goes
/// through [`TaskId::parse`]; the validation rules keep ids identifier-safe
/// so they can appear in file names and log lines without escaping.
///
/// # Examples
///
/// ```rust
/// use quarry_core::TaskId;
///
/// let id = TaskId::generate();
/// let same: TaskId = id.as_str().parse().unwrap();
/// assert_eq!(id, same);
///
/// assert!(TaskId::parse("").is_err());
/// assert!(TaskId::parse("not a task/id").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Maximum allowed length for task ids.
    pub const MAX_LENGTH: usize = 64;

    /// Allocate a fresh id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse and validate a task id from external input.
    pub fn parse(id: impl AsRef<str>) -> Result<Self, InvalidTaskId> {
        let id = id.as_ref();
        if id.trim().is_empty() {
            return Err(InvalidTaskId::Empty);
        }
        if id.len() > Self::MAX_LENGTH {
            return Err(InvalidTaskId::TooLong(id.len()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(InvalidTaskId::InvalidChars(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    /// Get the task id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = InvalidTaskId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl TryFrom<String> for TaskId {
    type Error = InvalidTaskId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

/// Task status indicating the current position in the lifecycle.
///
/// Transitions are one-directional: `queued → running → {completed | failed |
/// cancelled}`. A task never re-enters `queued` or `running` from a terminal
/// state; resumption continues work under the same id instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task has been created but work has not started.
    Queued,

    /// Task is actively being processed.
    Running,

    /// Task completed successfully.
    Completed,

    /// Task failed due to an error.
    Failed,

    /// Task was cancelled before reaching completion.
    Cancelled,
}

impl TaskStatus {
    /// Check if this status represents a terminal state.
    ///
    /// Terminal states are final: no further status change will occur.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Check if a task in this status is a candidate for resumption.
    ///
    /// Resumable tasks are those left in flight when the hosting process
    /// stopped: still `queued`, or `running` with nobody driving them.
    pub fn is_resumable(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!(
                "unknown task status '{other}' (expected queued, running, completed, failed or cancelled)"
            )),
        }
    }
}

/// A trackable unit of work.
///
/// The record is owned by the tracker for storage but logically driven by
/// whichever long-running operation holds its id. `params` and `result` are
/// schema-less JSON maps because task kinds are open-ended and
/// consumer-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, stable for the task's lifetime.
    pub id: TaskId,

    /// Consumer-defined tag for the kind of work (`"scrape"`, `"url_update"`,
    /// `"github"`, `"knowledge_graph"`, `"custom"`, ...).
    #[serde(rename = "type")]
    pub kind: String,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Fractional completion on a 0-100 scale. Only meaningful while
    /// `running`; terminal tasks freeze the last reported value.
    pub progress: f64,

    /// Latest human-readable status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Task-kind-specific inputs, set at creation. Immutable afterwards
    /// except for the [`CHECKPOINT_KEY`] entry.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,

    /// Outcome payload, set once on the terminal transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,

    /// When the task was created. Immutable.
    pub created_at: DateTime<Utc>,

    /// When the task was last mutated. Bumped on every update.
    pub updated_at: DateTime<Utc>,

    /// Free-text label for display purposes.
    pub description: String,
}

impl Task {
    /// Create a new queued task with a generated id.
    pub fn new(
        kind: impl Into<String>,
        params: Map<String, Value>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            kind: kind.into(),
            status: TaskStatus::Queued,
            progress: 0.0,
            message: None,
            params,
            result: None,
            created_at: now,
            updated_at: now,
            description: description.into(),
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task is a candidate for resumption.
    pub fn is_resumable(&self) -> bool {
        self.status.is_resumable()
    }

    /// The stored resume checkpoint, if any.
    pub fn checkpoint(&self) -> Option<&Value> {
        self.params.get(CHECKPOINT_KEY)
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Human-readable time since the last update, e.g. `"3m 12s"`.
    pub fn updated_ago(&self) -> String {
        humantime::format_duration(
            Utc::now()
                .signed_duration_since(self.updated_at)
                .to_std()
                .unwrap_or_default(),
        )
        .to_string()
    }
}

/// Partial update applied to a stored task.
///
/// Only the provided fields change; `updated_at` is always bumped. Built with
/// the `with_*` methods so call sites read like the update they perform:
///
/// ```rust
/// use quarry_core::{TaskStatus, TaskUpdate};
///
/// let update = TaskUpdate::new()
///     .with_status(TaskStatus::Running)
///     .with_message("starting crawl");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New lifecycle status, if changing.
    pub status: Option<TaskStatus>,
    /// New progress value, if changing.
    pub progress: Option<f64>,
    /// New status line, if changing.
    pub message: Option<String>,
    /// Outcome payload, if the task is reaching a terminal state.
    pub result: Option<Map<String, Value>>,
    /// New resume checkpoint, written into `params` under
    /// [`CHECKPOINT_KEY`].
    pub checkpoint: Option<Value>,
}

impl TaskUpdate {
    /// An update that changes nothing but `updated_at`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status field.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the progress field.
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set the message field.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the result payload.
    pub fn with_result(mut self, result: Map<String, Value>) -> Self {
        self.result = Some(result);
        self
    }

    /// Set the resume checkpoint.
    pub fn with_checkpoint(mut self, checkpoint: Value) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Apply this update to a task in place, bumping `updated_at`.
    ///
    /// Status transition validity is the tracker's concern, not this
    /// method's; it applies whatever it is given.
    pub fn apply(self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(progress) = self.progress {
            task.progress = progress;
        }
        if let Some(message) = self.message {
            task.message = Some(message);
        }
        if let Some(result) = self.result {
            task.result = Some(result);
        }
        if let Some(checkpoint) = self.checkpoint {
            task.params.insert(CHECKPOINT_KEY.to_string(), checkpoint);
        }
        task.touch();
    }
}

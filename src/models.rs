use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a single task owned by the task repository.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    /// Storage identifier for the task.
    pub id: u64,
    /// Stable client-facing identity, distinct from the storage id.
    pub uid: String,
    /// Short title shown in reminders.
    pub title: String,
    /// Optional longer description, used as the reminder body.
    #[serde(default)]
    pub description: Option<String>,
    /// Calendar due date.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Calendar start date.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Wall-clock time paired with the start or due date.
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    /// Minutes before the due instant at which reminders fire.
    #[serde(default)]
    pub alert_offsets: BTreeSet<u32>,
    /// Timestamp when the task was created.
    pub created_at: DateTime<Utc>,
    /// Whether the task has been completed.
    #[serde(default)]
    pub completed: bool,
    /// Timestamp when the task was completed.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Soft-delete marker.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates an open task with a fresh uid and no scheduling fields.
    pub fn new(id: u64, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            uid: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description: None,
            due_date: None,
            start_date: None,
            start_time: None,
            alert_offsets: BTreeSet::new(),
            created_at,
            completed: false,
            completed_at: None,
            deleted_at: None,
        }
    }

    /// Returns `true` if reminders may exist for this task.
    pub fn is_active(&self) -> bool {
        !self.completed && self.deleted_at.is_none()
    }
}

/// Opaque handle assigned by the notification service to a scheduled trigger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TriggerHandle(pub String);

impl std::fmt::Display for TriggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Data carried by a trigger so it can be traced back to its task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TriggerPayload {
    pub task_id: u64,
    pub task_uid: String,
    pub offset_minutes: u32,
}

/// User-visible text of a notification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

/// A trigger as reported back by the notification service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PendingTrigger {
    pub handle: TriggerHandle,
    pub payload: TriggerPayload,
    pub fire_at: DateTime<Utc>,
    #[serde(default)]
    pub content: NotificationContent,
}

/// One reminder summary kept in the notification index.
///
/// There is a single entry per task. `fire_at` is the earliest trigger that
/// was scheduled for the task; `offsets` lists every offset that got a trigger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub task_uid: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fire_at: DateTime<Utc>,
    #[serde(default)]
    pub offsets: Vec<u32>,
    #[serde(default)]
    pub completed: bool,
    pub last_updated: DateTime<Utc>,
}

//! Administrative escape hatches that bypass the task-driven flow.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{NotifyError, ReminderError, Result};
use crate::index::NotificationIndex;
use crate::models::{IndexEntry, NotificationContent, PendingTrigger, TriggerHandle, TriggerPayload};
use crate::notifier::NotificationService;
use crate::repository::{TaskFilter, TaskRepository};

/// Task uid carried by diagnostic test triggers. Reconciliation leaves
/// triggers with this uid alone.
pub const TEST_TRIGGER_UID: &str = "__remindust_test__";

/// Point-in-time view of the reminder engine's three sources.
#[derive(Debug, Clone, Serialize)]
pub struct DebugSnapshot {
    pub taken_at: DateTime<Utc>,
    pub permission_granted: bool,
    pub active_tasks: usize,
    pub pending_triggers: usize,
    pub index_entries: usize,
    pub completed_entries: usize,
    pub upcoming: Vec<IndexEntry>,
    /// Pending triggers grouped by task uid.
    pub triggers_by_task: BTreeMap<String, Vec<PendingTrigger>>,
}

pub async fn snapshot(
    repo: &dyn TaskRepository,
    notifier: &dyn NotificationService,
    index: &NotificationIndex,
    clock: &dyn Clock,
) -> Result<DebugSnapshot> {
    let now = clock.now();
    let permission_granted = notifier.request_permission().await?;
    let pending = notifier.list_all().await?;
    let active_tasks = repo.list(&TaskFilter::active()).await?.len();
    let all = index.list_all().await;

    let mut triggers_by_task: BTreeMap<String, Vec<PendingTrigger>> = BTreeMap::new();
    for t in &pending {
        triggers_by_task
            .entry(t.payload.task_uid.clone())
            .or_default()
            .push(t.clone());
    }
    for triggers in triggers_by_task.values_mut() {
        triggers.sort_by_key(|t| t.fire_at);
    }

    Ok(DebugSnapshot {
        taken_at: now,
        permission_granted,
        active_tasks,
        pending_triggers: pending.len(),
        index_entries: all.len(),
        completed_entries: all.iter().filter(|e| e.completed).count(),
        upcoming: index.list_upcoming(now).await,
        triggers_by_task,
    })
}

/// Schedules a one-off trigger `delay` from now, outside any task.
pub async fn send_test_trigger(
    notifier: &dyn NotificationService,
    clock: &dyn Clock,
    delay: Duration,
) -> Result<TriggerHandle> {
    if !notifier.request_permission().await? {
        return Err(ReminderError::PermissionDenied);
    }
    let fire_at = clock
        .now()
        .checked_add_signed(delay)
        .ok_or_else(|| ReminderError::OutOfRange(format!("delay of {delay}")))?;
    let content = NotificationContent {
        title: "Test reminder".to_string(),
        body: "If you can read this, reminders work.".to_string(),
    };
    let payload = TriggerPayload {
        task_id: 0,
        task_uid: TEST_TRIGGER_UID.to_string(),
        offset_minutes: 0,
    };
    let handle = notifier.schedule(fire_at, &content, &payload).await?;
    info!(%handle, %fire_at, "test trigger scheduled");
    Ok(handle)
}

/// Result of [`cancel_everything`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub canceled: usize,
    pub cleared_entries: usize,
    pub failed: Vec<TriggerHandle>,
}

/// Cancels every pending trigger and empties the index.
pub async fn cancel_everything(
    notifier: &dyn NotificationService,
    index: &NotificationIndex,
) -> Result<PurgeReport> {
    let mut report = PurgeReport::default();
    for t in notifier.list_all().await? {
        match notifier.cancel(&t.handle).await {
            Ok(()) => report.canceled += 1,
            Err(NotifyError::UnknownHandle(_)) => {}
            Err(error) => {
                warn!(handle = %t.handle, %error, "failed to cancel trigger");
                report.failed.push(t.handle);
            }
        }
    }
    report.cleared_entries = index.clear().await?;
    info!(
        canceled = report.canceled,
        cleared = report.cleared_entries,
        "all reminders canceled"
    );
    Ok(report)
}

//! Turns a task's due instant and alert offsets into platform triggers.
//!
//! Per task the reminders move through `NoAlerts -> Scheduled ⇄
//! PartiallyScheduled -> Canceled/Completed`, driven only by task mutations.
//! Nothing here runs on a timer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::due::{fire_instant, DueResolver};
use crate::error::{NotifyError, ReminderError, Result};
use crate::index::NotificationIndex;
use crate::models::{IndexEntry, NotificationContent, Task, TriggerHandle, TriggerPayload};
use crate::notifier::NotificationService;
use crate::repository::{TaskFilter, TaskRepository};

/// Conceptual reminder state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderState {
    NoAlerts,
    Scheduled,
    PartiallyScheduled,
    Canceled,
    Completed,
}

/// A trigger created during a scheduling attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTrigger {
    pub handle: TriggerHandle,
    pub offset_minutes: u32,
    pub fire_at: DateTime<Utc>,
}

/// An offset the platform refused to schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFailure {
    pub offset_minutes: u32,
    pub error: NotifyError,
}

/// A pending trigger that could not be canceled.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelFailure {
    pub handle: TriggerHandle,
    pub error: NotifyError,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    pub triggers: Vec<ScheduledTrigger>,
    /// Offsets whose fire instant was not in the future.
    pub skipped: Vec<u32>,
    pub failures: Vec<TriggerFailure>,
    /// Set when the triggers exist but the index could not be updated.
    pub index_error: Option<String>,
}

impl ScheduleOutcome {
    pub fn handles(&self) -> Vec<TriggerHandle> {
        self.triggers.iter().map(|t| t.handle.clone()).collect()
    }

    pub fn state(&self) -> ReminderState {
        match (self.triggers.is_empty(), self.failures.is_empty()) {
            (true, true) => ReminderState::NoAlerts,
            (false, true) => ReminderState::Scheduled,
            _ => ReminderState::PartiallyScheduled,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelOutcome {
    pub canceled: usize,
    pub failures: Vec<CancelFailure>,
    pub index_error: Option<String>,
    /// Set when the cancel was caused by the task being completed.
    pub completed: bool,
}

impl CancelOutcome {
    /// Triggers that failed to cancel are still live, so the task stays
    /// partially scheduled.
    pub fn state(&self) -> ReminderState {
        if !self.failures.is_empty() {
            ReminderState::PartiallyScheduled
        } else if self.completed {
            ReminderState::Completed
        } else {
            ReminderState::Canceled
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RescheduleOutcome {
    pub canceled: CancelOutcome,
    pub scheduled: ScheduleOutcome,
}

/// Result of rescheduling every active task.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub tasks: usize,
    pub triggers: usize,
    pub failures: Vec<(String, TriggerFailure)>,
}

pub struct NotificationScheduler {
    notifier: Arc<dyn NotificationService>,
    index: Arc<NotificationIndex>,
    clock: Arc<dyn Clock>,
    due: DueResolver,
}

impl NotificationScheduler {
    pub fn new(
        notifier: Arc<dyn NotificationService>,
        index: Arc<NotificationIndex>,
        clock: Arc<dyn Clock>,
        due: DueResolver,
    ) -> Self {
        Self {
            notifier,
            index,
            clock,
            due,
        }
    }

    pub fn due_resolver(&self) -> &DueResolver {
        &self.due
    }

    /// Creates one trigger per alert offset whose fire instant is still ahead.
    ///
    /// Existing triggers for the task are left alone, so calling this twice
    /// without [`cancel_for_task`](Self::cancel_for_task) in between yields
    /// duplicates. Denied permission aborts before any trigger is requested;
    /// any other platform failure only loses that one offset.
    pub async fn schedule_for_task(&self, task: &Task) -> Result<ScheduleOutcome> {
        let mut outcome = ScheduleOutcome::default();
        if !task.is_active() {
            debug!(task = %task.uid, "task closed, nothing to schedule");
            return Ok(outcome);
        }
        let Some(due) = self.due.due_instant(task) else {
            return Ok(outcome);
        };
        if task.alert_offsets.is_empty() {
            return Ok(outcome);
        }

        if !self.notifier.request_permission().await? {
            warn!(task = %task.uid, "notification permission denied");
            return Err(ReminderError::PermissionDenied);
        }

        let now = self.clock.now();
        for &offset in &task.alert_offsets {
            let fire_at = fire_instant(due, offset);
            if fire_at <= now {
                debug!(task = %task.uid, offset, %fire_at, "fire instant passed, skipped");
                outcome.skipped.push(offset);
                continue;
            }
            let payload = TriggerPayload {
                task_id: task.id,
                task_uid: task.uid.clone(),
                offset_minutes: offset,
            };
            match self
                .notifier
                .schedule(fire_at, &content_for(task, offset), &payload)
                .await
            {
                Ok(handle) => {
                    debug!(task = %task.uid, offset, %fire_at, %handle, "trigger scheduled");
                    outcome.triggers.push(ScheduledTrigger {
                        handle,
                        offset_minutes: offset,
                        fire_at,
                    });
                }
                Err(NotifyError::PermissionDenied) => {
                    // Revoked mid-attempt: stop asking.
                    warn!(task = %task.uid, offset, "permission revoked while scheduling");
                    outcome.failures.push(TriggerFailure {
                        offset_minutes: offset,
                        error: NotifyError::PermissionDenied,
                    });
                    break;
                }
                Err(error) => {
                    warn!(task = %task.uid, offset, %error, "failed to schedule trigger");
                    outcome.failures.push(TriggerFailure {
                        offset_minutes: offset,
                        error,
                    });
                }
            }
        }

        if let Some(first) = outcome.triggers.iter().min_by_key(|t| t.fire_at) {
            let entry = IndexEntry {
                task_uid: task.uid.clone(),
                title: task.title.clone(),
                description: task.description.clone(),
                fire_at: first.fire_at,
                offsets: outcome.triggers.iter().map(|t| t.offset_minutes).collect(),
                completed: false,
                last_updated: now,
            };
            if let Err(e) = self.index.upsert(&task.uid, entry).await {
                warn!(task = %task.uid, error = %e, "failed to update reminder index");
                outcome.index_error = Some(e.to_string());
            }
        }

        info!(
            task = %task.uid,
            scheduled = outcome.triggers.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failures.len(),
            "reminders scheduled"
        );
        Ok(outcome)
    }

    /// Cancels every pending trigger of the task and drops its index entry.
    ///
    /// Having nothing to cancel is not an error.
    pub async fn cancel_for_task(&self, task_uid: &str) -> Result<CancelOutcome> {
        let mut outcome = self.cancel_triggers(task_uid).await?;
        if let Err(e) = self.index.remove(task_uid).await {
            warn!(task = %task_uid, error = %e, "failed to remove reminder index entry");
            outcome.index_error = Some(e.to_string());
        }
        Ok(outcome)
    }

    /// Cancels then schedules. The cancel phase finishes before any new
    /// trigger is requested. The two phases are not atomic.
    pub async fn reschedule_for_task(&self, task: &Task) -> Result<RescheduleOutcome> {
        let canceled = self.cancel_for_task(&task.uid).await?;
        let scheduled = self.schedule_for_task(task).await?;
        Ok(RescheduleOutcome {
            canceled,
            scheduled,
        })
    }

    /// Cancels the task's triggers and keeps its index entry, flagged completed.
    pub async fn notify_completed(&self, task: &Task) -> Result<CancelOutcome> {
        let mut outcome = self.cancel_triggers(&task.uid).await?;
        outcome.completed = true;
        match self.index.mark_completed(&task.uid, true).await {
            Ok(true) => {}
            Ok(false) => debug!(task = %task.uid, "no reminder entry to mark completed"),
            Err(e) => {
                warn!(task = %task.uid, error = %e, "failed to mark reminder completed");
                outcome.index_error = Some(e.to_string());
            }
        }
        Ok(outcome)
    }

    /// Reschedules every active task. This is the manual heal path for
    /// reminders the reconciler reports as missing.
    pub async fn refresh_all(&self, repo: &dyn TaskRepository) -> Result<RefreshReport> {
        let tasks = repo.list(&TaskFilter::active()).await?;
        let mut report = RefreshReport::default();
        for task in &tasks {
            let outcome = self.reschedule_for_task(task).await?;
            report.tasks += 1;
            report.triggers += outcome.scheduled.triggers.len();
            report.failures.extend(
                outcome
                    .scheduled
                    .failures
                    .into_iter()
                    .map(|f| (task.uid.clone(), f)),
            );
        }
        info!(tasks = report.tasks, triggers = report.triggers, "reminders refreshed");
        Ok(report)
    }

    async fn cancel_triggers(&self, task_uid: &str) -> Result<CancelOutcome> {
        let pending = self.notifier.list_all().await?;
        let mut outcome = CancelOutcome::default();
        for trigger in pending.iter().filter(|t| t.payload.task_uid == task_uid) {
            match self.notifier.cancel(&trigger.handle).await {
                Ok(()) => outcome.canceled += 1,
                Err(NotifyError::UnknownHandle(_)) => {
                    debug!(handle = %trigger.handle, "trigger already gone");
                }
                Err(error) => {
                    warn!(task = %task_uid, handle = %trigger.handle, %error, "failed to cancel trigger");
                    outcome.failures.push(CancelFailure {
                        handle: trigger.handle.clone(),
                        error,
                    });
                }
            }
        }
        if outcome.canceled > 0 {
            info!(task = %task_uid, canceled = outcome.canceled, "reminders canceled");
        }
        Ok(outcome)
    }
}

fn content_for(task: &Task, offset_minutes: u32) -> NotificationContent {
    let body = match &task.description {
        Some(d) if !d.trim().is_empty() => d.clone(),
        _ => describe_offset(offset_minutes),
    };
    NotificationContent {
        title: task.title.clone(),
        body,
    }
}

/// Human wording of an alert offset ("Due now", "Due in 1h 30m").
pub fn describe_offset(offset_minutes: u32) -> String {
    let (h, m) = (offset_minutes / 60, offset_minutes % 60);
    match (h, m) {
        (0, 0) => "Due now".to_string(),
        (0, m) => format!("Due in {m}m"),
        (h, 0) => format!("Due in {h}h"),
        (h, m) => format!("Due in {h}h {m}m"),
    }
}

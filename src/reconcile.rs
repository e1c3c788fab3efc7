//! Heals drift between the task store, the platform's pending triggers, and
//! the notification index.
//!
//! Runs on cold start, on return to foreground, and on user request. It only
//! ever cancels triggers and edits the index; it never schedules.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::diagnostics::TEST_TRIGGER_UID;
use crate::due::{fire_instant, DueResolver};
use crate::error::{NotifyError, Result};
use crate::index::NotificationIndex;
use crate::models::{IndexEntry, PendingTrigger, Task, TriggerHandle};
use crate::notifier::NotificationService;
use crate::repository::{TaskFilter, TaskRepository};

/// Thresholds used by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// How far a trigger may sit from its recomputed fire instant.
    pub fire_tolerance_secs: i64,
    /// How long an unfired, incomplete entry survives past its fire instant.
    pub expired_grace_hours: i64,
    /// How long completed entries are kept for history.
    pub history_retention_days: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            fire_tolerance_secs: 60,
            expired_grace_hours: 24,
            history_retention_days: 7,
        }
    }
}

impl ReconcileConfig {
    /// Largest accepted value for each threshold.
    pub const MAX_TOLERANCE_SECS: i64 = 86_400;
    pub const MAX_GRACE_HOURS: i64 = 24 * 3_650;
    pub const MAX_RETENTION_DAYS: i64 = 3_650;

    /// Out-of-range thresholds saturate, so an unchecked config never panics.
    fn tolerance(&self) -> Duration {
        Duration::try_seconds(self.fire_tolerance_secs.clamp(0, Self::MAX_TOLERANCE_SECS))
            .unwrap_or(Duration::zero())
    }

    fn grace(&self) -> Duration {
        Duration::try_hours(self.expired_grace_hours.clamp(0, Self::MAX_GRACE_HOURS))
            .unwrap_or(Duration::zero())
    }

    fn retention(&self) -> Duration {
        Duration::try_days(self.history_retention_days.clamp(0, Self::MAX_RETENTION_DAYS))
            .unwrap_or(Duration::zero())
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Why a trigger or entry was judged out of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    TaskMissing,
    TaskDeleted,
    TaskCompleted,
    NoDueInstant,
    OffsetRemoved,
    FireInstantMoved,
    Expired,
    HistoryExpired,
}

impl std::fmt::Display for DriftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriftKind::TaskMissing => "task missing",
            DriftKind::TaskDeleted => "task deleted",
            DriftKind::TaskCompleted => "task completed",
            DriftKind::NoDueInstant => "no due instant",
            DriftKind::OffsetRemoved => "offset removed",
            DriftKind::FireInstantMoved => "fire instant moved",
            DriftKind::Expired => "expired",
            DriftKind::HistoryExpired => "history expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanTrigger {
    pub handle: TriggerHandle,
    pub task_uid: String,
    pub offset_minutes: u32,
    pub fire_at: DateTime<Utc>,
    pub reason: DriftKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrunedEntry {
    pub task_uid: String,
    pub fire_at: DateTime<Utc>,
    pub reason: DriftKind,
}

/// A task the index says should have reminders that the platform lacks.
/// Reported only; the user heals it with a refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingSchedule {
    pub task_uid: String,
    pub title: String,
    pub expected: usize,
    pub pending: usize,
    /// Future offsets with no live trigger.
    pub missing_offsets: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileFailure {
    Cancel {
        handle: TriggerHandle,
        error: String,
    },
    Index {
        task_uid: String,
        error: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub removed_orphans: Vec<OrphanTrigger>,
    pub pruned_expired: Vec<PrunedEntry>,
    /// Entries whose first reminder fired and that now point at the next one.
    pub advanced_entries: Vec<String>,
    /// Entries flagged completed because their task is.
    pub completed_entries: Vec<String>,
    pub missing_schedules: Vec<MissingSchedule>,
    pub errors: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.removed_orphans.is_empty()
            && self.pruned_expired.is_empty()
            && self.advanced_entries.is_empty()
            && self.completed_entries.is_empty()
            && self.missing_schedules.is_empty()
            && self.errors.is_empty()
    }
}

pub struct Reconciler {
    repo: Arc<dyn TaskRepository>,
    notifier: Arc<dyn NotificationService>,
    index: Arc<NotificationIndex>,
    clock: Arc<dyn Clock>,
    due: DueResolver,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        notifier: Arc<dyn NotificationService>,
        index: Arc<NotificationIndex>,
        clock: Arc<dyn Clock>,
        due: DueResolver,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            repo,
            notifier,
            index,
            clock,
            due,
            config,
        }
    }

    pub async fn run(&self) -> Result<ReconcileReport> {
        let now = self.clock.now();
        let pending = self.notifier.list_all().await?;
        let entries = self.index.list_all().await;

        let uids: HashSet<&str> = pending
            .iter()
            .map(|t| t.payload.task_uid.as_str())
            .chain(entries.iter().map(|e| e.task_uid.as_str()))
            .filter(|uid| *uid != TEST_TRIGGER_UID)
            .collect();
        let tasks: HashMap<String, Task> = self
            .repo
            .list(&TaskFilter::by_uids(uids).including_deleted())
            .await?
            .into_iter()
            .map(|t| (t.uid.clone(), t))
            .collect();

        let mut report = ReconcileReport::default();
        let live = self.cancel_orphans(pending, &tasks, &mut report).await;
        self.repair_entries(now, entries, &tasks, &live, &mut report)
            .await;

        info!(
            orphans = report.removed_orphans.len(),
            pruned = report.pruned_expired.len(),
            missing = report.missing_schedules.len(),
            errors = report.errors.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Cancels orphaned triggers and returns the ones left pending.
    async fn cancel_orphans(
        &self,
        pending: Vec<PendingTrigger>,
        tasks: &HashMap<String, Task>,
        report: &mut ReconcileReport,
    ) -> Vec<PendingTrigger> {
        let mut live = Vec::with_capacity(pending.len());
        for trigger in pending {
            if trigger.payload.task_uid == TEST_TRIGGER_UID {
                live.push(trigger);
                continue;
            }
            let Some(reason) = self.orphan_reason(&trigger, tasks.get(&trigger.payload.task_uid)) else {
                live.push(trigger);
                continue;
            };
            match self.notifier.cancel(&trigger.handle).await {
                Ok(()) | Err(NotifyError::UnknownHandle(_)) => {
                    info!(handle = %trigger.handle, task = %trigger.payload.task_uid, %reason, "orphaned trigger canceled");
                    report.removed_orphans.push(OrphanTrigger {
                        handle: trigger.handle,
                        task_uid: trigger.payload.task_uid,
                        offset_minutes: trigger.payload.offset_minutes,
                        fire_at: trigger.fire_at,
                        reason,
                    });
                }
                Err(error) => {
                    warn!(handle = %trigger.handle, %error, "failed to cancel orphaned trigger");
                    report.errors.push(ReconcileFailure::Cancel {
                        handle: trigger.handle.clone(),
                        error: error.to_string(),
                    });
                    live.push(trigger);
                }
            }
        }
        live
    }

    fn orphan_reason(&self, trigger: &PendingTrigger, task: Option<&Task>) -> Option<DriftKind> {
        let Some(task) = task else {
            return Some(DriftKind::TaskMissing);
        };
        if task.deleted_at.is_some() {
            return Some(DriftKind::TaskDeleted);
        }
        if task.completed {
            return Some(DriftKind::TaskCompleted);
        }
        let Some(due) = self.due.due_instant(task) else {
            return Some(DriftKind::NoDueInstant);
        };
        let offset = trigger.payload.offset_minutes;
        if !task.alert_offsets.contains(&offset) {
            return Some(DriftKind::OffsetRemoved);
        }
        let drift = (fire_instant(due, offset) - trigger.fire_at).abs();
        if drift > self.config.tolerance() {
            return Some(DriftKind::FireInstantMoved);
        }
        None
    }

    async fn repair_entries(
        &self,
        now: DateTime<Utc>,
        entries: Vec<IndexEntry>,
        tasks: &HashMap<String, Task>,
        live: &[PendingTrigger],
        report: &mut ReconcileReport,
    ) {
        let mut by_task: HashMap<&str, Vec<&PendingTrigger>> = HashMap::new();
        for t in live {
            by_task.entry(t.payload.task_uid.as_str()).or_default().push(t);
        }

        for entry in entries {
            let uid = entry.task_uid.clone();
            let pending = by_task.get(uid.as_str()).map(Vec::as_slice).unwrap_or(&[]);

            let prune = match tasks.get(&uid) {
                None => Some(DriftKind::TaskMissing),
                Some(t) if t.deleted_at.is_some() => Some(DriftKind::TaskDeleted),
                _ if entry.completed && entry.fire_at < cutoff(now, self.config.retention()) => {
                    Some(DriftKind::HistoryExpired)
                }
                _ if !entry.completed
                    && pending.is_empty()
                    && entry.fire_at < cutoff(now, self.config.grace()) =>
                {
                    Some(DriftKind::Expired)
                }
                _ => None,
            };
            if let Some(reason) = prune {
                match self.index.remove(&uid).await {
                    Ok(_) => {
                        info!(task = %uid, %reason, "reminder entry pruned");
                        report.pruned_expired.push(PrunedEntry {
                            task_uid: uid,
                            fire_at: entry.fire_at,
                            reason,
                        });
                    }
                    Err(e) => report.errors.push(ReconcileFailure::Index {
                        task_uid: uid,
                        error: e.to_string(),
                    }),
                }
                continue;
            }

            let Some(task) = tasks.get(&uid) else {
                continue;
            };
            if entry.completed {
                continue;
            }
            if task.completed {
                match self.index.mark_completed(&uid, true).await {
                    Ok(_) => report.completed_entries.push(uid),
                    Err(e) => report.errors.push(ReconcileFailure::Index {
                        task_uid: uid,
                        error: e.to_string(),
                    }),
                }
                continue;
            }

            if entry.fire_at < now {
                if let Some(next) = pending.iter().map(|t| t.fire_at).min() {
                    let mut advanced = entry.clone();
                    advanced.fire_at = next;
                    advanced.offsets = pending.iter().map(|t| t.payload.offset_minutes).collect();
                    advanced.offsets.sort_unstable();
                    match self.index.upsert(&uid, advanced).await {
                        Ok(()) => report.advanced_entries.push(uid.clone()),
                        Err(e) => report.errors.push(ReconcileFailure::Index {
                            task_uid: uid.clone(),
                            error: e.to_string(),
                        }),
                    }
                }
            }

            let expected = self.expected_offsets(task, now);
            let live_offsets: BTreeSet<u32> = pending.iter().map(|t| t.payload.offset_minutes).collect();
            let missing: Vec<u32> = expected.difference(&live_offsets).copied().collect();
            if !missing.is_empty() {
                warn!(task = %uid, ?missing, pending = pending.len(), "reminders missing from platform");
                report.missing_schedules.push(MissingSchedule {
                    task_uid: uid,
                    title: task.title.clone(),
                    expected: expected.len(),
                    pending: pending.len(),
                    missing_offsets: missing,
                });
            }
        }
    }

    fn expected_offsets(&self, task: &Task, now: DateTime<Utc>) -> BTreeSet<u32> {
        let Some(due) = self.due.due_instant(task) else {
            return BTreeSet::new();
        };
        task.alert_offsets
            .iter()
            .copied()
            .filter(|&o| fire_instant(due, o) > now)
            .collect()
    }
}

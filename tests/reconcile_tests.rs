mod common;

use chrono::{Duration, NaiveTime};
use common::{at, task_due_at_three, Harness};
use remindust::diagnostics::{send_test_trigger, TEST_TRIGGER_UID};
use remindust::models::{IndexEntry, Task};
use remindust::reconcile::{DriftKind, ReconcileConfig, Reconciler};

async fn stored(h: &Harness, offsets: &[u32]) -> Task {
    h.tasks.create(task_due_at_three(offsets)).await.unwrap()
}

#[tokio::test]
async fn hard_deleted_task_loses_trigger_and_entry() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = stored(&h, &[15]).await;
    h.scheduler.schedule_for_task(&task).await.unwrap();

    // Out of band: nobody tells the scheduler.
    h.tasks.hard_delete(task.id).await.unwrap();
    let report = h.reconciler.run().await.unwrap();

    assert_eq!(report.removed_orphans.len(), 1);
    assert_eq!(report.removed_orphans[0].reason, DriftKind::TaskMissing);
    assert!(h.notifier.pending().is_empty());
    assert_eq!(report.pruned_expired.len(), 1);
    assert_eq!(report.pruned_expired[0].task_uid, task.uid);
    assert!(h.index.get(&task.uid).await.is_none());
}

#[tokio::test]
async fn completed_and_soft_deleted_tasks_are_orphans_active_ones_are_not() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let done = stored(&h, &[60, 15]).await;
    let gone = stored(&h, &[30]).await;
    let active = stored(&h, &[60, 15]).await;
    for t in [&done, &gone, &active] {
        h.scheduler.schedule_for_task(t).await.unwrap();
    }
    let active_before = h.notifier.pending_for(&active.uid);

    h.tasks.complete(done.id, h.now()).await.unwrap();
    h.tasks.soft_delete(gone.id, h.now()).await.unwrap();
    let report = h.reconciler.run().await.unwrap();

    assert!(h.notifier.pending_for(&done.uid).is_empty());
    assert!(h.notifier.pending_for(&gone.uid).is_empty());
    assert_eq!(h.notifier.pending_for(&active.uid), active_before);
    assert_eq!(report.removed_orphans.len(), 3);
    assert!(report
        .removed_orphans
        .iter()
        .all(|o| o.task_uid != active.uid));
    assert!(report
        .removed_orphans
        .iter()
        .any(|o| o.reason == DriftKind::TaskCompleted));
    assert!(report
        .removed_orphans
        .iter()
        .any(|o| o.reason == DriftKind::TaskDeleted));

    // The completed task's entry stays, flagged for history.
    assert!(h.index.get(&done.uid).await.unwrap().completed);
    assert_eq!(report.completed_entries, vec![done.uid.clone()]);
    assert!(h.index.get(&gone.uid).await.is_none());
}

#[tokio::test]
async fn moved_due_time_makes_trigger_stale() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let mut task = stored(&h, &[15]).await;
    h.scheduler.schedule_for_task(&task).await.unwrap();

    task.start_time = NaiveTime::from_hms_opt(18, 0, 0);
    h.tasks.update(task.clone()).await.unwrap();
    let report = h.reconciler.run().await.unwrap();

    assert_eq!(report.removed_orphans.len(), 1);
    assert_eq!(report.removed_orphans[0].reason, DriftKind::FireInstantMoved);
    // The new schedule is not recreated, only reported.
    assert_eq!(report.missing_schedules.len(), 1);
    assert_eq!(report.missing_schedules[0].expected, 1);
    assert_eq!(report.missing_schedules[0].pending, 0);
    assert!(h.notifier.pending().is_empty());
}

#[tokio::test]
async fn small_drift_is_tolerated() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = stored(&h, &[15]).await;
    h.notifier
        .plant(&task, 15, at("2025-01-10T14:45:30Z"));

    let report = h.reconciler.run().await.unwrap();
    assert!(report.removed_orphans.is_empty());
    assert_eq!(h.notifier.pending().len(), 1);
}

#[tokio::test]
async fn removed_offset_is_an_orphan() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let mut task = stored(&h, &[60, 15]).await;
    h.scheduler.schedule_for_task(&task).await.unwrap();

    task.alert_offsets.remove(&60);
    h.tasks.update(task.clone()).await.unwrap();
    let report = h.reconciler.run().await.unwrap();

    assert_eq!(report.removed_orphans.len(), 1);
    assert_eq!(report.removed_orphans[0].offset_minutes, 60);
    assert_eq!(report.removed_orphans[0].reason, DriftKind::OffsetRemoved);
    assert_eq!(h.notifier.pending_for(&task.uid).len(), 1);
}

#[tokio::test]
async fn expired_entries_are_pruned_after_grace() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = stored(&h, &[15]).await;
    h.scheduler.schedule_for_task(&task).await.unwrap();
    // The platform delivered the reminder and forgot about it.
    let handle = h.notifier.pending()[0].handle.clone();
    use remindust::notifier::NotificationService;
    h.notifier.cancel(&handle).await.unwrap();

    h.clock.set(at("2025-01-11T14:00:00Z"));
    let early = h.reconciler.run().await.unwrap();
    assert!(early.pruned_expired.is_empty());
    assert!(h.index.get(&task.uid).await.is_some());

    h.clock.advance(Duration::hours(1));
    let late = h.reconciler.run().await.unwrap();
    assert_eq!(late.pruned_expired.len(), 1);
    assert_eq!(late.pruned_expired[0].reason, DriftKind::Expired);
    assert!(h.index.get(&task.uid).await.is_none());
    assert_eq!(h.notifier.schedule_calls(), 1);
}

#[tokio::test]
async fn fired_entry_advances_to_next_pending_trigger() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = stored(&h, &[60, 15]).await;
    h.scheduler.schedule_for_task(&task).await.unwrap();
    let first = h
        .notifier
        .pending_for(&task.uid)
        .into_iter()
        .find(|t| t.payload.offset_minutes == 60)
        .unwrap();
    use remindust::notifier::NotificationService;
    h.notifier.cancel(&first.handle).await.unwrap();

    h.clock.set(at("2025-01-10T14:10:00Z"));
    let report = h.reconciler.run().await.unwrap();

    assert_eq!(report.advanced_entries, vec![task.uid.clone()]);
    let entry = h.index.get(&task.uid).await.unwrap();
    assert_eq!(entry.fire_at, at("2025-01-10T14:45:00Z"));
    assert_eq!(entry.offsets, vec![15]);
    assert!(report.missing_schedules.is_empty());
}

#[tokio::test]
async fn completed_history_expires() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = stored(&h, &[15]).await;
    h.index
        .upsert(
            &task.uid,
            IndexEntry {
                task_uid: task.uid.clone(),
                title: task.title.clone(),
                description: None,
                fire_at: at("2025-01-02T09:00:00Z"),
                offsets: vec![15],
                completed: true,
                last_updated: at("2025-01-02T09:00:00Z"),
            },
        )
        .await
        .unwrap();

    let report = h.reconciler.run().await.unwrap();
    assert_eq!(report.pruned_expired.len(), 1);
    assert_eq!(report.pruned_expired[0].reason, DriftKind::HistoryExpired);
}

#[tokio::test]
async fn reconciliation_never_schedules() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let a = stored(&h, &[60, 15]).await;
    let b = stored(&h, &[30]).await;
    h.scheduler.schedule_for_task(&a).await.unwrap();
    h.scheduler.schedule_for_task(&b).await.unwrap();
    let calls = h.notifier.schedule_calls();

    // Index believes in reminders the platform lost.
    for t in h.notifier.pending() {
        use remindust::notifier::NotificationService;
        h.notifier.cancel(&t.handle).await.unwrap();
    }
    h.tasks.hard_delete(b.id).await.unwrap();
    let report = h.reconciler.run().await.unwrap();

    assert_eq!(h.notifier.schedule_calls(), calls);
    assert!(h.notifier.pending().is_empty());
    assert_eq!(report.missing_schedules.len(), 1);
    assert_eq!(report.missing_schedules[0].task_uid, a.uid);
    assert_eq!(report.missing_schedules[0].expected, 2);
}

#[tokio::test]
async fn failed_cancel_lands_in_errors() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = stored(&h, &[15]).await;
    let out = h.scheduler.schedule_for_task(&task).await.unwrap();
    h.notifier.fail_cancel(&out.triggers[0].handle);
    h.tasks.complete(task.id, h.now()).await.unwrap();

    let report = h.reconciler.run().await.unwrap();
    assert!(report.removed_orphans.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(h.notifier.pending().len(), 1);
}

#[tokio::test]
async fn test_triggers_are_left_alone() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    send_test_trigger(h.notifier.as_ref(), h.clock.as_ref(), Duration::seconds(30))
        .await
        .unwrap();

    let report = h.reconciler.run().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(h.notifier.pending_for(TEST_TRIGGER_UID).len(), 1);
}

#[tokio::test]
async fn clean_state_reports_clean() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = stored(&h, &[60, 15]).await;
    h.scheduler.schedule_for_task(&task).await.unwrap();

    let report = h.reconciler.run().await.unwrap();
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn extreme_thresholds_do_not_panic() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = stored(&h, &[15]).await;
    h.scheduler.schedule_for_task(&task).await.unwrap();
    let config = ReconcileConfig {
        fire_tolerance_secs: i64::MAX,
        expired_grace_hours: i64::MAX,
        history_retention_days: i64::MIN,
    };
    let reconciler = Reconciler::new(
        h.tasks.clone(),
        h.notifier.clone(),
        h.index.clone(),
        h.clock.clone(),
        common::utc_resolver(),
        config,
    );

    let report = reconciler.run().await.unwrap();
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn duplicate_triggers_do_not_hide_a_missing_offset() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = stored(&h, &[60, 15]).await;
    h.scheduler.schedule_for_task(&task).await.unwrap();
    h.scheduler.schedule_for_task(&task).await.unwrap();
    use remindust::notifier::NotificationService;
    for t in h.notifier.pending_for(&task.uid) {
        if t.payload.offset_minutes == 60 {
            h.notifier.cancel(&t.handle).await.unwrap();
        }
    }
    assert_eq!(h.notifier.pending_for(&task.uid).len(), 2);

    let report = h.reconciler.run().await.unwrap();
    assert_eq!(report.missing_schedules.len(), 1);
    assert_eq!(report.missing_schedules[0].missing_offsets, vec![60]);
    assert_eq!(report.missing_schedules[0].pending, 2);
}

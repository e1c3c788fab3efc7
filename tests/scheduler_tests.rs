mod common;

use chrono::Duration;
use common::{at, task_due_at_three, Harness};
use remindust::scheduler::ReminderState;
use remindust::{NotifyError, ReminderError};

#[tokio::test]
async fn past_offsets_are_skipped() {
    let h = Harness::new("2025-01-10T14:50:00Z");
    let task = task_due_at_three(&[60, 5]);

    let out = h.scheduler.schedule_for_task(&task).await.unwrap();

    assert_eq!(out.skipped, vec![60]);
    assert_eq!(out.triggers.len(), 1);
    let pending = h.notifier.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].fire_at, at("2025-01-10T14:55:00Z"));
    assert_eq!(pending[0].payload.offset_minutes, 5);
    assert_eq!(pending[0].payload.task_uid, task.uid);
}

#[tokio::test]
async fn one_trigger_per_future_offset() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = task_due_at_three(&[60, 15]);

    let out = h.scheduler.schedule_for_task(&task).await.unwrap();
    assert_eq!(out.state(), ReminderState::Scheduled);

    let mut fires: Vec<_> = h.notifier.pending().iter().map(|t| t.fire_at).collect();
    fires.sort();
    assert_eq!(fires, vec![at("2025-01-10T14:00:00Z"), at("2025-01-10T14:45:00Z")]);

    let entry = h.index.get(&task.uid).await.unwrap();
    assert_eq!(entry.fire_at, at("2025-01-10T14:00:00Z"));
    assert_eq!(entry.offsets, vec![15, 60]);
    assert!(!entry.completed);
}

#[tokio::test]
async fn fire_instant_equal_to_now_is_skipped() {
    let h = Harness::new("2025-01-10T14:00:00Z");
    let task = task_due_at_three(&[60]);

    let out = h.scheduler.schedule_for_task(&task).await.unwrap();
    assert!(out.triggers.is_empty());
    assert_eq!(out.state(), ReminderState::NoAlerts);
    assert!(h.index.get(&task.uid).await.is_none());
}

#[tokio::test]
async fn no_due_instant_or_offsets_is_a_noop() {
    let h = Harness::new("2025-01-01T00:00:00Z");

    let mut no_due = task_due_at_three(&[5]);
    no_due.due_date = None;
    let no_offsets = task_due_at_three(&[]);

    for task in [no_due, no_offsets] {
        let out = h.scheduler.schedule_for_task(&task).await.unwrap();
        assert!(out.triggers.is_empty());
        assert!(out.failures.is_empty());
    }
    h.notifier.deny();
    // Nothing to schedule, so permission is never consulted.
    let out = h.scheduler.schedule_for_task(&task_due_at_three(&[])).await.unwrap();
    assert!(out.triggers.is_empty());
    assert_eq!(h.notifier.schedule_calls(), 0);
}

#[tokio::test]
async fn permission_denied_is_fatal_and_makes_no_calls() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    h.notifier.deny();

    let err = h
        .scheduler
        .schedule_for_task(&task_due_at_three(&[60, 15]))
        .await
        .unwrap_err();

    assert!(matches!(err, ReminderError::PermissionDenied));
    assert_eq!(h.notifier.schedule_calls(), 0);
    assert!(h.index.list_all().await.is_empty());
}

#[tokio::test]
async fn per_offset_failures_do_not_stop_siblings() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    h.notifier.fail_offset(60);
    let task = task_due_at_three(&[60, 30, 15]);

    let out = h.scheduler.schedule_for_task(&task).await.unwrap();

    assert_eq!(out.triggers.len(), 2);
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].offset_minutes, 60);
    assert!(matches!(out.failures[0].error, NotifyError::Unavailable(_)));
    assert_eq!(out.state(), ReminderState::PartiallyScheduled);
    assert_eq!(h.notifier.pending_for(&task.uid).len(), 2);
    assert_eq!(
        h.index.get(&task.uid).await.unwrap().fire_at,
        at("2025-01-10T14:30:00Z")
    );
}

#[tokio::test]
async fn scheduling_twice_duplicates_triggers() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = task_due_at_three(&[15]);

    h.scheduler.schedule_for_task(&task).await.unwrap();
    h.scheduler.schedule_for_task(&task).await.unwrap();

    let pending = h.notifier.pending_for(&task.uid);
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|t| t.payload.offset_minutes == 15));
}

#[tokio::test]
async fn cancel_clears_triggers_and_is_idempotent() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = task_due_at_three(&[60, 15]);
    let mut other = task_due_at_three(&[30]);
    other.uid = "other".into();
    h.scheduler.schedule_for_task(&task).await.unwrap();
    h.scheduler.schedule_for_task(&other).await.unwrap();

    let first = h.scheduler.cancel_for_task(&task.uid).await.unwrap();
    assert_eq!(first.canceled, 2);
    assert_eq!(first.state(), ReminderState::Canceled);
    assert!(h.notifier.pending_for(&task.uid).is_empty());
    assert!(h.index.get(&task.uid).await.is_none());
    assert_eq!(h.notifier.pending_for("other").len(), 1);

    let second = h.scheduler.cancel_for_task(&task.uid).await.unwrap();
    assert_eq!(second.canceled, 0);
    assert!(second.failures.is_empty());
}

#[tokio::test]
async fn reschedule_twice_converges() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = task_due_at_three(&[60, 15]);

    let snapshot = |h: &Harness| {
        let mut v: Vec<_> = h
            .notifier
            .pending()
            .into_iter()
            .map(|t| (t.payload.offset_minutes, t.fire_at))
            .collect();
        v.sort();
        v
    };

    h.scheduler.reschedule_for_task(&task).await.unwrap();
    let once = snapshot(&h);
    let out = h.scheduler.reschedule_for_task(&task).await.unwrap();
    let twice = snapshot(&h);

    assert_eq!(out.canceled.canceled, 2);
    assert_eq!(once, twice);
    assert_eq!(twice.len(), 2);
}

#[tokio::test]
async fn reschedule_follows_moved_due_time() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let mut task = task_due_at_three(&[15]);
    h.scheduler.schedule_for_task(&task).await.unwrap();

    task.start_time = chrono::NaiveTime::from_hms_opt(17, 0, 0);
    h.scheduler.reschedule_for_task(&task).await.unwrap();

    let pending = h.notifier.pending_for(&task.uid);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].fire_at, at("2025-01-10T16:45:00Z"));
}

#[tokio::test]
async fn reschedule_into_the_past_drops_the_entry() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let mut task = task_due_at_three(&[15]);
    h.scheduler.schedule_for_task(&task).await.unwrap();

    task.start_time = chrono::NaiveTime::from_hms_opt(12, 0, 0);
    let out = h.scheduler.reschedule_for_task(&task).await.unwrap();

    assert_eq!(out.scheduled.skipped, vec![15]);
    assert!(h.notifier.pending().is_empty());
    assert!(h.index.get(&task.uid).await.is_none());
}

#[tokio::test]
async fn completion_cancels_but_keeps_entry() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let mut task = task_due_at_three(&[60, 15]);
    h.scheduler.schedule_for_task(&task).await.unwrap();
    assert_eq!(h.notifier.pending_for(&task.uid).len(), 2);

    h.clock.advance(Duration::minutes(5));
    task.completed = true;
    let out = h.scheduler.notify_completed(&task).await.unwrap();

    assert_eq!(out.canceled, 2);
    assert_eq!(out.state(), ReminderState::Completed);
    assert!(h.notifier.pending_for(&task.uid).is_empty());
    let entry = h.index.get(&task.uid).await.unwrap();
    assert!(entry.completed);
    assert_eq!(entry.last_updated, at("2025-01-10T13:05:00Z"));
    assert!(h.index.list_upcoming(h.now()).await.is_empty());
}

#[tokio::test]
async fn completed_tasks_are_never_scheduled() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let mut task = task_due_at_three(&[15]);
    task.completed = true;

    let out = h.scheduler.schedule_for_task(&task).await.unwrap();
    assert!(out.triggers.is_empty());
    assert_eq!(h.notifier.schedule_calls(), 0);
}

#[tokio::test]
async fn failed_cancel_is_reported_not_fatal() {
    let h = Harness::new("2025-01-10T13:00:00Z");
    let task = task_due_at_three(&[60, 15]);
    let out = h.scheduler.schedule_for_task(&task).await.unwrap();
    h.notifier.fail_cancel(&out.triggers[0].handle);

    let canceled = h.scheduler.cancel_for_task(&task.uid).await.unwrap();
    assert_eq!(canceled.canceled, 1);
    assert_eq!(canceled.failures.len(), 1);
    assert_eq!(canceled.failures[0].handle, out.triggers[0].handle);
    assert_eq!(canceled.state(), ReminderState::PartiallyScheduled);
}

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use remindust::clock::{Clock, ManualClock};
use remindust::due::{DueResolver, Zone};
use remindust::index::NotificationIndex;
use remindust::models::{NotificationContent, PendingTrigger, Task, TriggerHandle, TriggerPayload};
use remindust::notifier::NotificationService;
use remindust::reconcile::{ReconcileConfig, Reconciler};
use remindust::repository::TaskStore;
use remindust::scheduler::NotificationScheduler;
use remindust::NotifyError;

/// In-memory notification service with failure injection and call counters.
#[derive(Default)]
pub struct FakeNotifier {
    pub denied: AtomicBool,
    /// Offsets whose `schedule` call fails as unavailable.
    pub failing_offsets: Mutex<HashSet<u32>>,
    /// Handles whose `cancel` call fails as unavailable.
    pub failing_cancels: Mutex<HashSet<String>>,
    pub schedule_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pending: Mutex<Vec<PendingTrigger>>,
    next: AtomicUsize,
}

impl FakeNotifier {
    pub fn deny(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }

    pub fn fail_offset(&self, offset: u32) {
        self.failing_offsets.lock().unwrap().insert(offset);
    }

    pub fn fail_cancel(&self, handle: &TriggerHandle) {
        self.failing_cancels.lock().unwrap().insert(handle.0.clone());
    }

    pub fn pending(&self) -> Vec<PendingTrigger> {
        self.pending.lock().unwrap().clone()
    }

    pub fn pending_for(&self, uid: &str) -> Vec<PendingTrigger> {
        self.pending()
            .into_iter()
            .filter(|t| t.payload.task_uid == uid)
            .collect()
    }

    /// Plants a trigger as if some earlier run had scheduled it.
    pub fn plant(&self, task: &Task, offset: u32, fire_at: DateTime<Utc>) -> TriggerHandle {
        let handle = TriggerHandle(format!("planted-{}", self.next.fetch_add(1, Ordering::SeqCst)));
        self.pending.lock().unwrap().push(PendingTrigger {
            handle: handle.clone(),
            payload: TriggerPayload {
                task_id: task.id,
                task_uid: task.uid.clone(),
                offset_minutes: offset,
            },
            fire_at,
            content: NotificationContent::default(),
        });
        handle
    }

    pub fn schedule_calls(&self) -> usize {
        self.schedule_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationService for FakeNotifier {
    async fn request_permission(&self) -> Result<bool, NotifyError> {
        Ok(!self.denied.load(Ordering::SeqCst))
    }

    async fn schedule(
        &self,
        fire_at: DateTime<Utc>,
        content: &NotificationContent,
        payload: &TriggerPayload,
    ) -> Result<TriggerHandle, NotifyError> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        if self.denied.load(Ordering::SeqCst) {
            return Err(NotifyError::PermissionDenied);
        }
        if self.failing_offsets.lock().unwrap().contains(&payload.offset_minutes) {
            return Err(NotifyError::Unavailable("injected".into()));
        }
        let handle = TriggerHandle(format!("h-{}", self.next.fetch_add(1, Ordering::SeqCst)));
        self.pending.lock().unwrap().push(PendingTrigger {
            handle: handle.clone(),
            payload: payload.clone(),
            fire_at,
            content: content.clone(),
        });
        Ok(handle)
    }

    async fn cancel(&self, handle: &TriggerHandle) -> Result<(), NotifyError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_cancels.lock().unwrap().contains(&handle.0) {
            return Err(NotifyError::Unavailable("injected".into()));
        }
        let mut pending = self.pending.lock().unwrap();
        let pos = pending
            .iter()
            .position(|t| &t.handle == handle)
            .ok_or_else(|| NotifyError::UnknownHandle(handle.0.clone()))?;
        pending.remove(pos);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<PendingTrigger>, NotifyError> {
        Ok(self.pending())
    }
}

pub fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn utc_resolver() -> DueResolver {
    DueResolver::new(Zone::Utc, NaiveTime::from_hms_opt(9, 0, 0).unwrap())
}

/// Task due 2025-01-10 15:00 UTC with the given offsets.
pub fn task_due_at_three(offsets: &[u32]) -> Task {
    let mut t = Task::new(1, "Dentist", at("2025-01-01T00:00:00Z"));
    t.due_date = NaiveDate::from_ymd_opt(2025, 1, 10);
    t.start_time = NaiveTime::from_hms_opt(15, 0, 0);
    t.alert_offsets = offsets.iter().copied().collect();
    t
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<FakeNotifier>,
    pub index: Arc<NotificationIndex>,
    pub tasks: Arc<TaskStore>,
    pub scheduler: NotificationScheduler,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn new(now: &str) -> Self {
        let clock = Arc::new(ManualClock::new(at(now)));
        let notifier = Arc::new(FakeNotifier::default());
        let index = Arc::new(NotificationIndex::in_memory(clock.clone()));
        let tasks = Arc::new(TaskStore::in_memory());
        let scheduler = NotificationScheduler::new(
            notifier.clone(),
            index.clone(),
            clock.clone(),
            utc_resolver(),
        );
        let reconciler = Reconciler::new(
            tasks.clone(),
            notifier.clone(),
            index.clone(),
            clock.clone(),
            utc_resolver(),
            ReconcileConfig::default(),
        );
        Self {
            clock,
            notifier,
            index,
            tasks,
            scheduler,
            reconciler,
        }
    }
}

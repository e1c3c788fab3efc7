use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, error, warn};

use crate::models::Task;
use crate::scheduler::NotificationScheduler;

/// Change notification published by the task store after a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Created(Task),
    Updated(Task),
    Completed(Task),
    Deleted { id: u64, uid: String },
}

impl TaskEvent {
    pub fn task_uid(&self) -> &str {
        match self {
            TaskEvent::Created(t) | TaskEvent::Updated(t) | TaskEvent::Completed(t) => &t.uid,
            TaskEvent::Deleted { uid, .. } => uid,
        }
    }
}

/// Keeps reminders in step with task mutations.
///
/// Failures are logged and swallowed: a task save has already succeeded by
/// the time its event arrives.
pub struct ReminderSync {
    scheduler: Arc<NotificationScheduler>,
}

impl ReminderSync {
    pub fn new(scheduler: Arc<NotificationScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn handle(&self, event: &TaskEvent) {
        let uid = event.task_uid().to_string();
        let result = match event {
            TaskEvent::Created(task) | TaskEvent::Updated(task) if task.completed => {
                self.scheduler.notify_completed(task).await.map(|_| ())
            }
            TaskEvent::Created(task) | TaskEvent::Updated(task) => {
                self.scheduler.reschedule_for_task(task).await.map(|_| ())
            }
            TaskEvent::Completed(task) => self.scheduler.notify_completed(task).await.map(|_| ()),
            TaskEvent::Deleted { uid, .. } => self.scheduler.cancel_for_task(uid).await.map(|_| ()),
        };
        match result {
            Ok(()) => debug!(task = %uid, "reminders synced"),
            Err(e) => error!(task = %uid, error = %e, "reminder sync failed, task left without reminders"),
        }
    }

    /// Handles every event already queued on `rx` and returns how many ran.
    pub async fn drain(&self, rx: &mut broadcast::Receiver<TaskEvent>) -> usize {
        let mut handled = 0;
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    self.handle(&event).await;
                    handled += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "task events dropped, run reconcile to heal reminders");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return handled,
            }
        }
    }

    /// Handles events until the store is dropped.
    pub async fn run(self, mut rx: broadcast::Receiver<TaskEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.handle(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "task events dropped, run reconcile to heal reminders");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

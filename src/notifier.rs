//! Seam to the platform notification scheduler.
//!
//! The platform is the source of truth for what fires and when. The engine
//! only ever asks it to schedule, cancel, and enumerate triggers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::NotifyError;
use crate::models::{NotificationContent, PendingTrigger, TriggerHandle, TriggerPayload};
use crate::storage::{load_json, save_json};

/// Platform primitive for scheduling local notifications.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Asks for (or re-checks) permission to post notifications.
    async fn request_permission(&self) -> Result<bool, NotifyError>;

    /// Schedules a notification at `fire_at` and returns its handle.
    async fn schedule(
        &self,
        fire_at: DateTime<Utc>,
        content: &NotificationContent,
        payload: &TriggerPayload,
    ) -> Result<TriggerHandle, NotifyError>;

    /// Cancels a pending trigger.
    async fn cancel(&self, handle: &TriggerHandle) -> Result<(), NotifyError>;

    /// Lists every trigger still pending.
    async fn list_all(&self) -> Result<Vec<PendingTrigger>, NotifyError>;
}

/// Notification service for hosts without a native scheduler.
///
/// Pending triggers are kept in a JSON file (or in memory). Triggers whose
/// fire time has passed count as delivered and drop out of `list_all`.
pub struct LocalNotifier {
    path: Option<PathBuf>,
    permitted: bool,
    clock: Arc<dyn Clock>,
    pending: Mutex<Vec<PendingTrigger>>,
}

impl LocalNotifier {
    pub async fn open(
        path: impl AsRef<Path>,
        permitted: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NotifyError> {
        let path = path.as_ref().to_path_buf();
        let pending: Vec<PendingTrigger> = load_json(&path)
            .await
            .map_err(|e| NotifyError::Io(e.to_string()))?;
        Ok(Self {
            path: Some(path),
            permitted,
            clock,
            pending: Mutex::new(pending),
        })
    }

    pub fn in_memory(permitted: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: None,
            permitted,
            clock,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Writes `next` and swaps it in. A failed write leaves `current` untouched.
    async fn commit(
        &self,
        current: &mut Vec<PendingTrigger>,
        next: Vec<PendingTrigger>,
    ) -> Result<(), NotifyError> {
        if let Some(path) = &self.path {
            save_json(path, &next)
                .await
                .map_err(|e| NotifyError::Io(e.to_string()))?;
        }
        *current = next;
        Ok(())
    }

    fn deliver_due(&self, pending: &mut Vec<PendingTrigger>) -> bool {
        let now = self.clock.now();
        let before = pending.len();
        pending.retain(|t| {
            let due = t.fire_at <= now;
            if due {
                info!(handle = %t.handle, title = %t.content.title, "reminder delivered");
            }
            !due
        });
        pending.len() != before
    }
}

#[async_trait]
impl NotificationService for LocalNotifier {
    async fn request_permission(&self) -> Result<bool, NotifyError> {
        Ok(self.permitted)
    }

    async fn schedule(
        &self,
        fire_at: DateTime<Utc>,
        content: &NotificationContent,
        payload: &TriggerPayload,
    ) -> Result<TriggerHandle, NotifyError> {
        if !self.permitted {
            return Err(NotifyError::PermissionDenied);
        }
        let handle = TriggerHandle(format!("trg-{}", uuid::Uuid::new_v4()));
        let mut pending = self.pending.lock().await;
        let mut next = pending.clone();
        next.push(PendingTrigger {
            handle: handle.clone(),
            payload: payload.clone(),
            fire_at,
            content: content.clone(),
        });
        self.commit(&mut pending, next).await?;
        debug!(%handle, %fire_at, "trigger stored");
        Ok(handle)
    }

    async fn cancel(&self, handle: &TriggerHandle) -> Result<(), NotifyError> {
        let mut pending = self.pending.lock().await;
        let pos = pending
            .iter()
            .position(|t| &t.handle == handle)
            .ok_or_else(|| NotifyError::UnknownHandle(handle.0.clone()))?;
        let mut next = pending.clone();
        next.remove(pos);
        self.commit(&mut pending, next).await
    }

    async fn list_all(&self) -> Result<Vec<PendingTrigger>, NotifyError> {
        let mut pending = self.pending.lock().await;
        let mut next = pending.clone();
        if self.deliver_due(&mut next) {
            self.commit(&mut pending, next).await?;
        }
        Ok(pending.clone())
    }
}

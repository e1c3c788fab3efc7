use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::events::TaskEvent;
use crate::models::Task;
use crate::storage::{load_json, save_json};

const EVENT_CAPACITY: usize = 256;

/// Read access to persisted tasks, as needed by the reminder engine.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Loads a single non-deleted task by its storage id.
    async fn get_by_id(&self, id: u64) -> Result<Option<Task>, StoreError>;

    /// Lists tasks matching `filter`. Soft-deleted tasks are excluded unless
    /// the filter asks for them.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;
}

/// Selection criteria for [`TaskRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to these uids.
    pub uids: Option<HashSet<String>>,
    /// Restrict by completion state.
    pub completed: Option<bool>,
    /// Include soft-deleted records.
    pub include_deleted: bool,
}

impl TaskFilter {
    /// Non-deleted, incomplete tasks.
    pub fn active() -> Self {
        Self {
            completed: Some(false),
            ..Self::default()
        }
    }

    pub fn by_uids<I, S>(uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            uids: Some(uids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        if !self.include_deleted && task.deleted_at.is_some() {
            return false;
        }
        if let Some(completed) = self.completed {
            if task.completed != completed {
                return false;
            }
        }
        match &self.uids {
            Some(uids) => uids.contains(&task.uid),
            None => true,
        }
    }
}

/// JSON-file task store.
///
/// Every mutation rewrites the whole file and then publishes a [`TaskEvent`]
/// to subscribers. Publishing never fails the mutation.
pub struct TaskStore {
    path: Option<PathBuf>,
    tasks: Mutex<Vec<Task>>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskStore {
    /// Opens the store backed by `path`, loading existing tasks.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tasks: Vec<Task> = load_json(&path).await?;
        debug!(path = %path.display(), count = tasks.len(), "task store opened");
        Ok(Self::with_tasks(Some(path), tasks))
    }

    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_tasks(None, Vec::new())
    }

    fn with_tasks(path: Option<PathBuf>, tasks: Vec<Task>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            path,
            tasks: Mutex::new(tasks),
            events,
        }
    }

    /// Subscribes to task change events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Adds a new task. The storage id is assigned by the store.
    pub async fn create(&self, mut task: Task) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.lock().await;
        task.id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let mut next = tasks.clone();
        next.push(task.clone());
        self.commit(&mut tasks, next).await?;
        self.publish(TaskEvent::Created(task.clone()));
        Ok(task)
    }

    /// Replaces an existing, non-deleted task with the same id.
    pub async fn update(&self, task: Task) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.lock().await;
        let mut next = tasks.clone();
        let slot = live_mut(&mut next, task.id)?;
        *slot = task.clone();
        self.commit(&mut tasks, next).await?;
        self.publish(TaskEvent::Updated(task.clone()));
        Ok(task)
    }

    /// Marks a task as complete.
    pub async fn complete(&self, id: u64, at: DateTime<Utc>) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.lock().await;
        let mut next = tasks.clone();
        let task = live_mut(&mut next, id)?;
        task.completed = true;
        task.completed_at.get_or_insert(at);
        let task = task.clone();
        self.commit(&mut tasks, next).await?;
        self.publish(TaskEvent::Completed(task.clone()));
        Ok(task)
    }

    /// Flags a task as deleted while keeping the record.
    pub async fn soft_delete(&self, id: u64, at: DateTime<Utc>) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.lock().await;
        let mut next = tasks.clone();
        let task = live_mut(&mut next, id)?;
        task.deleted_at = Some(at);
        let task = task.clone();
        self.commit(&mut tasks, next).await?;
        self.publish(TaskEvent::Deleted {
            id,
            uid: task.uid.clone(),
        });
        Ok(task)
    }

    /// Removes a task record entirely.
    pub async fn hard_delete(&self, id: u64) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.lock().await;
        let pos = tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let mut next = tasks.clone();
        let task = next.remove(pos);
        self.commit(&mut tasks, next).await?;
        self.publish(TaskEvent::Deleted {
            id,
            uid: task.uid.clone(),
        });
        Ok(task)
    }

    /// Number of records, deleted ones included.
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Writes `next` and swaps it in. A failed write leaves `current` untouched
    /// and publishes nothing.
    async fn commit(&self, current: &mut Vec<Task>, next: Vec<Task>) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            save_json(path, &next).await?;
        }
        *current = next;
        Ok(())
    }

    fn publish(&self, event: TaskEvent) {
        if self.events.send(event).is_err() {
            // No subscriber: reminders will be healed by the next reconcile.
            warn!("task event dropped, no reminder subscriber attached");
        }
    }
}

fn live_mut(tasks: &mut [Task], id: u64) -> Result<&mut Task, StoreError> {
    tasks
        .iter_mut()
        .find(|t| t.id == id && t.deleted_at.is_none())
        .ok_or(StoreError::NotFound(id))
}

#[async_trait]
impl TaskRepository for TaskStore {
    async fn get_by_id(&self, id: u64) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        Ok(tasks
            .iter()
            .find(|t| t.id == id && t.deleted_at.is_none())
            .cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        Ok(tasks.iter().filter(|t| filter.matches(t)).cloned().collect())
    }
}

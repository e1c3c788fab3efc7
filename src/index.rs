//! The notification index: the UI-facing record of which reminders exist.
//!
//! It is kept separately from the platform's pending triggers. Entries are
//! keyed by task uid and persisted as a JSON map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::models::IndexEntry;
use crate::storage::{load_json, save_json};

type Entries = BTreeMap<String, IndexEntry>;

pub struct NotificationIndex {
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    entries: Mutex<Entries>,
}

impl NotificationIndex {
    /// Opens the index persisted at `path`.
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries: Entries = load_json(&path).await?;
        debug!(path = %path.display(), count = entries.len(), "notification index opened");
        Ok(Self {
            path: Some(path),
            clock,
            entries: Mutex::new(entries),
        })
    }

    /// An index that is never written to disk.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            path: None,
            clock,
            entries: Mutex::new(Entries::new()),
        }
    }

    /// Flushes the index and releases it.
    pub async fn close(self) -> Result<(), StoreError> {
        let entries = self.entries.into_inner();
        if let Some(path) = &self.path {
            save_json(path, &entries).await?;
        }
        Ok(())
    }

    /// Inserts or fully replaces the entry for `task_uid`.
    pub async fn upsert(&self, task_uid: &str, mut entry: IndexEntry) -> Result<(), StoreError> {
        entry.task_uid = task_uid.to_string();
        entry.last_updated = self.clock.now();
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(task_uid.to_string(), entry);
        self.commit(&mut entries, next).await
    }

    /// Deletes the entry for `task_uid`. Returns whether one existed.
    pub async fn remove(&self, task_uid: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(task_uid) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(task_uid);
        self.commit(&mut entries, next).await?;
        Ok(true)
    }

    /// Flips the completion flag in place. Returns whether an entry existed.
    pub async fn mark_completed(&self, task_uid: &str, completed: bool) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        let Some(entry) = next.get_mut(task_uid) else {
            return Ok(false);
        };
        entry.completed = completed;
        entry.last_updated = now;
        self.commit(&mut entries, next).await?;
        Ok(true)
    }

    pub async fn get(&self, task_uid: &str) -> Option<IndexEntry> {
        self.entries.lock().await.get(task_uid).cloned()
    }

    /// Incomplete entries firing at or after `now`, soonest first.
    pub async fn list_upcoming(&self, now: DateTime<Utc>) -> Vec<IndexEntry> {
        let entries = self.entries.lock().await;
        let mut upcoming: Vec<IndexEntry> = entries
            .values()
            .filter(|e| !e.completed && e.fire_at >= now)
            .cloned()
            .collect();
        upcoming.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.task_uid.cmp(&b.task_uid)));
        upcoming
    }

    /// Every entry, including past and completed ones.
    pub async fn list_all(&self) -> Vec<IndexEntry> {
        self.entries.lock().await.values().cloned().collect()
    }

    /// Removes every entry.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().await;
        let n = entries.len();
        self.commit(&mut entries, Entries::new()).await?;
        Ok(n)
    }

    /// Writes `next` and swaps it in. A failed write leaves `current` untouched.
    async fn commit(&self, current: &mut Entries, next: Entries) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            save_json(path, &next).await?;
        }
        *current = next;
        Ok(())
    }
}

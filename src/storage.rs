use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::error::StoreError;

/// File holding the task records.
pub const TASKS_FILE: &str = "tasks.json";
/// File holding the notification index.
pub const INDEX_FILE: &str = "reminders.json";
/// File holding the local notifier's pending triggers.
pub const TRIGGERS_FILE: &str = "triggers.json";

pub fn tasks_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TASKS_FILE)
}

pub fn index_path(data_dir: &Path) -> PathBuf {
    data_dir.join(INDEX_FILE)
}

pub fn triggers_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TRIGGERS_FILE)
}

/// Loads a JSON document from `path`.
///
/// Returns `T::default()` if the file does not exist.
pub async fn load_json<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let s = match fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e.into()),
    };
    if s.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&s)?)
}

/// Saves `value` as pretty JSON to `path`.
///
/// Writes to a sibling temp file first and renames it over the target, so a
/// crash mid-write leaves the previous contents intact.
pub async fn save_json<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let s = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, s.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

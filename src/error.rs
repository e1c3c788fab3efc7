use thiserror::Error;

/// Failure reported by the notification service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("notification service unavailable: {0}")]
    Unavailable(String),
    #[error("unknown trigger handle: {0}")]
    UnknownHandle(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for NotifyError {
    fn from(e: std::io::Error) -> Self {
        NotifyError::Io(e.to_string())
    }
}

/// Failure of a persisted store (tasks or reminder index).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed store file: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("task {0} not found")]
    NotFound(u64),
}

/// Engine-level error returned by scheduling and reconciliation.
///
/// Only conditions that abort a whole operation end up here; per-trigger
/// failures are collected in the operation's outcome instead.
#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("notification service: {0}")]
    Notifier(NotifyError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("operation timed out")]
    Timeout,
    #[error("{0} is out of range")]
    OutOfRange(String),
}

impl From<NotifyError> for ReminderError {
    fn from(e: NotifyError) -> Self {
        match e {
            NotifyError::PermissionDenied => ReminderError::PermissionDenied,
            other => ReminderError::Notifier(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReminderError>;

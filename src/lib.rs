//! Local reminder scheduling and reconciliation for tasks.
//!
//! [`scheduler::NotificationScheduler`] turns a task's due instant and alert
//! offsets into platform triggers, [`index::NotificationIndex`] records what
//! the user should see as upcoming, and [`reconcile::Reconciler`] heals drift
//! between the task store, the platform and the index.

pub mod clock;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod due;
pub mod error;
pub mod events;
pub mod index;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod reconcile;
pub mod repository;
pub mod scheduler;
pub mod storage;

pub use error::{NotifyError, ReminderError, StoreError};

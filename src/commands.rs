use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Local, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::diagnostics::{self, TEST_TRIGGER_UID};
use crate::due::{parse_date, parse_time};
use crate::error::{ReminderError, StoreError};
use crate::events::{ReminderSync, TaskEvent};
use crate::index::NotificationIndex;
use crate::models::{IndexEntry, Task};
use crate::notifier::{LocalNotifier, NotificationService};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::repository::{TaskFilter, TaskRepository, TaskStore};
use crate::scheduler::{describe_offset, NotificationScheduler};
use crate::storage::{index_path, tasks_path, triggers_path};

/// Everything a command needs, wired from one [`Config`].
pub struct App {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub tasks: Arc<TaskStore>,
    pub notifier: Arc<dyn NotificationService>,
    pub index: Arc<NotificationIndex>,
    pub scheduler: Arc<NotificationScheduler>,
    pub reconciler: Reconciler,
    sync: ReminderSync,
    events: Mutex<broadcast::Receiver<TaskEvent>>,
}

impl App {
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let dir = &config.data_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let tasks = Arc::new(TaskStore::open(tasks_path(dir)).await.context("opening task store")?);
        let notifier: Arc<dyn NotificationService> = Arc::new(
            LocalNotifier::open(triggers_path(dir), config.notifications_enabled, clock.clone())
                .await
                .context("opening notifier")?,
        );
        let index = Arc::new(
            NotificationIndex::open(index_path(dir), clock.clone())
                .await
                .context("opening reminder index")?,
        );
        Ok(Self::wire(config, clock, tasks, notifier, index))
    }

    /// Wires an app around caller-provided parts.
    pub fn wire(
        config: Config,
        clock: Arc<dyn Clock>,
        tasks: Arc<TaskStore>,
        notifier: Arc<dyn NotificationService>,
        index: Arc<NotificationIndex>,
    ) -> Self {
        let due = config.due_resolver();
        let scheduler = Arc::new(NotificationScheduler::new(
            notifier.clone(),
            index.clone(),
            clock.clone(),
            due,
        ));
        let repo: Arc<dyn TaskRepository> = tasks.clone();
        let reconciler = Reconciler::new(
            repo,
            notifier.clone(),
            index.clone(),
            clock.clone(),
            due,
            config.reconcile,
        );
        let events = Mutex::new(tasks.subscribe());
        Self {
            sync: ReminderSync::new(scheduler.clone()),
            config,
            clock,
            tasks,
            notifier,
            index,
            scheduler,
            reconciler,
            events,
        }
    }

    /// Runs reminder side effects for every queued task event.
    pub async fn settle(&self) -> usize {
        let mut rx = self.events.lock().await;
        self.sync.drain(&mut rx).await
    }

    /// Runs `fut` under the configured bound for platform calls.
    pub async fn bounded<F, T>(&self, fut: F) -> Result<T, ReminderError>
    where
        F: Future<Output = Result<T, ReminderError>>,
    {
        tokio::time::timeout(self.config.os_call_timeout(), fut)
            .await
            .map_err(|_| ReminderError::Timeout)?
    }

    /// Reconciles once after opening. A failure is logged and the command
    /// still runs.
    pub async fn reconcile_on_start(&self) -> Option<ReconcileReport> {
        match self.bounded(self.reconciler.run()).await {
            Ok(report) => {
                debug!(clean = report.is_clean(), "start-up reconciliation done");
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "start-up reconciliation failed");
                None
            }
        }
    }

    async fn settle_bounded(&self, silent: bool) {
        let settled = tokio::time::timeout(self.config.os_call_timeout(), self.settle()).await;
        if settled.is_err() && !silent {
            eprintln!("Updating reminders timed out. Run `remindust reconcile` later.");
        }
    }
}

/// Task fields accepted by `add` and `edit`.
///
/// For `edit`, the literal value `none` clears a date or time.
#[derive(Debug, Clone, Default)]
pub struct TaskFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due: Option<String>,
    pub start: Option<String>,
    pub at: Option<String>,
    pub alerts: Option<Vec<u32>>,
}

fn apply_fields(task: &mut Task, fields: TaskFields) -> Result<(), String> {
    if let Some(title) = fields.title {
        task.title = title;
    }
    if let Some(d) = fields.description {
        task.description = if d.is_empty() { None } else { Some(d) };
    }
    if let Some(d) = fields.due {
        task.due_date = parse_opt(&d, parse_date).map_err(|e| format!("Invalid due date '{}': {}. Use YYYY-MM-DD.", d, e))?;
    }
    if let Some(d) = fields.start {
        task.start_date = parse_opt(&d, parse_date).map_err(|e| format!("Invalid start date '{}': {}. Use YYYY-MM-DD.", d, e))?;
    }
    if let Some(t) = fields.at {
        task.start_time = parse_opt(&t, parse_time).map_err(|e| format!("Invalid time '{}': {}. Use HH:MM.", t, e))?;
    }
    if let Some(alerts) = fields.alerts {
        task.alert_offsets = alerts.into_iter().collect::<BTreeSet<u32>>();
    }
    Ok(())
}

fn parse_opt<T>(s: &str, parse: fn(&str) -> Result<T, chrono::ParseError>) -> Result<Option<T>, chrono::ParseError> {
    if s.eq_ignore_ascii_case("none") {
        Ok(None)
    } else {
        parse(s).map(Some)
    }
}

/// Adds a new task and schedules its reminders.
pub async fn cmd_add(app: &App, title: String, fields: TaskFields, silent: bool) {
    let mut task = Task::new(0, title, app.clock.now());
    if let Err(msg) = apply_fields(&mut task, fields) {
        if !silent { eprintln!("{}", msg); }
        return;
    }
    match app.tasks.create(task).await {
        Ok(t) => {
            app.settle_bounded(silent).await;
            if !silent { println!("Task added (id = {})", t.id); }
        }
        Err(e) => {
            if !silent { eprintln!("Failed to save task: {}", e); }
        }
    }
}

/// Edits an existing task's details and reschedules its reminders.
pub async fn cmd_edit(app: &App, id: u64, fields: TaskFields, silent: bool) {
    let mut task = match app.tasks.get_by_id(id).await {
        Ok(Some(t)) => t,
        Ok(None) => {
            if !silent { eprintln!("Task {} not found.", id); }
            return;
        }
        Err(e) => {
            if !silent { eprintln!("Failed to load task: {}", e); }
            return;
        }
    };
    if let Err(msg) = apply_fields(&mut task, fields) {
        if !silent { eprintln!("{}", msg); }
        return;
    }
    match app.tasks.update(task).await {
        Ok(_) => {
            app.settle_bounded(silent).await;
            if !silent { println!("Task {} updated.", id); }
        }
        Err(e) => {
            if !silent { eprintln!("Failed to save task: {}", e); }
        }
    }
}

/// Marks a task as complete by ID.
pub async fn cmd_complete(app: &App, id: u64, silent: bool) {
    match app.tasks.complete(id, app.clock.now()).await {
        Ok(_) => {
            app.settle_bounded(silent).await;
            if !silent { println!("Task {} marked as complete.", id); }
        }
        Err(StoreError::NotFound(_)) => {
            if !silent { eprintln!("Task {} not found.", id); }
        }
        Err(e) => {
            if !silent { eprintln!("Failed to save task: {}", e); }
        }
    }
}

/// Removes a task. Soft delete unless `hard` is set.
pub async fn cmd_remove(app: &App, id: u64, hard: bool, silent: bool) {
    let result = if hard {
        app.tasks.hard_delete(id).await
    } else {
        app.tasks.soft_delete(id, app.clock.now()).await
    };
    match result {
        Ok(_) => {
            app.settle_bounded(silent).await;
            if !silent { println!("Task {} removed.", id); }
        }
        Err(StoreError::NotFound(_)) => {
            if !silent { eprintln!("Task {} not found.", id); }
        }
        Err(e) => {
            if !silent { eprintln!("Failed to save tasks: {}", e); }
        }
    }
}

/// Cancels and recreates one task's reminders.
pub async fn cmd_reschedule(app: &App, id: u64, silent: bool) {
    let task = match app.tasks.get_by_id(id).await {
        Ok(Some(t)) => t,
        Ok(None) => {
            if !silent { eprintln!("Task {} not found.", id); }
            return;
        }
        Err(e) => {
            if !silent { eprintln!("Failed to load task: {}", e); }
            return;
        }
    };
    match app.bounded(app.scheduler.reschedule_for_task(&task)).await {
        Ok(out) => {
            if silent { return; }
            println!(
                "Task {}: {} reminder(s) canceled, {} scheduled, {} skipped (past).",
                id,
                out.canceled.canceled,
                out.scheduled.triggers.len(),
                out.scheduled.skipped.len()
            );
            for f in &out.scheduled.failures {
                eprintln!("  {} before: {}", describe_offset(f.offset_minutes), f.error);
            }
        }
        Err(e) => {
            if !silent { eprintln!("Failed to reschedule task {}: {}", id, e); }
        }
    }
}

/// Reschedules every active task.
pub async fn cmd_refresh(app: &App, silent: bool) {
    let repo: &dyn TaskRepository = app.tasks.as_ref();
    match app.bounded(app.scheduler.refresh_all(repo)).await {
        Ok(report) => {
            if silent { return; }
            println!("Refreshed {} task(s), {} reminder(s) scheduled.", report.tasks, report.triggers);
            for (uid, f) in &report.failures {
                eprintln!("  {} ({}): {}", uid, describe_offset(f.offset_minutes), f.error);
            }
        }
        Err(e) => {
            if !silent { eprintln!("Refresh failed: {}", e); }
        }
    }
}

/// Reconciles tasks, pending triggers and the reminder index.
pub async fn cmd_reconcile(app: &App, json: bool, silent: bool) {
    let report = match app.bounded(app.reconciler.run()).await {
        Ok(r) => r,
        Err(e) => {
            if !silent { eprintln!("Reconcile failed: {}", e); }
            return;
        }
    };
    if silent {
        return;
    }
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Failed to encode report: {}", e),
        }
        return;
    }
    if report.is_clean() {
        println!("Everything in sync.");
        return;
    }
    for o in &report.removed_orphans {
        println!("Canceled trigger {} for {} ({})", o.handle, o.task_uid, o.reason);
    }
    for p in &report.pruned_expired {
        println!("Pruned reminder for {} ({})", p.task_uid, p.reason);
    }
    for uid in &report.completed_entries {
        println!("Marked reminder for {} completed", uid);
    }
    for m in &report.missing_schedules {
        println!(
            "Missing reminders for '{}' ({}): {} expected, {} pending. Run `remindust refresh`.",
            m.title,
            m.missing_offsets
                .iter()
                .map(|o| describe_offset(*o))
                .collect::<Vec<_>>()
                .join("; "),
            m.expected,
            m.pending
        );
    }
    for e in &report.errors {
        eprintln!("Error: {:?}", e);
    }
}

/// Lists tasks in a formatted table, soonest due first.
///
/// By default, hides completed tasks unless `all` is true.
pub async fn cmd_list(app: &App, all: bool) {
    let filter = if all { TaskFilter::default() } else { TaskFilter::active() };
    let mut tasks = match app.tasks.list(&filter).await {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to load tasks: {}", e);
            return;
        }
    };
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }
    let pending = match app.notifier.list_all().await {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("Failed to list pending reminders: {}", e);
            None
        }
    };
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in pending.iter().flatten() {
        *counts.entry(t.payload.task_uid.as_str()).or_default() += 1;
    }

    let due = app.scheduler.due_resolver();
    tasks.sort_by_key(|t| (due.due_instant(t).is_none(), due.due_instant(t)));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("Title").add_attribute(Attribute::Bold),
            Cell::new("Due").add_attribute(Attribute::Bold),
            Cell::new("Alerts").add_attribute(Attribute::Bold),
            Cell::new("Pending").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
        ]);

    let now = app.clock.now();
    for t in &tasks {
        let due_at = due.due_instant(t);
        let alerts = t
            .alert_offsets
            .iter()
            .map(|o| format!("{o}m"))
            .collect::<Vec<_>>()
            .join(", ");
        let overdue = !t.completed && due_at.is_some_and(|d| d < now);
        let status = if t.completed { "Done" } else { "Pending" };
        let status_color = if t.completed { Color::Green } else { Color::Yellow };
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(&t.title),
            Cell::new(due_at.map(local).unwrap_or_else(|| "-".into()))
                .fg(if overdue { Color::Red } else { Color::Reset }),
            Cell::new(alerts),
            Cell::new(match &pending {
                Some(_) => counts.get(t.uid.as_str()).copied().unwrap_or(0).to_string(),
                None => "?".to_string(),
            }),
            Cell::new(status).fg(status_color),
        ]);
    }

    println!("{table}");
}

/// Lists the reminder index: upcoming entries, or every entry with `all`.
pub async fn cmd_reminders(app: &App, all: bool) {
    let entries = if all {
        let mut e = app.index.list_all().await;
        e.sort_by_key(|e| e.fire_at);
        e
    } else {
        app.index.list_upcoming(app.clock.now()).await
    };
    if entries.is_empty() {
        println!("No reminders.");
        return;
    }
    println!("{}", reminder_table(&entries));
}

fn reminder_table(entries: &[IndexEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Next", "Title", "Offsets", "Status", "Updated"]);
    for e in entries {
        let offsets = e
            .offsets
            .iter()
            .map(|o| describe_offset(*o))
            .collect::<Vec<_>>()
            .join("; ");
        table.add_row(vec![
            Cell::new(local(e.fire_at)),
            Cell::new(&e.title),
            Cell::new(offsets),
            Cell::new(if e.completed { "Done" } else { "Active" }),
            Cell::new(local(e.last_updated)),
        ]);
    }
    table
}

/// Lists the triggers the notification service still holds.
pub async fn cmd_pending(app: &App) {
    let mut pending = match app
        .bounded(async { app.notifier.list_all().await.map_err(ReminderError::from) })
        .await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to list pending reminders: {}", e);
            return;
        }
    };
    if pending.is_empty() {
        println!("No pending reminders.");
        return;
    }
    pending.sort_by_key(|t| t.fire_at);
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Fires", "Title", "Offset", "Task", "Handle"]);
    for t in pending {
        let task = if t.payload.task_uid == TEST_TRIGGER_UID {
            "(test)".to_string()
        } else {
            t.payload.task_id.to_string()
        };
        table.add_row(vec![
            local(t.fire_at),
            t.content.title,
            format!("{}m", t.payload.offset_minutes),
            task,
            t.handle.0,
        ]);
    }
    println!("{table}");
}

/// Prints a JSON snapshot of tasks, pending triggers and the index.
pub async fn cmd_debug(app: &App) {
    let snap = app
        .bounded(diagnostics::snapshot(
            app.tasks.as_ref(),
            app.notifier.as_ref(),
            &app.index,
            app.clock.as_ref(),
        ))
        .await;
    match snap {
        Ok(s) => match serde_json::to_string_pretty(&s) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Failed to encode snapshot: {}", e),
        },
        Err(e) => eprintln!("Failed to collect diagnostics: {}", e),
    }
}

/// Schedules a test reminder `secs` seconds from now.
pub async fn cmd_test_notify(app: &App, secs: i64, silent: bool) {
    let Some(delay) = Duration::try_seconds(secs).filter(|_| secs >= 0) else {
        if !silent { eprintln!("Invalid delay '{}': use a number of seconds from 0 up.", secs); }
        return;
    };
    let sent = app
        .bounded(diagnostics::send_test_trigger(
            app.notifier.as_ref(),
            app.clock.as_ref(),
            delay,
        ))
        .await;
    match sent {
        Ok(h) => {
            if !silent { println!("Test reminder scheduled ({}).", h); }
        }
        Err(e) => {
            if !silent { eprintln!("Failed to schedule test reminder: {}", e); }
        }
    }
}

/// Cancels every pending reminder and clears the index.
pub async fn cmd_cancel_all(app: &App, force: bool) {
    if !force {
        print!("Cancel ALL pending reminders? Tasks are kept. [y/N] ");
        if io::stdout().flush().is_err() {
            return;
        }
        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() || input.trim().to_lowercase() != "y" {
            println!("Aborted.");
            return;
        }
    }
    match app
        .bounded(diagnostics::cancel_everything(app.notifier.as_ref(), &app.index))
        .await
    {
        Ok(r) => {
            println!("Canceled {} reminder(s), cleared {} index entr(ies).", r.canceled, r.cleared_entries);
            for h in &r.failed {
                eprintln!("  could not cancel {}", h);
            }
        }
        Err(e) => eprintln!("Failed to cancel reminders: {}", e),
    }
}

fn local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

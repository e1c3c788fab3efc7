//! # Remindust
//!
//! Local reminder scheduling for a to-do list. Every task may carry a due
//! date or start date/time and a set of alert offsets ("remind me 60 and 5
//! minutes before"). Remindust turns those into scheduled notifications,
//! keeps an index of upcoming reminders, and reconciles drift between tasks,
//! the notification scheduler and the index.
//!
//! ## Usage
//!
//! ```bash
//! # Task due at 15:00 with reminders an hour and five minutes before
//! remindust add "Call the dentist" --due 2025-01-10 --at 15:00 --alert 60 --alert 5
//!
//! # What's next
//! remindust reminders
//!
//! # Complete, edit, remove
//! remindust complete 1
//! remindust edit 2 --at 16:30
//! remindust remove 3
//!
//! # Heal drift (run on start-up, or whenever things look off)
//! remindust reconcile
//! remindust refresh
//!
//! # Diagnostics
//! remindust debug
//! remindust test-notify --in 10
//! remindust cancel-all
//! ```
//!
//! ## Data Storage
//!
//! Tasks, the reminder index and pending triggers live in your local data
//! directory (`~/.local/share/remindust` on Linux). Override it with the
//! `REMINDUST_HOME` environment variable. An optional `config.toml` in the
//! same directory tunes the defaults.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use remindust::commands::*;
use remindust::config::Config;
use remindust::logging;
use std::io;

#[derive(Parser)]
#[command(name = "remindust")]
#[command(about = "Task reminders that stay in sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct FieldArgs {
    /// Longer description, shown as the reminder body
    #[arg(short = 'D', long)]
    description: Option<String>,
    /// Due date in YYYY-MM-DD
    #[arg(short, long)]
    due: Option<String>,
    /// Start date in YYYY-MM-DD
    #[arg(short, long)]
    start: Option<String>,
    /// Time of day in HH:MM, applied to the start or due date
    #[arg(short, long)]
    at: Option<String>,
    /// Minutes before the due time to send a reminder (repeatable)
    #[arg(short = 'A', long = "alert")]
    alerts: Vec<u32>,
    /// Drop all alert offsets
    #[arg(long, conflicts_with = "alerts")]
    no_alerts: bool,
}

impl FieldArgs {
    fn into_fields(self, title: Option<String>) -> TaskFields {
        let alerts = if self.no_alerts {
            Some(Vec::new())
        } else if self.alerts.is_empty() {
            None
        } else {
            Some(self.alerts)
        };
        TaskFields {
            title,
            description: self.description,
            due: self.due,
            start: self.start,
            at: self.at,
            alerts,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new task
    Add {
        /// Task title (quoted if it has spaces)
        title: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Edit a task ("none" clears a date or time)
    Edit {
        id: u64,
        /// New title
        #[arg(short, long)]
        title: Option<String>,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Mark a task as complete
    Complete {
        id: u64,
    },
    /// Remove a task
    Remove {
        id: u64,
        /// Delete the record instead of flagging it deleted
        #[arg(long)]
        hard: bool,
    },
    /// List tasks, soonest due first
    List {
        /// Show completed tasks
        #[arg(short, long)]
        all: bool,
    },
    /// Show upcoming reminders
    Reminders {
        /// Include past and completed reminders
        #[arg(short, long)]
        all: bool,
    },
    /// Show triggers pending in the notification scheduler
    Pending,
    /// Cancel and recreate a task's reminders
    Reschedule {
        id: u64,
    },
    /// Reschedule reminders for every open task
    Refresh,
    /// Cancel orphaned reminders and prune stale index entries
    Reconcile {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a diagnostic snapshot as JSON
    Debug,
    /// Send a test reminder
    TestNotify {
        /// Seconds from now
        #[arg(long = "in", default_value_t = 5)]
        secs: i64,
    },
    /// Cancel every pending reminder
    CancelAll {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell, elvish)
        shell: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let shell_enum = match shell.as_str() {
            "bash" => Shell::Bash,
            "zsh" => Shell::Zsh,
            "fish" => Shell::Fish,
            "powershell" => Shell::PowerShell,
            "elvish" => Shell::Elvish,
            _ => {
                eprintln!("Unsupported shell: {}", shell);
                return Ok(());
            }
        };
        let mut cmd = Cli::command();
        generate(shell_enum, &mut cmd, "remindust", &mut io::stdout());
        return Ok(());
    }

    let config = Config::load()?;
    logging::init(&config.log)?;
    let app = App::open(config).await?;
    if !matches!(cli.command, Commands::Reconcile { .. }) {
        app.reconcile_on_start().await;
    }

    match cli.command {
        Commands::Add { title, fields } => cmd_add(&app, title, fields.into_fields(None), false).await,
        Commands::Edit { id, title, fields } => cmd_edit(&app, id, fields.into_fields(title), false).await,
        Commands::Complete { id } => cmd_complete(&app, id, false).await,
        Commands::Remove { id, hard } => cmd_remove(&app, id, hard, false).await,
        Commands::List { all } => cmd_list(&app, all).await,
        Commands::Reminders { all } => cmd_reminders(&app, all).await,
        Commands::Pending => cmd_pending(&app).await,
        Commands::Reschedule { id } => cmd_reschedule(&app, id, false).await,
        Commands::Refresh => cmd_refresh(&app, false).await,
        Commands::Reconcile { json } => cmd_reconcile(&app, json, false).await,
        Commands::Debug => cmd_debug(&app).await,
        Commands::TestNotify { secs } => cmd_test_notify(&app, secs, false).await,
        Commands::CancelAll { force } => cmd_cancel_all(&app, force).await,
        Commands::Completions { .. } => {}
    }
    Ok(())
}

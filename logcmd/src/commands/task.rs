//! `logcmd task` - list, stop, kill and (internally) execute tasks.

use crate::commands::{open_database, EXIT_INTERRUPTED};
use anyhow::Context;
use chrono::Local;
use clap::Subcommand;
use logcmd_core::runner::Runner;
use logcmd_core::tasks::{self, TaskStore};
use logcmd_core::{CancelToken, Config, Database, Error, Task, TaskStatus};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum TaskCmd {
    /// List active background tasks
    List,
    /// Gracefully stop a task (SIGINT)
    Stop { id: i64 },
    /// Forcefully kill a task (SIGKILL)
    Kill { id: i64 },
    /// Internal: execute a task in worker mode
    #[command(hide = true)]
    Worker { id: i64 },
}

pub fn run(command: TaskCmd) -> anyhow::Result<i32> {
    match command {
        TaskCmd::List => list(),
        TaskCmd::Stop { id } => stop(id, false),
        TaskCmd::Kill { id } => stop(id, true),
        TaskCmd::Worker { id } => worker(id),
    }
}

fn format_local(time: chrono::DateTime<chrono::Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn list() -> anyhow::Result<i32> {
    let db = open_database()?;
    let store = TaskStore::new(db);
    let active = store.list_active()?;

    if active.is_empty() {
        println!("no active background tasks");
        return Ok(0);
    }

    println!("active tasks ({}):\n", active.len());
    println!(
        "{:<5} {:<9} {:<7} {:<19} {:<19} command",
        "ID", "STATUS", "PID", "CREATED", "STARTED"
    );
    println!("{}", "-".repeat(80));

    for task in active {
        let mut status = task.status.to_string();
        if let Some(pid) = task.pid {
            if !tasks::process_alive(pid) {
                // the worker vanished without recording a terminal state
                let _ = store.mark_stopped(task.id, TaskStatus::Failed, "process died");
                status = "dead".to_string();
            }
        }

        let pid = task
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let started = task
            .started_at
            .map(format_local)
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<5} {:<9} {:<7} {:<19} {:<19} {}",
            task.id,
            status,
            pid,
            format_local(task.created_at),
            started,
            task.command_line(),
        );
        if let Some(log) = &task.log_file_path {
            println!("      log: {}", log.display());
        }
    }

    Ok(0)
}

fn stop(id: i64, force: bool) -> anyhow::Result<i32> {
    let db = open_database()?;
    let store = TaskStore::new(db);
    let task = store.get(id)?;

    if !task.is_active() {
        println!("task #{} already finished ({})", task.id, task.status);
        return Ok(0);
    }

    if let Some(pid) = task.pid {
        if force {
            let _ = tasks::signal_kill(pid);
        } else {
            match tasks::signal_interrupt(pid) {
                Err(e) if tasks::is_process_gone(&e) => {
                    let _ = tasks::signal_kill(pid);
                }
                _ => {}
            }
        }
    }

    let (action, status) = if force {
        ("killed", TaskStatus::Failed)
    } else {
        ("stopped", TaskStatus::Stopped)
    };

    // never fail because the worker already exited
    match store.mark_stopped(task.id, status, &format!("task {action} by user")) {
        Ok(()) | Err(Error::TaskStateChanged) => {}
        Err(e) => return Err(e.into()),
    }

    println!("task #{} {}", task.id, action);
    Ok(0)
}

/// Worker mode: executed by the hidden `task worker <id>` subcommand inside
/// the detached process.
fn worker(id: i64) -> anyhow::Result<i32> {
    let db = open_database()?;
    let store = TaskStore::new(db.clone());
    let task = store.get(id)?;

    if !task.working_dir.as_os_str().is_empty() {
        std::env::set_current_dir(&task.working_dir)
            .context("failed to enter task working directory")?;
    }

    match store.mark_running(id, std::process::id() as i64) {
        // a stop raced in before we started; exit silently
        Err(Error::TaskStateChanged) => return Ok(0),
        other => other?,
    }

    match run_worker_task(&db, &store, &task) {
        Ok(code) => Ok(code),
        Err(e) => {
            let _ = store.mark_completion(task.id, TaskStatus::Failed, -1, None, &format!("{e:#}"));
            Ok(1)
        }
    }
}

fn run_worker_task(db: &Arc<Database>, store: &TaskStore, task: &Task) -> anyhow::Result<i32> {
    let mut config = Config::load().context("failed to load configuration")?;
    if !task.log_dir.as_os_str().is_empty() {
        config.log_dir = task.log_dir.clone();
    }

    // Record the log path before the first byte is written so `tail` can
    // find it immediately.
    let log_path = config
        .log_file_path(&task.command)
        .context("failed to compute log path")?;
    if let Err(e) = store.update_log_file_path(task.id, &log_path) {
        eprintln!("warning: failed to record log path: {e}");
    }

    let cancel = CancelToken::new();
    cancel.install_signal_handler()?;

    let runner = Runner::new(config)
        .with_database(db.clone())
        .with_log_path(log_path);
    let outcome = runner.run(&cancel, &task.command, &task.command_args)?;

    let (status, message) = if outcome.cancelled {
        (TaskStatus::Stopped, "task stopped".to_string())
    } else if outcome.result.success {
        (TaskStatus::Success, String::new())
    } else {
        (
            TaskStatus::Failed,
            format!("command exited with code {}", outcome.result.exit_code),
        )
    };

    store.mark_completion(
        task.id,
        status,
        outcome.result.exit_code,
        Some(&outcome.log_path),
        &message,
    )?;

    if outcome.cancelled {
        Ok(EXIT_INTERRUPTED)
    } else {
        Ok(0)
    }
}

//! `logcmd run` - execute a command, foreground or detached.

use crate::commands::{load_config, open_database, EXIT_INTERRUPTED};
use anyhow::Context;
use clap::Args;
use logcmd_core::runner::Runner;
use logcmd_core::tasks::{self, NewTask, TaskStore};
use logcmd_core::{CancelToken, Config, TaskStatus};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run in the background, supervised as a task
    #[arg(short = 'd', long)]
    pub detached: bool,

    /// Command and arguments to execute
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

pub fn run(dir: Option<PathBuf>, args: RunArgs) -> anyhow::Result<i32> {
    let config = load_config(dir)?;

    if args.detached {
        return start_detached(&config, &args.command);
    }

    // A broken catalog must not block the user's command.
    let db = match open_database() {
        Ok(db) => Some(db),
        Err(e) => {
            eprintln!("warning: catalog unavailable, run will not be recorded: {e:#}");
            None
        }
    };

    let cancel = CancelToken::new();
    cancel.install_signal_handler()?;

    let mut runner = Runner::new(config);
    if let Some(db) = db {
        runner = runner.with_database(db);
    }

    let outcome = runner
        .run(&cancel, &args.command[0], &args.command[1..])
        .context("execution failed")?;

    if outcome.cancelled {
        println!("\ncommand interrupted by user");
        return Ok(EXIT_INTERRUPTED);
    }
    if !outcome.result.success {
        return Ok(1);
    }
    Ok(0)
}

/// Persist a task row, then hand the command to a detached worker process.
fn start_detached(config: &Config, command: &[String]) -> anyhow::Result<i32> {
    let db = open_database()?;
    let store = TaskStore::new(db);

    let working_dir = std::env::current_dir().context("failed to resolve working directory")?;
    let task = store
        .create(&NewTask {
            command: command[0].clone(),
            command_args: command[1..].to_vec(),
            working_dir,
            log_dir: config.log_dir.clone(),
        })
        .context("failed to create task")?;

    match tasks::spawn_detached_worker(task.id) {
        Ok(pid) => {
            if let Err(e) = store.update_pid(task.id, pid as i64) {
                eprintln!("warning: failed to record worker pid: {e}");
            }
            println!("task #{} started: {}", task.id, command.join(" "));
            println!("log directory: {}", config.log_dir.display());
            Ok(0)
        }
        Err(e) => {
            let _ = store.mark_stopped(
                task.id,
                TaskStatus::Failed,
                &format!("failed to start worker: {e}"),
            );
            Err(e).context("failed to start task worker")
        }
    }
}

//! `logcmd project` - registry administration and run history.

use crate::commands::open_database;
use anyhow::Context;
use chrono::Local;
use clap::Subcommand;
use logcmd_core::format::format_duration_ms;
use logcmd_core::history::HistoryStore;
use logcmd_core::registry::ProjectRegistry;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum ProjectCmd {
    /// List registered projects
    List,
    /// Register a directory as a project
    Register { path: PathBuf },
    /// Delete a project by id or path
    Delete { id_or_path: String },
    /// Prune projects whose directory no longer exists
    Clean,
    /// Show recent run history for a project
    History {
        id_or_path: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only failed runs
        #[arg(long)]
        failed: bool,
    },
}

pub fn run(command: ProjectCmd) -> anyhow::Result<i32> {
    let db = open_database()?;
    let registry = ProjectRegistry::new(db.clone());

    match command {
        ProjectCmd::List => {
            let projects = registry.list()?;
            if projects.is_empty() {
                println!("no registered projects");
                return Ok(0);
            }

            println!(
                "{:<5} {:<20} {:>6} {:>8} {:<19} path",
                "ID", "NAME", "RUNS", "SUCCESS", "LAST RUN"
            );
            println!("{}", "-".repeat(90));
            for project in projects {
                let last_run = project
                    .last_command_time
                    .map(|t| {
                        t.with_timezone(&Local)
                            .format("%Y-%m-%d %H:%M:%S")
                            .to_string()
                    })
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<5} {:<20} {:>6} {:>7.1}% {:<19} {}",
                    project.id,
                    project.name,
                    project.total_commands,
                    project.success_rate(),
                    last_run,
                    project.path.display(),
                );
            }
            Ok(0)
        }

        ProjectCmd::Register { path } => {
            let project = registry
                .register(&path)
                .context("failed to register project")?;
            println!(
                "registered project #{}: {} ({})",
                project.id,
                project.name,
                project.path.display()
            );
            Ok(0)
        }

        ProjectCmd::Delete { id_or_path } => {
            registry.delete(&id_or_path)?;
            println!("deleted project {id_or_path}");
            Ok(0)
        }

        ProjectCmd::Clean => {
            let report = registry.check_and_cleanup()?;
            for path in &report.removed {
                println!("removed: {}", path.display());
            }
            println!(
                "{} project(s) checked, {} removed",
                report.checked,
                report.removed.len()
            );
            Ok(0)
        }

        ProjectCmd::History {
            id_or_path,
            limit,
            failed,
        } => {
            let project = registry.get(&id_or_path)?;
            let history = HistoryStore::new(db);

            let records = if failed {
                history.failed(project.id, limit)?
            } else {
                history.recent(project.id, limit)?
            };

            if records.is_empty() {
                println!("no recorded runs for {}", project.name);
                return Ok(0);
            }

            println!("run history for {} (latest first):\n", project.name);
            for record in records {
                println!(
                    "{}  [{}] exit {:>3}  {:>9}  {}",
                    record
                        .start_time
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S"),
                    record.status,
                    record.exit_code,
                    format_duration_ms(record.duration_ms),
                    record.command,
                );
                println!("    log: {}", record.log_file_path);
            }
            Ok(0)
        }
    }
}

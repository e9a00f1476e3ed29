//! logcmd - run commands while capturing their output
//!
//! Every run is teed to the terminal and to a per-project log file, and
//! recorded in an embedded catalog that powers search, statistics and
//! detached-task supervision.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "logcmd")]
#[command(about = "Run commands while capturing their output to per-project log files")]
#[command(version)]
struct Cli {
    /// Log directory override (default: the discovered .logcmd tree)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a command and record its output
    Run(commands::run::RunArgs),
    /// Search log contents
    Search(commands::search::SearchArgs),
    /// Show execution statistics
    Stats(commands::stats::StatsArgs),
    /// Manage registered projects
    Project {
        #[command(subcommand)]
        command: commands::project::ProjectCmd,
    },
    /// Manage detached background tasks
    Task {
        #[command(subcommand)]
        command: commands::task::TaskCmd,
    },
    /// Print the tail of a task's log file
    Tail(commands::tail::TailArgs),
    /// Inspect or edit configuration
    Config {
        #[command(subcommand)]
        command: commands::config::ConfigCmd,
    },
}

fn main() {
    let cli = Cli::parse();

    let _log_guard = logcmd_core::logging::init().ok();

    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    process::exit(code);
}

fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Run(args) => commands::run::run(cli.dir, args),
        Commands::Search(args) => commands::search::run(cli.dir, args),
        Commands::Stats(args) => commands::stats::run(cli.dir, args),
        Commands::Project { command } => commands::project::run(command),
        Commands::Task { command } => commands::task::run(command),
        Commands::Tail(args) => commands::tail::run(args),
        Commands::Config { command } => commands::config::run(cli.dir, command),
    }
}

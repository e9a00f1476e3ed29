//! # logcmd-core
//!
//! Core library for logcmd - a command-execution logger.
//!
//! This library provides:
//! - The runner: spawn a command, tee its streams to the terminal and a
//!   per-run log file, frame the log and record the run
//! - An embedded SQLite catalog: projects, run history, per-day stats cache
//!   and detached tasks
//! - Parallel scanners over log trees for search and statistics
//! - Detached-task supervision with an explicit state machine
//! - Configuration, log-file naming templates and logging bootstrap
//!
//! ## Architecture
//!
//! Log files on disk are the primary artifact; the catalog holds structured
//! metadata about them. Run history is the source of truth for statistics:
//! the per-day stats cache is derived from it and can be rebuilt at any
//! time.
//!
//! ## Example
//!
//! ```rust,no_run
//! use logcmd_core::{CancelToken, Config, Database};
//! use logcmd_core::runner::Runner;
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Arc::new(Database::open_default().expect("failed to open database"));
//! db.migrate().expect("failed to run migrations");
//!
//! let runner = Runner::new(config).with_database(db);
//! let outcome = runner
//!     .run(&CancelToken::new(), "echo", &["hello".to_string()])
//!     .expect("run failed");
//! println!("exit code {}", outcome.result.exit_code);
//! ```

// Re-export commonly used items at the crate root
pub use cancel::CancelToken;
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod history;
pub mod logging;
pub mod registry;
pub mod runner;
pub mod search;
pub mod stats;
pub mod tasks;
pub mod template;
pub mod types;
pub mod walker;

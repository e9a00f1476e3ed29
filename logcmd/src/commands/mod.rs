//! CLI command implementations, thin layers over logcmd-core.

pub mod config;
pub mod project;
pub mod run;
pub mod search;
pub mod stats;
pub mod tail;
pub mod task;

use anyhow::Context;
use chrono::NaiveDate;
use logcmd_core::Database;
use std::path::PathBuf;
use std::sync::Arc;

/// Exit code for a user interrupt.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Open and migrate the catalog database.
pub fn open_database() -> anyhow::Result<Arc<Database>> {
    let db = Database::open_default().context("failed to open catalog database")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(Arc::new(db))
}

/// Load the effective configuration, honouring a `--dir` override.
pub fn load_config(dir: Option<PathBuf>) -> anyhow::Result<logcmd_core::Config> {
    match dir {
        Some(dir) => logcmd_core::Config::load_for_dir(dir),
        None => logcmd_core::Config::load(),
    }
    .context("failed to load configuration")
}

/// Parse an optional `YYYY-MM-DD` argument.
pub fn parse_date(value: Option<&str>) -> anyhow::Result<Option<NaiveDate>> {
    match value {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .with_context(|| format!("invalid date (expected YYYY-MM-DD): {s}")),
    }
}

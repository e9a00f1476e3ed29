//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! Every statement is idempotent, so re-running a migration is harmless.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: projects, command_history, project_stats_cache, tasks, system_config
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        path                TEXT NOT NULL UNIQUE,
        name                TEXT NOT NULL DEFAULT '',
        description         TEXT NOT NULL DEFAULT '',
        category            TEXT NOT NULL DEFAULT '',
        tags                TEXT NOT NULL DEFAULT '',

        -- Aggregate counters
        total_commands      INTEGER NOT NULL DEFAULT 0,
        success_commands    INTEGER NOT NULL DEFAULT 0,
        failed_commands     INTEGER NOT NULL DEFAULT 0,
        total_duration_ms   INTEGER NOT NULL DEFAULT 0,

        -- Last-run summary
        last_command        TEXT NOT NULL DEFAULT '',
        last_command_status TEXT NOT NULL DEFAULT '',
        last_command_time   TEXT,

        created_at          TEXT NOT NULL,
        updated_at          TEXT NOT NULL,
        last_checked        TEXT NOT NULL,

        -- Opaque configuration blobs
        template_config     TEXT NOT NULL DEFAULT '',
        custom_config       TEXT NOT NULL DEFAULT ''
    );

    CREATE INDEX IF NOT EXISTS idx_projects_updated_at ON projects(updated_at);
    CREATE INDEX IF NOT EXISTS idx_projects_last_command_time ON projects(last_command_time);

    CREATE TABLE IF NOT EXISTS command_history (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id        INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,

        command           TEXT NOT NULL,
        command_name      TEXT NOT NULL,
        command_args      TEXT,

        start_time        TEXT NOT NULL,
        end_time          TEXT NOT NULL,
        duration_ms       INTEGER NOT NULL,
        exit_code         INTEGER NOT NULL,
        status            TEXT NOT NULL,

        log_file_path     TEXT NOT NULL,
        log_date          TEXT NOT NULL,

        stdout_preview    TEXT,
        stderr_preview    TEXT,
        has_error         INTEGER NOT NULL DEFAULT 0,

        working_directory TEXT,
        environment_info  TEXT,

        created_at        TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_history_project_time ON command_history(project_id, start_time DESC);
    CREATE INDEX IF NOT EXISTS idx_history_project_status ON command_history(project_id, status);
    CREATE INDEX IF NOT EXISTS idx_history_command_name ON command_history(command_name);
    CREATE INDEX IF NOT EXISTS idx_history_log_date ON command_history(log_date);
    CREATE INDEX IF NOT EXISTS idx_history_exit_code ON command_history(exit_code);

    CREATE TABLE IF NOT EXISTS project_stats_cache (
        id                     INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id             INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        stat_date              TEXT NOT NULL,

        total_commands         INTEGER NOT NULL DEFAULT 0,
        success_commands       INTEGER NOT NULL DEFAULT 0,
        failed_commands        INTEGER NOT NULL DEFAULT 0,
        total_duration_ms      INTEGER NOT NULL DEFAULT 0,
        avg_duration_ms        INTEGER NOT NULL DEFAULT 0,
        max_duration_ms        INTEGER NOT NULL DEFAULT 0,
        min_duration_ms        INTEGER NOT NULL DEFAULT 0,

        command_distribution   TEXT,
        exit_code_distribution TEXT,

        created_at             TEXT NOT NULL,
        updated_at             TEXT NOT NULL,

        UNIQUE(project_id, stat_date)
    );

    CREATE INDEX IF NOT EXISTS idx_stats_project_date ON project_stats_cache(project_id, stat_date DESC);

    CREATE TABLE IF NOT EXISTS tasks (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        command       TEXT NOT NULL,
        command_args  TEXT,
        working_dir   TEXT NOT NULL,
        log_dir       TEXT NOT NULL,
        status        TEXT NOT NULL,
        pid           INTEGER,
        log_file_path TEXT,
        exit_code     INTEGER,
        error_message TEXT,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL,
        started_at    TEXT,
        completed_at  TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
    CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);

    CREATE TABLE IF NOT EXISTS system_config (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        description TEXT,
        updated_at  TEXT NOT NULL
    );

    INSERT OR IGNORE INTO system_config (key, value, description, updated_at) VALUES
        ('version', '1', 'database schema version', CURRENT_TIMESTAMP),
        ('auto_cleanup_days', '365', 'days of history to retain', CURRENT_TIMESTAMP),
        ('enable_stdout_preview', 'true', 'capture output previews', CURRENT_TIMESTAMP),
        ('max_preview_length', '500', 'maximum preview length', CURRENT_TIMESTAMP);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

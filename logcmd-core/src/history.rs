//! Run history store
//!
//! One immutable row per completed run. History is the source of truth for
//! the stats cache: cache rows are regenerated from these rows and never the
//! other way around.

use crate::db::{parse_ts, Database};
use crate::error::{Error, Result};
use crate::types::{RunRecord, RunStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

const HISTORY_COLUMNS: &str = "id, project_id, command, command_name, command_args, \
     start_time, end_time, duration_ms, exit_code, status, \
     log_file_path, log_date, stdout_preview, stderr_preview, has_error, \
     working_directory, environment_info, created_at";

/// Filter options for [`HistoryStore::query`].
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub project_id: Option<i64>,
    pub command_name: Option<String>,
    pub status: Option<RunStatus>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Order by `start_time` ascending instead of the default descending
    pub ascending: bool,
}

/// Store for run history rows.
pub struct HistoryStore {
    db: Arc<Database>,
}

impl HistoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one run record; returns the assigned row id.
    pub fn record(&self, record: &RunRecord) -> Result<i64> {
        let args_json = serde_json::to_string(&record.command_args)?;
        let environment = record
            .environment
            .as_ref()
            .map(|v| v.to_string());

        let conn = self.db.connection();
        conn.execute(
            r#"
            INSERT INTO command_history (
                project_id, command, command_name, command_args,
                start_time, end_time, duration_ms, exit_code, status,
                log_file_path, log_date,
                stdout_preview, stderr_preview, has_error,
                working_directory, environment_info,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                record.project_id,
                record.command,
                record.command_name,
                args_json,
                record.start_time.to_rfc3339(),
                record.end_time.to_rfc3339(),
                record.duration_ms,
                record.exit_code,
                record.status.as_str(),
                record.log_file_path,
                record.log_date,
                record.stdout_preview,
                record.stderr_preview,
                record.has_error,
                record.working_directory,
                environment,
                record.created_at.to_rfc3339(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Query history with optional filters.
    pub fn query(&self, options: &HistoryQuery) -> Result<Vec<RunRecord>> {
        let mut sql = format!("SELECT {HISTORY_COLUMNS} FROM command_history WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(project_id) = options.project_id {
            sql.push_str(" AND project_id = ?");
            params.push(Box::new(project_id));
        }
        if let Some(command_name) = &options.command_name {
            sql.push_str(" AND command_name = ?");
            params.push(Box::new(command_name.clone()));
        }
        if let Some(status) = options.status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(start) = &options.start {
            sql.push_str(" AND start_time >= ?");
            params.push(Box::new(start.to_rfc3339()));
        }
        if let Some(end) = &options.end {
            sql.push_str(" AND start_time <= ?");
            params.push(Box::new(end.to_rfc3339()));
        }

        if options.ascending {
            sql.push_str(" ORDER BY start_time ASC");
        } else {
            sql.push_str(" ORDER BY start_time DESC");
        }

        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
            if options.offset > 0 {
                sql.push_str(&format!(" OFFSET {}", options.offset));
            }
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let conn = self.db.connection();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_refs.as_slice(), Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Most recent runs for a project.
    pub fn recent(&self, project_id: i64, limit: usize) -> Result<Vec<RunRecord>> {
        self.query(&HistoryQuery {
            project_id: Some(project_id),
            limit: Some(limit),
            ..Default::default()
        })
    }

    /// Most recent failed runs for a project.
    pub fn failed(&self, project_id: i64, limit: usize) -> Result<Vec<RunRecord>> {
        self.query(&HistoryQuery {
            project_id: Some(project_id),
            status: Some(RunStatus::Failed),
            limit: Some(limit),
            ..Default::default()
        })
    }

    /// Fetch a single record by id.
    pub fn get(&self, id: i64) -> Result<Option<RunRecord>> {
        let conn = self.db.connection();
        conn.query_row(
            &format!("SELECT {HISTORY_COLUMNS} FROM command_history WHERE id = ?"),
            [id],
            Self::row_to_record,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Count history rows, optionally for a single project.
    pub fn count(&self, project_id: Option<i64>) -> Result<i64> {
        let conn = self.db.connection();
        let count: i64 = match project_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM command_history WHERE project_id = ?",
                [id],
                |r| r.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM command_history", [], |r| r.get(0))?,
        };
        Ok(count)
    }

    /// Delete records older than `days` days; returns the number removed.
    pub fn delete_old_records(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let conn = self.db.connection();
        let removed = conn.execute(
            "DELETE FROM command_history WHERE start_time < ?",
            [cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<RunRecord> {
        let args_json: Option<String> = row.get("command_args")?;
        let status_str: String = row.get("status")?;
        let start_time: String = row.get("start_time")?;
        let end_time: String = row.get("end_time")?;
        let created_at: String = row.get("created_at")?;
        let environment_info: Option<String> = row.get("environment_info")?;
        let working_directory: Option<String> = row.get("working_directory")?;

        Ok(RunRecord {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            command: row.get("command")?,
            command_name: row.get("command_name")?,
            command_args: args_json
                .filter(|s| !s.is_empty())
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            start_time: parse_ts(&start_time),
            end_time: parse_ts(&end_time),
            duration_ms: row.get("duration_ms")?,
            exit_code: row.get("exit_code")?,
            status: status_str.parse().unwrap_or(RunStatus::Failed),
            log_file_path: row.get("log_file_path")?,
            log_date: row.get("log_date")?,
            stdout_preview: row.get("stdout_preview")?,
            stderr_preview: row.get("stderr_preview")?,
            has_error: row.get("has_error")?,
            working_directory: working_directory.unwrap_or_default(),
            environment: environment_info.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: parse_ts(&created_at),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_record(project_id: i64, command: &str, exit_code: i32) -> RunRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let end = start + chrono::Duration::milliseconds(1500);
        RunRecord {
            id: 0,
            project_id,
            command: command.to_string(),
            command_name: crate::types::command_head(command),
            command_args: command
                .split_whitespace()
                .skip(1)
                .map(str::to_string)
                .collect(),
            start_time: start,
            end_time: end,
            duration_ms: 1500,
            exit_code,
            status: RunStatus::from_exit_code(exit_code),
            log_file_path: "/tmp/demo/.logcmd/2024-01-15/x.log".to_string(),
            log_date: "2024-01-15".to_string(),
            stdout_preview: None,
            stderr_preview: None,
            has_error: exit_code != 0,
            working_directory: "/tmp/demo".to_string(),
            environment: None,
            created_at: end,
        }
    }

    pub(crate) fn seeded_store() -> (HistoryStore, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();

        let tmp = std::env::temp_dir();
        let registry = crate::registry::ProjectRegistry::new(db.clone());
        let project = registry.register(&tmp).unwrap();

        (HistoryStore::new(db), project.id)
    }

    #[test]
    fn test_record_and_get_roundtrip() {
        let (store, project_id) = seeded_store();

        let id = store
            .record(&sample_record(project_id, "echo hello world", 0))
            .unwrap();
        let loaded = store.get(id).unwrap().unwrap();

        assert_eq!(loaded.command, "echo hello world");
        assert_eq!(loaded.command_name, "echo");
        assert_eq!(loaded.command_args, vec!["hello", "world"]);
        assert_eq!(loaded.exit_code, 0);
        assert_eq!(loaded.status, RunStatus::Success);
        assert!(!loaded.has_error);
        assert_eq!(loaded.log_date, "2024-01-15");
    }

    #[test]
    fn test_query_filters() {
        let (store, project_id) = seeded_store();

        store.record(&sample_record(project_id, "echo a", 0)).unwrap();
        store.record(&sample_record(project_id, "make b", 2)).unwrap();
        store.record(&sample_record(project_id, "echo c", 0)).unwrap();

        let all = store
            .query(&HistoryQuery {
                project_id: Some(project_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 3);

        let echoes = store
            .query(&HistoryQuery {
                project_id: Some(project_id),
                command_name: Some("echo".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(echoes.len(), 2);

        let failed = store.failed(project_id, 10).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].command_name, "make");

        assert_eq!(store.count(Some(project_id)).unwrap(), 3);
        assert_eq!(store.count(None).unwrap(), 3);
    }

    #[test]
    fn test_limit_and_order() {
        let (store, project_id) = seeded_store();

        for i in 0..5 {
            let mut record = sample_record(project_id, &format!("cmd{i}"), 0);
            record.start_time = record.start_time + chrono::Duration::seconds(i);
            store.record(&record).unwrap();
        }

        let recent = store.recent(project_id, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].command_name, "cmd4");

        let oldest_first = store
            .query(&HistoryQuery {
                project_id: Some(project_id),
                ascending: true,
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(oldest_first[0].command_name, "cmd0");
    }

    #[test]
    fn test_delete_old_records() {
        let (store, project_id) = seeded_store();

        store.record(&sample_record(project_id, "old", 0)).unwrap();
        let mut fresh = sample_record(project_id, "fresh", 0);
        fresh.start_time = Utc::now();
        store.record(&fresh).unwrap();

        let removed = store.delete_old_records(30).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(Some(project_id)).unwrap(), 1);
    }
}

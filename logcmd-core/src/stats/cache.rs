//! Per-day stats cache
//!
//! Each `(project, day)` row is materialized from run history and can be
//! regenerated at any time; the cache is never authoritative. A day with no
//! history never gets a row written (an existing row is left untouched for
//! [`StatsCache::generate_for_date`] — full rebuilds go through
//! [`StatsCache::delete_by_project`] first).

use crate::db::{parse_ts, Database};
use crate::error::{Error, Result};
use crate::types::StatsCacheRow;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::Arc;

const CACHE_COLUMNS: &str = "id, project_id, stat_date, \
     total_commands, success_commands, failed_commands, \
     total_duration_ms, avg_duration_ms, max_duration_ms, min_duration_ms, \
     command_distribution, exit_code_distribution, created_at, updated_at";

/// Stats cache engine over the catalog store.
pub struct StatsCache {
    db: Arc<Database>,
}

impl StatsCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Recompute and upsert the cache row for one `(project, day)`.
    ///
    /// No-op when the day has no history.
    pub fn generate_for_date(&self, project_id: i64, date: &str) -> Result<()> {
        let conn = self.db.connection();

        let (total, success, failed, total_duration, max_duration, min_duration): (
            i64,
            i64,
            i64,
            Option<i64>,
            Option<i64>,
            Option<i64>,
        ) = conn.query_row(
            r#"
            SELECT
                COUNT(*),
                SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                SUM(duration_ms),
                MAX(duration_ms),
                MIN(duration_ms)
            FROM command_history
            WHERE project_id = ?1 AND log_date = ?2
            "#,
            params![project_id, date],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?;

        if total == 0 {
            return Ok(());
        }

        let command_dist = Self::distribution::<String>(
            &conn,
            "SELECT command_name, COUNT(*) FROM command_history \
             WHERE project_id = ?1 AND log_date = ?2 GROUP BY command_name",
            project_id,
            date,
        )?;
        let exit_dist = Self::distribution::<i32>(
            &conn,
            "SELECT exit_code, COUNT(*) FROM command_history \
             WHERE project_id = ?1 AND log_date = ?2 GROUP BY exit_code",
            project_id,
            date,
        )?;

        let total_duration = total_duration.unwrap_or(0);
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO project_stats_cache (
                project_id, stat_date,
                total_commands, success_commands, failed_commands,
                total_duration_ms, avg_duration_ms, max_duration_ms, min_duration_ms,
                command_distribution, exit_code_distribution,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            ON CONFLICT(project_id, stat_date) DO UPDATE SET
                total_commands = excluded.total_commands,
                success_commands = excluded.success_commands,
                failed_commands = excluded.failed_commands,
                total_duration_ms = excluded.total_duration_ms,
                avg_duration_ms = excluded.avg_duration_ms,
                max_duration_ms = excluded.max_duration_ms,
                min_duration_ms = excluded.min_duration_ms,
                command_distribution = excluded.command_distribution,
                exit_code_distribution = excluded.exit_code_distribution,
                updated_at = excluded.updated_at
            "#,
            params![
                project_id,
                date,
                total,
                success,
                failed,
                total_duration,
                total_duration / total,
                max_duration.unwrap_or(0),
                min_duration.unwrap_or(0),
                serde_json::to_string(&command_dist)?,
                serde_json::to_string(&exit_dist)?,
                now,
            ],
        )?;

        Ok(())
    }

    fn distribution<K>(
        conn: &rusqlite::Connection,
        sql: &str,
        project_id: i64,
        date: &str,
    ) -> Result<HashMap<K, i64>>
    where
        K: rusqlite::types::FromSql + std::hash::Hash + Eq,
    {
        let mut stmt = conn.prepare(sql)?;
        let dist = stmt
            .query_map(params![project_id, date], |row| {
                Ok((row.get::<_, K>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<HashMap<K, i64>, _>>()?;
        Ok(dist)
    }

    /// Fetch a single cache row; `None` when the day has no row.
    pub fn get(&self, project_id: i64, date: &str) -> Result<Option<StatsCacheRow>> {
        let conn = self.db.connection();
        conn.query_row(
            &format!(
                "SELECT {CACHE_COLUMNS} FROM project_stats_cache \
                 WHERE project_id = ?1 AND stat_date = ?2"
            ),
            params![project_id, date],
            Self::row_to_cache,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Fetch the rows inside an inclusive date range, ascending.
    pub fn get_range(
        &self,
        project_id: i64,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<StatsCacheRow>> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CACHE_COLUMNS} FROM project_stats_cache \
             WHERE project_id = ?1 AND stat_date BETWEEN ?2 AND ?3 \
             ORDER BY stat_date ASC"
        ))?;

        let rows = stmt
            .query_map(params![project_id, start_date, end_date], Self::row_to_cache)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Fetch the row for a day, generating it first when absent.
    pub fn get_or_generate(&self, project_id: i64, date: &str) -> Result<Option<StatsCacheRow>> {
        if let Some(row) = self.get(project_id, date)? {
            return Ok(Some(row));
        }
        self.generate_for_date(project_id, date)?;
        self.get(project_id, date)
    }

    /// Regenerate the rows for every date present in history but absent in
    /// the cache (left anti-join on date).
    pub fn sync(&self, project_id: i64) -> Result<()> {
        let missing: Vec<String> = {
            let conn = self.db.connection();
            let mut stmt = conn.prepare(
                r#"
                SELECT DISTINCT h.log_date
                FROM command_history h
                LEFT JOIN project_stats_cache s
                    ON h.project_id = s.project_id AND h.log_date = s.stat_date
                WHERE h.project_id = ?1 AND s.id IS NULL
                "#,
            )?;
            let result = stmt.query_map([project_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        };

        for date in missing {
            self.generate_for_date(project_id, &date)?;
        }

        Ok(())
    }

    /// Regenerate every distinct date of a project.
    pub fn generate_for_project(&self, project_id: i64) -> Result<()> {
        let dates: Vec<String> = {
            let conn = self.db.connection();
            let mut stmt = conn.prepare(
                "SELECT DISTINCT log_date FROM command_history \
                 WHERE project_id = ?1 ORDER BY log_date",
            )?;
            let result = stmt.query_map([project_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        };

        for date in dates {
            self.generate_for_date(project_id, &date)?;
        }

        Ok(())
    }

    /// Delete one cache row; returns whether a row existed.
    pub fn delete(&self, project_id: i64, date: &str) -> Result<bool> {
        let conn = self.db.connection();
        let affected = conn.execute(
            "DELETE FROM project_stats_cache WHERE project_id = ?1 AND stat_date = ?2",
            params![project_id, date],
        )?;
        Ok(affected > 0)
    }

    /// Delete every cache row of a project.
    pub fn delete_by_project(&self, project_id: i64) -> Result<()> {
        let conn = self.db.connection();
        conn.execute(
            "DELETE FROM project_stats_cache WHERE project_id = ?1",
            [project_id],
        )?;
        Ok(())
    }

    /// Merge the rows of an inclusive date range into a single summary row
    /// labelled `"<start> to <end>"`. Distributions merge element-wise;
    /// max/min are taken across days (zero-duration days don't contribute to
    /// the minimum); the average is recomputed from the merged totals.
    pub fn summary(
        &self,
        project_id: i64,
        start_date: &str,
        end_date: &str,
    ) -> Result<Option<StatsCacheRow>> {
        let rows = self.get_range(project_id, start_date, end_date)?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut summary = StatsCacheRow {
            id: 0,
            project_id,
            stat_date: format!("{} to {}", start_date, end_date),
            total_commands: 0,
            success_commands: 0,
            failed_commands: 0,
            total_duration_ms: 0,
            avg_duration_ms: 0,
            max_duration_ms: 0,
            min_duration_ms: 0,
            command_distribution: HashMap::new(),
            exit_code_distribution: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let mut min_duration: Option<i64> = None;
        for row in &rows {
            summary.total_commands += row.total_commands;
            summary.success_commands += row.success_commands;
            summary.failed_commands += row.failed_commands;
            summary.total_duration_ms += row.total_duration_ms;

            summary.max_duration_ms = summary.max_duration_ms.max(row.max_duration_ms);
            if row.min_duration_ms > 0 {
                min_duration = Some(match min_duration {
                    Some(current) => current.min(row.min_duration_ms),
                    None => row.min_duration_ms,
                });
            }

            for (command, count) in &row.command_distribution {
                *summary
                    .command_distribution
                    .entry(command.clone())
                    .or_insert(0) += count;
            }
            for (code, count) in &row.exit_code_distribution {
                *summary.exit_code_distribution.entry(*code).or_insert(0) += count;
            }
        }

        summary.min_duration_ms = min_duration.unwrap_or(0);
        if summary.total_commands > 0 {
            summary.avg_duration_ms = summary.total_duration_ms / summary.total_commands;
        }

        Ok(Some(summary))
    }

    /// Summary over every cached date of a project.
    pub fn project_summary(&self, project_id: i64) -> Result<Option<StatsCacheRow>> {
        let bounds: Option<(String, String)> = {
            let conn = self.db.connection();
            conn.query_row(
                "SELECT MIN(stat_date), MAX(stat_date) FROM project_stats_cache \
                 WHERE project_id = ?1",
                [project_id],
                |row| {
                    let min: Option<String> = row.get(0)?;
                    let max: Option<String> = row.get(1)?;
                    Ok(min.zip(max))
                },
            )?
        };

        match bounds {
            Some((min, max)) => self.summary(project_id, &min, &max),
            None => Ok(None),
        }
    }

    /// Export the rows of a date range as pretty-printed JSON.
    pub fn export_json(&self, project_id: i64, start_date: &str, end_date: &str) -> Result<String> {
        let rows = self.get_range(project_id, start_date, end_date)?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    fn row_to_cache(row: &Row) -> rusqlite::Result<StatsCacheRow> {
        let command_dist: Option<String> = row.get("command_distribution")?;
        let exit_dist: Option<String> = row.get("exit_code_distribution")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(StatsCacheRow {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            stat_date: row.get("stat_date")?,
            total_commands: row.get("total_commands")?,
            success_commands: row.get("success_commands")?,
            failed_commands: row.get("failed_commands")?,
            total_duration_ms: row.get("total_duration_ms")?,
            avg_duration_ms: row.get("avg_duration_ms")?,
            max_duration_ms: row.get("max_duration_ms")?,
            min_duration_ms: row.get("min_duration_ms")?,
            command_distribution: command_dist
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            exit_code_distribution: exit_dist
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }
}

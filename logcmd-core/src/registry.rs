//! Project registry
//!
//! Projects are keyed by the absolute path of their log directory. The
//! registry performs upserts on registration, keeps the aggregate counters
//! (`total = success + failed` at all times) and prunes rows whose directory
//! has vanished.

use crate::db::{parse_opt_ts, parse_ts, Database};
use crate::error::{Error, Result};
use crate::types::Project;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PROJECT_COLUMNS: &str = "id, path, name, description, category, tags, \
     total_commands, success_commands, failed_commands, total_duration_ms, \
     last_command, last_command_status, last_command_time, \
     created_at, updated_at, last_checked, template_config, custom_config";

/// Result of a [`ProjectRegistry::check_and_cleanup`] sweep.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Paths whose rows were removed because the directory no longer exists
    pub removed: Vec<PathBuf>,
    /// Number of rows whose `last_checked` was refreshed
    pub checked: usize,
}

/// Registry of projects backed by the catalog store.
pub struct ProjectRegistry {
    db: Arc<Database>,
}

impl ProjectRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Register a project for `path`, upserting on the absolute path.
    ///
    /// On insert the counters start at zero and the display name defaults to
    /// the parent directory's basename (a trailing `.logcmd` component is
    /// stripped first). On conflict only `updated_at` and `last_checked`
    /// move. Fails with [`Error::NotADirectory`] when the path is not an
    /// existing directory.
    pub fn register(&self, path: &Path) -> Result<Project> {
        let abs = crate::config::absolute_path(path);

        let meta = std::fs::metadata(&abs).map_err(|_| Error::NotADirectory(abs.clone()))?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(abs));
        }

        let name = project_display_name(&abs);
        let now = Utc::now().to_rfc3339();

        {
            let conn = self.db.connection();
            conn.execute(
                r#"
                INSERT INTO projects (path, name, created_at, updated_at, last_checked)
                VALUES (?1, ?2, ?3, ?3, ?3)
                ON CONFLICT(path) DO UPDATE SET
                    updated_at = excluded.updated_at,
                    last_checked = excluded.last_checked
                "#,
                params![abs.to_string_lossy().to_string(), name, now],
            )?;
        }

        self.get_by_path(&abs)?
            .ok_or_else(|| Error::ProjectNotFound(abs.to_string_lossy().into_owned()))
    }

    /// List all projects ordered by `updated_at` descending.
    pub fn list(&self) -> Result<Vec<Project>> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY updated_at DESC"
        ))?;

        let projects = stmt
            .query_map([], Self::row_to_project)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(projects)
    }

    /// Resolve a project by decimal id or by path.
    pub fn get(&self, id_or_path: &str) -> Result<Project> {
        if let Ok(id) = id_or_path.parse::<i64>() {
            return self
                .get_by_id(id)?
                .ok_or_else(|| Error::ProjectNotFound(id_or_path.to_string()));
        }

        let abs = crate::config::absolute_path(Path::new(id_or_path));
        self.get_by_path(&abs)?
            .ok_or_else(|| Error::ProjectNotFound(id_or_path.to_string()))
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Project>> {
        let conn = self.db.connection();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"),
            [id],
            Self::row_to_project,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn get_by_path(&self, path: &Path) -> Result<Option<Project>> {
        let conn = self.db.connection();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE path = ?"),
            [path.to_string_lossy().to_string()],
            Self::row_to_project,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Replace the mutable fields of a project; stamps `updated_at`.
    pub fn update(&self, project: &Project) -> Result<()> {
        let tags_json = serde_json::to_string(&project.tags)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.db.connection();
        conn.execute(
            r#"
            UPDATE projects SET
                name = ?1,
                description = ?2,
                category = ?3,
                tags = ?4,
                total_commands = ?5,
                success_commands = ?6,
                failed_commands = ?7,
                total_duration_ms = ?8,
                last_command = ?9,
                last_command_status = ?10,
                last_command_time = ?11,
                updated_at = ?12,
                template_config = ?13,
                custom_config = ?14
            WHERE id = ?15
            "#,
            params![
                project.name,
                project.description,
                project.category,
                tags_json,
                project.total_commands,
                project.success_commands,
                project.failed_commands,
                project.total_duration_ms,
                project.last_command,
                project.last_command_status,
                project.last_command_time.map(|t| t.to_rfc3339()),
                now,
                project.template_config,
                project.custom_config,
                project.id,
            ],
        )?;
        Ok(())
    }

    /// Atomically bump the counters and the last-run summary after a run.
    ///
    /// Each call increments `total_commands` by exactly one and exactly one
    /// of the success/failure buckets, regardless of interleaving.
    pub fn update_stats(
        &self,
        project_id: i64,
        command: &str,
        success: bool,
        duration_ms: i64,
    ) -> Result<()> {
        let status = if success { "success" } else { "failed" };
        let now = Utc::now().to_rfc3339();

        let conn = self.db.connection();
        conn.execute(
            r#"
            UPDATE projects SET
                total_commands = total_commands + 1,
                success_commands = success_commands + CASE WHEN ?1 THEN 1 ELSE 0 END,
                failed_commands = failed_commands + CASE WHEN ?1 THEN 0 ELSE 1 END,
                total_duration_ms = total_duration_ms + ?2,
                last_command = ?3,
                last_command_status = ?4,
                last_command_time = ?5,
                updated_at = ?5
            WHERE id = ?6
            "#,
            params![success, duration_ms, command, status, now, project_id],
        )?;
        Ok(())
    }

    /// Refresh `last_checked` for a project.
    pub fn update_last_checked(&self, id_or_path: &str) -> Result<()> {
        let project = self.get(id_or_path)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.db.connection();
        conn.execute(
            "UPDATE projects SET last_checked = ?1 WHERE id = ?2",
            params![now, project.id],
        )?;
        Ok(())
    }

    /// Delete a project row. History and stats-cache rows follow through the
    /// store's cascade; task rows whose log directory was this project are
    /// removed alongside.
    pub fn delete(&self, id_or_path: &str) -> Result<()> {
        let project = self.get(id_or_path)?;

        let conn = self.db.connection();
        let affected = conn.execute("DELETE FROM projects WHERE id = ?", [project.id])?;
        if affected == 0 {
            return Err(Error::ProjectNotFound(id_or_path.to_string()));
        }
        conn.execute(
            "DELETE FROM tasks WHERE log_dir = ?",
            [project.path.to_string_lossy().to_string()],
        )?;

        Ok(())
    }

    /// Stat every registered path: remove rows whose directory vanished,
    /// refresh `last_checked` on the survivors. Transient stat errors other
    /// than not-found leave the row untouched.
    pub fn check_and_cleanup(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        for project in self.list()? {
            match std::fs::metadata(&project.path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    self.delete(&project.id.to_string())?;
                    report.removed.push(project.path);
                }
                Err(e) => {
                    tracing::warn!(path = %project.path.display(), error = %e, "skipping project during cleanup");
                }
                Ok(_) => {
                    self.update_last_checked(&project.id.to_string())?;
                    report.checked += 1;
                }
            }
        }

        Ok(report)
    }

    fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
        let path_str: String = row.get("path")?;
        let tags_json: String = row.get("tags")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let last_checked: String = row.get("last_checked")?;
        let last_command_time: Option<String> = row.get("last_command_time")?;

        Ok(Project {
            id: row.get("id")?,
            path: PathBuf::from(path_str),
            name: row.get("name")?,
            description: row.get("description")?,
            category: row.get("category")?,
            tags: if tags_json.is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&tags_json).unwrap_or_default()
            },
            total_commands: row.get("total_commands")?,
            success_commands: row.get("success_commands")?,
            failed_commands: row.get("failed_commands")?,
            total_duration_ms: row.get("total_duration_ms")?,
            last_command: row.get("last_command")?,
            last_command_status: row.get("last_command_status")?,
            last_command_time: parse_opt_ts(last_command_time),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            last_checked: parse_ts(&last_checked),
            template_config: row.get("template_config")?,
            custom_config: row.get("custom_config")?,
        })
    }
}

/// Display name for a project path: the basename of the directory owning the
/// log tree. A trailing `.logcmd` component is stripped before taking the
/// basename.
pub fn project_display_name(path: &Path) -> String {
    let effective = if path.file_name().map(|n| n == ".logcmd").unwrap_or(false) {
        path.parent().unwrap_or(path)
    } else {
        path
    };
    effective
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> (ProjectRegistry, tempfile::TempDir) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        (ProjectRegistry::new(db), tempfile::tempdir().unwrap())
    }

    #[test]
    fn test_register_initializes_counters() {
        let (registry, tmp) = test_registry();
        let log_dir = tmp.path().join("demo").join(".logcmd");
        std::fs::create_dir_all(&log_dir).unwrap();

        let project = registry.register(&log_dir).unwrap();
        assert_eq!(project.name, "demo");
        assert_eq!(project.total_commands, 0);
        assert_eq!(project.success_commands, 0);
        assert_eq!(project.failed_commands, 0);
    }

    #[test]
    fn test_register_is_upsert() {
        let (registry, tmp) = test_registry();
        let log_dir = tmp.path().join("demo").join(".logcmd");
        std::fs::create_dir_all(&log_dir).unwrap();

        let first = registry.register(&log_dir).unwrap();
        registry
            .update_stats(first.id, "echo", true, 10)
            .unwrap();
        let second = registry.register(&log_dir).unwrap();

        assert_eq!(first.id, second.id);
        // counters survive re-registration
        assert_eq!(second.total_commands, 1);
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn test_register_rejects_missing_directory() {
        let (registry, tmp) = test_registry();
        let missing = tmp.path().join("nope");

        match registry.register(&missing) {
            Err(Error::NotADirectory(_)) => {}
            other => panic!("expected NotADirectory, got {:?}", other.map(|p| p.id)),
        }
    }

    #[test]
    fn test_get_by_id_and_path() {
        let (registry, tmp) = test_registry();
        let log_dir = tmp.path().join("demo").join(".logcmd");
        std::fs::create_dir_all(&log_dir).unwrap();

        let project = registry.register(&log_dir).unwrap();
        let by_id = registry.get(&project.id.to_string()).unwrap();
        let by_path = registry.get(&log_dir.to_string_lossy()).unwrap();

        assert_eq!(by_id.id, project.id);
        assert_eq!(by_path.id, project.id);
        assert!(matches!(
            registry.get("99999"),
            Err(Error::ProjectNotFound(_))
        ));
    }

    #[test]
    fn test_update_stats_counter_invariant() {
        let (registry, tmp) = test_registry();
        let log_dir = tmp.path().join("demo").join(".logcmd");
        std::fs::create_dir_all(&log_dir).unwrap();
        let project = registry.register(&log_dir).unwrap();

        registry.update_stats(project.id, "echo", true, 5).unwrap();
        registry.update_stats(project.id, "make", false, 25).unwrap();
        registry.update_stats(project.id, "echo", true, 10).unwrap();

        let project = registry.get(&project.id.to_string()).unwrap();
        assert_eq!(project.total_commands, 3);
        assert_eq!(project.success_commands, 2);
        assert_eq!(project.failed_commands, 1);
        assert_eq!(
            project.total_commands,
            project.success_commands + project.failed_commands
        );
        assert_eq!(project.total_duration_ms, 40);
        assert_eq!(project.last_command, "echo");
        assert_eq!(project.last_command_status, "success");
        assert!(project.last_command_time.is_some());
    }

    #[test]
    fn test_update_replaces_mutable_fields() {
        let (registry, tmp) = test_registry();
        let log_dir = tmp.path().join("demo").join(".logcmd");
        std::fs::create_dir_all(&log_dir).unwrap();

        let mut project = registry.register(&log_dir).unwrap();
        project.name = "renamed".to_string();
        project.description = "build logs".to_string();
        project.category = "ci".to_string();
        project.tags = vec!["rust".to_string(), "nightly".to_string()];
        registry.update(&project).unwrap();

        let loaded = registry.get(&project.id.to_string()).unwrap();
        assert_eq!(loaded.name, "renamed");
        assert_eq!(loaded.description, "build logs");
        assert_eq!(loaded.category, "ci");
        assert_eq!(loaded.tags, vec!["rust", "nightly"]);
        assert!(loaded.updated_at >= project.updated_at);
    }

    #[test]
    fn test_delete_cascades_to_history() {
        let (registry, tmp) = test_registry();
        let log_dir = tmp.path().join("demo").join(".logcmd");
        std::fs::create_dir_all(&log_dir).unwrap();
        let project = registry.register(&log_dir).unwrap();

        {
            let conn = registry.db.connection();
            conn.execute(
                r#"
                INSERT INTO command_history
                    (project_id, command, command_name, start_time, end_time,
                     duration_ms, exit_code, status, log_file_path, log_date, created_at)
                VALUES (?1, 'echo hi', 'echo', '2024-01-15T10:00:00Z', '2024-01-15T10:00:01Z',
                        1000, 0, 'success', '/tmp/x.log', '2024-01-15', '2024-01-15T10:00:01Z')
                "#,
                [project.id],
            )
            .unwrap();
        }

        registry.delete(&project.id.to_string()).unwrap();

        let count: i64 = registry
            .db
            .connection()
            .query_row("SELECT COUNT(*) FROM command_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_check_and_cleanup_removes_vanished() {
        let (registry, tmp) = test_registry();
        let keep = tmp.path().join("keep").join(".logcmd");
        let gone = tmp.path().join("gone").join(".logcmd");
        std::fs::create_dir_all(&keep).unwrap();
        std::fs::create_dir_all(&gone).unwrap();

        registry.register(&keep).unwrap();
        registry.register(&gone).unwrap();
        std::fs::remove_dir_all(tmp.path().join("gone")).unwrap();

        let report = registry.check_and_cleanup().unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_project_display_name_strips_logcmd() {
        assert_eq!(
            project_display_name(Path::new("/work/demo/.logcmd")),
            "demo"
        );
        assert_eq!(project_display_name(Path::new("/work/demo")), "demo");
    }
}

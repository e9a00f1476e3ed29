//! Detached-task supervision
//!
//! A task row tracks one background run through the closed state set
//! `pending → running → success | failed`, with `stopped` reachable from the
//! two active states. Conditional transitions (`mark_running`,
//! `mark_stopped`) match only active rows and surface a raced stop as
//! [`Error::TaskStateChanged`]; `mark_completion` is unconditional so a
//! worker can always record its terminal state.
//!
//! The detached spawn protocol: the foreground process persists the task,
//! re-executes its own binary as `task worker <id>` in a new session with
//! all standard streams on the null device, records the child PID and
//! releases the handle. Null streams — not pipes — keep the worker alive
//! after the parent exits; a write to a closed pipe would raise SIGPIPE.

use crate::db::{parse_opt_ts, parse_ts, Database};
use crate::error::{Error, Result};
use crate::types::{Task, TaskStatus};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

const TASK_COLUMNS: &str = "id, command, command_args, working_dir, log_dir, status, \
     pid, log_file_path, exit_code, error_message, \
     created_at, updated_at, started_at, completed_at";

/// Fields required to create a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub command: String,
    pub command_args: Vec<String>,
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
}

/// Store for task rows and their state machine.
pub struct TaskStore {
    db: Arc<Database>,
}

impl TaskStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new task in `pending` state; returns the populated row.
    pub fn create(&self, new: &NewTask) -> Result<Task> {
        if new.command.trim().is_empty() {
            return Err(Error::InvalidInput("task command must not be empty".to_string()));
        }

        let args_json = serde_json::to_string(&new.command_args)?;
        let now = Utc::now().to_rfc3339();

        let id = {
            let conn = self.db.connection();
            conn.execute(
                r#"
                INSERT INTO tasks (command, command_args, working_dir, log_dir, status,
                                   error_message, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, '', ?6, ?6)
                "#,
                params![
                    new.command,
                    args_json,
                    new.working_dir.to_string_lossy().to_string(),
                    new.log_dir.to_string_lossy().to_string(),
                    TaskStatus::Pending.as_str(),
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };

        self.get(id)
    }

    /// Fetch a task by id.
    pub fn get(&self, id: i64) -> Result<Task> {
        let conn = self.db.connection();
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"),
            [id],
            Self::row_to_task,
        )
        .optional()?
        .ok_or(Error::TaskNotFound(id))
    }

    /// Tasks in `pending` or `running` state, oldest first.
    pub fn list_active(&self) -> Result<Vec<Task>> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status IN ('pending', 'running') ORDER BY created_at ASC"
        ))?;

        let tasks = stmt
            .query_map([], Self::row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(tasks)
    }

    /// Unconditionally set the recorded worker PID.
    pub fn update_pid(&self, id: i64, pid: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.connection();
        conn.execute(
            "UPDATE tasks SET pid = ?1, updated_at = ?2 WHERE id = ?3",
            params![pid, now, id],
        )?;
        Ok(())
    }

    /// Unconditionally set the pre-computed log file path.
    pub fn update_log_file_path(&self, id: i64, path: &Path) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.connection();
        conn.execute(
            "UPDATE tasks SET log_file_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![path.to_string_lossy().to_string(), now, id],
        )?;
        Ok(())
    }

    /// `pending|running → running`. Stamps `started_at` only on the first
    /// transition. Returns [`Error::TaskStateChanged`] when a stop raced in.
    pub fn mark_running(&self, id: i64, pid: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.connection();
        let affected = conn.execute(
            r#"
            UPDATE tasks SET
                status = 'running',
                pid = ?1,
                started_at = COALESCE(started_at, ?2),
                updated_at = ?2
            WHERE id = ?3 AND status IN ('pending', 'running')
            "#,
            params![pid, now, id],
        )?;

        if affected == 0 {
            return Err(Error::TaskStateChanged);
        }
        Ok(())
    }

    /// Record the terminal state of a run. Unconditional: a worker must
    /// always be able to report how it ended. Clears the PID and stamps
    /// `completed_at`; a `None` log path keeps whatever was stored.
    pub fn mark_completion(
        &self,
        id: i64,
        status: TaskStatus,
        exit_code: i32,
        log_path: Option<&Path>,
        error_message: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.connection();
        conn.execute(
            r#"
            UPDATE tasks SET
                status = ?1,
                exit_code = ?2,
                log_file_path = COALESCE(?3, log_file_path),
                error_message = ?4,
                completed_at = ?5,
                updated_at = ?5,
                pid = NULL
            WHERE id = ?6
            "#,
            params![
                status.as_str(),
                exit_code,
                log_path.map(|p| p.to_string_lossy().into_owned()),
                error_message,
                now,
                id,
            ],
        )?;
        Ok(())
    }

    /// Stop an active task: `pending|running → stopped|failed` with exit
    /// code `-1`. Returns [`Error::TaskStateChanged`] when no active row
    /// matched (already terminal or missing).
    pub fn mark_stopped(&self, id: i64, status: TaskStatus, error_message: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.connection();
        let affected = conn.execute(
            r#"
            UPDATE tasks SET
                status = ?1,
                exit_code = -1,
                error_message = ?2,
                completed_at = ?3,
                updated_at = ?3,
                pid = NULL
            WHERE id = ?4 AND status IN ('pending', 'running')
            "#,
            params![status.as_str(), error_message, now, id],
        )?;

        if affected == 0 {
            return Err(Error::TaskStateChanged);
        }
        Ok(())
    }

    fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
        let args_json: Option<String> = row.get("command_args")?;
        let working_dir: String = row.get("working_dir")?;
        let log_dir: String = row.get("log_dir")?;
        let status_str: String = row.get("status")?;
        let log_file_path: Option<String> = row.get("log_file_path")?;
        let error_message: Option<String> = row.get("error_message")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let started_at: Option<String> = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;

        Ok(Task {
            id: row.get("id")?,
            command: row.get("command")?,
            command_args: args_json
                .filter(|s| !s.is_empty())
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            working_dir: PathBuf::from(working_dir),
            log_dir: PathBuf::from(log_dir),
            status: status_str.parse().unwrap_or(TaskStatus::Failed),
            pid: row.get("pid")?,
            log_file_path: log_file_path.filter(|s| !s.is_empty()).map(PathBuf::from),
            exit_code: row.get("exit_code")?,
            error_message: error_message.unwrap_or_default(),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            started_at: parse_opt_ts(started_at),
            completed_at: parse_opt_ts(completed_at),
        })
    }
}

// ============================================
// Process helpers
// ============================================

/// Probe liveness with signal 0. "No such process" means dead; "permission
/// denied" means alive but owned by someone else.
pub fn process_alive(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    !matches!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::ESRCH)
    )
}

fn send_signal(pid: i64, signal: libc::c_int) -> std::io::Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Graceful interrupt (SIGINT).
pub fn signal_interrupt(pid: i64) -> std::io::Result<()> {
    send_signal(pid, libc::SIGINT)
}

/// Hard kill (SIGKILL).
pub fn signal_kill(pid: i64) -> std::io::Result<()> {
    send_signal(pid, libc::SIGKILL)
}

/// Whether a signalling error means the process is already gone.
pub fn is_process_gone(error: &std::io::Error) -> bool {
    matches!(error.raw_os_error(), Some(libc::ESRCH))
}

/// Spawn this binary as a detached `task worker <id>` process.
///
/// The worker starts a new session and has all standard streams on the null
/// device; the returned PID is the only handle kept.
pub fn spawn_detached_worker(task_id: i64) -> Result<u32> {
    let exe = std::env::current_exe()?;

    let mut command = Command::new(exe);
    command
        .arg("task")
        .arg("worker")
        .arg(task_id.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command
        .spawn()
        .map_err(|e| Error::Spawn(format!("task worker: {}", e)))?;

    // Only the PID is kept; the Child handle is dropped so nothing pins the
    // detached worker to this process.
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> TaskStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        TaskStore::new(db)
    }

    fn sample_task(store: &TaskStore) -> Task {
        store
            .create(&NewTask {
                command: "sleep".to_string(),
                command_args: vec!["1".to_string()],
                working_dir: PathBuf::from("/tmp"),
                log_dir: PathBuf::from("/tmp/.logcmd"),
            })
            .unwrap()
    }

    #[test]
    fn test_create_starts_pending() {
        let store = test_store();
        let task = sample_task(&store);

        assert!(task.id > 0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.pid.is_none());
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert_eq!(task.command_line(), "sleep 1");
    }

    #[test]
    fn test_create_rejects_empty_command() {
        let store = test_store();
        let result = store.create(&NewTask {
            command: "  ".to_string(),
            command_args: vec![],
            working_dir: PathBuf::from("/tmp"),
            log_dir: PathBuf::from("/tmp/.logcmd"),
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_get_unknown_task() {
        let store = test_store();
        assert!(matches!(store.get(404), Err(Error::TaskNotFound(404))));
    }

    #[test]
    fn test_running_transition_sets_pid_and_start() {
        let store = test_store();
        let task = sample_task(&store);

        store.mark_running(task.id, 4242).unwrap();
        let task = store.get(task.id).unwrap();

        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.pid, Some(4242));
        assert!(task.started_at.is_some());
    }

    #[test]
    fn test_mark_running_keeps_first_started_at() {
        let store = test_store();
        let task = sample_task(&store);

        store.mark_running(task.id, 100).unwrap();
        let first = store.get(task.id).unwrap().started_at.unwrap();
        store.mark_running(task.id, 100).unwrap();
        let second = store.get(task.id).unwrap().started_at.unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_mark_running_after_stop_is_state_changed() {
        let store = test_store();
        let task = sample_task(&store);

        store
            .mark_stopped(task.id, TaskStatus::Stopped, "stop requested")
            .unwrap();

        assert!(matches!(
            store.mark_running(task.id, 4242),
            Err(Error::TaskStateChanged)
        ));
        // terminal states are absorbing
        assert_eq!(store.get(task.id).unwrap().status, TaskStatus::Stopped);
    }

    #[test]
    fn test_completion_clears_pid() {
        let store = test_store();
        let task = sample_task(&store);
        store.mark_running(task.id, 4242).unwrap();

        store
            .mark_completion(
                task.id,
                TaskStatus::Success,
                0,
                Some(Path::new("/tmp/.logcmd/x.log")),
                "",
            )
            .unwrap();

        let task = store.get(task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.pid.is_none());
        assert_eq!(task.exit_code, Some(0));
        assert!(task.completed_at.is_some());
        assert_eq!(
            task.log_file_path.as_deref(),
            Some(Path::new("/tmp/.logcmd/x.log"))
        );
        assert!(task.started_at.unwrap() <= task.completed_at.unwrap());
    }

    #[test]
    fn test_completion_keeps_log_path_when_absent() {
        let store = test_store();
        let task = sample_task(&store);
        store
            .update_log_file_path(task.id, Path::new("/tmp/pre.log"))
            .unwrap();

        store
            .mark_completion(task.id, TaskStatus::Failed, -1, None, "boom")
            .unwrap();

        let task = store.get(task.id).unwrap();
        assert_eq!(task.log_file_path.as_deref(), Some(Path::new("/tmp/pre.log")));
        assert_eq!(task.error_message, "boom");
    }

    #[test]
    fn test_mark_stopped_on_terminal_task_errors() {
        let store = test_store();
        let task = sample_task(&store);

        store
            .mark_completion(task.id, TaskStatus::Success, 0, None, "")
            .unwrap();

        assert!(matches!(
            store.mark_stopped(task.id, TaskStatus::Stopped, "late"),
            Err(Error::TaskStateChanged)
        ));
    }

    #[test]
    fn test_mark_stopped_sets_sentinel_exit_code() {
        let store = test_store();
        let task = sample_task(&store);
        store.mark_running(task.id, 4242).unwrap();

        store
            .mark_stopped(task.id, TaskStatus::Failed, "process died")
            .unwrap();

        let task = store.get(task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(-1));
        assert!(task.pid.is_none());
        assert_eq!(task.error_message, "process died");
    }

    #[test]
    fn test_list_active_excludes_terminal() {
        let store = test_store();
        let first = sample_task(&store);
        let second = sample_task(&store);
        let third = sample_task(&store);

        store.mark_running(second.id, 99).unwrap();
        store
            .mark_completion(third.id, TaskStatus::Success, 0, None, "")
            .unwrap();

        let active = store.list_active().unwrap();
        let ids: Vec<i64> = active.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_process_alive_probe() {
        // this very test process is alive
        assert!(process_alive(std::process::id() as i64));
        assert!(!process_alive(0));
        assert!(!process_alive(-1));
        // PID from far outside any plausible allocation range
        assert!(!process_alive(i32::MAX as i64 - 1));
    }

    #[test]
    fn test_is_process_gone() {
        let err = std::io::Error::from_raw_os_error(libc::ESRCH);
        assert!(is_process_gone(&err));
        let err = std::io::Error::from_raw_os_error(libc::EPERM);
        assert!(!is_process_gone(&err));
    }
}

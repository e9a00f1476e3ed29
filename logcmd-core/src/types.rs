//! Core domain types for logcmd
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Project** | A registered directory that owns a tree of log files |
//! | **Run** | One execution of a user command: one log file plus one history row |
//! | **Task** | A persisted descriptor for a detached background run |
//! | **Stats cache row** | A per-day materialized aggregate over run history |
//! | **Worker** | The detached process instance that executes a single task |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ============================================
// Run status
// ============================================

/// Outcome of a single run. `Success` if and only if the exit code was zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            RunStatus::Success
        } else {
            RunStatus::Failed
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("unknown run status: {}", s)),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Task status
// ============================================

/// Lifecycle state of a detached task.
///
/// Transitions: `Pending → Running → Success | Failed`, and `Pending` or
/// `Running` may be stopped. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }

    /// Pending or running.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "stopped" => Ok(TaskStatus::Stopped),
            _ => Err(format!("unknown task status: {}", s)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Project
// ============================================

/// A registered log directory with aggregate run counters.
///
/// `path` is the unique external key; the integer `id` is assigned by the
/// store. Counters obey `total = success + failed`; the success rate is
/// always derived, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    /// Absolute path of the log directory (unique)
    pub path: PathBuf,
    /// Display name; defaults to the parent directory's basename
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,

    // Aggregate counters
    pub total_commands: i64,
    pub success_commands: i64,
    pub failed_commands: i64,
    pub total_duration_ms: i64,

    // Last-run summary
    pub last_command: String,
    pub last_command_status: String,
    pub last_command_time: Option<DateTime<Utc>>,

    // Lifecycle timestamps (stored in UTC)
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,

    // Opaque configuration blobs (JSON text)
    pub template_config: String,
    pub custom_config: String,
}

impl Project {
    /// Success percentage over all recorded runs, 0.0 when empty.
    pub fn success_rate(&self) -> f64 {
        if self.total_commands == 0 {
            return 0.0;
        }
        self.success_commands as f64 / self.total_commands as f64 * 100.0
    }

    /// Average run duration in milliseconds, 0 when empty.
    pub fn avg_duration_ms(&self) -> i64 {
        if self.total_commands == 0 {
            return 0;
        }
        self.total_duration_ms / self.total_commands
    }
}

// ============================================
// Run history record
// ============================================

/// One completed run, immutable once written.
///
/// `status == Success` ⇔ `exit_code == 0`; `log_date` is the date portion of
/// `start_time` in the local zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub project_id: i64,

    /// Full command line, command head plus space-joined arguments
    pub command: String,
    /// First whitespace-separated token of the command line
    pub command_name: String,
    pub command_args: Vec<String>,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub exit_code: i32,
    pub status: RunStatus,

    pub log_file_path: String,
    /// `YYYY-MM-DD` in the local zone
    pub log_date: String,

    pub stdout_preview: Option<String>,
    pub stderr_preview: Option<String>,
    pub has_error: bool,

    pub working_directory: String,
    pub environment: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

/// Join a command head and its arguments into the stored command line.
pub fn join_command(command: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    if !command.is_empty() {
        parts.push(command.to_string());
    }
    parts.extend(args.iter().cloned());
    parts.join(" ")
}

/// First whitespace-separated token of a command line.
pub fn command_head(command_line: &str) -> String {
    command_line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

// ============================================
// Stats cache row
// ============================================

/// Per `(project, day)` materialized aggregate, derived and replaceable.
///
/// The command distribution sums to `total_commands`; `avg_duration_ms` is
/// the integer truncation of `total / total_commands`. History is the source
/// of truth: any row can be regenerated from it at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsCacheRow {
    pub id: i64,
    pub project_id: i64,
    /// `YYYY-MM-DD`, or a `"<start> to <end>"` label for merged summaries
    pub stat_date: String,

    pub total_commands: i64,
    pub success_commands: i64,
    pub failed_commands: i64,

    pub total_duration_ms: i64,
    pub avg_duration_ms: i64,
    pub max_duration_ms: i64,
    pub min_duration_ms: i64,

    /// command head → count
    pub command_distribution: HashMap<String, i64>,
    /// exit code → count
    pub exit_code_distribution: HashMap<i32, i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Task
// ============================================

/// Descriptor for a detached background run.
///
/// `pid` is populated only while the task is running; terminal transitions
/// clear it and stamp `completed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub command: String,
    pub command_args: Vec<String>,
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub status: TaskStatus,
    pub pid: Option<i64>,
    pub log_file_path: Option<PathBuf>,
    pub exit_code: Option<i64>,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Full command line for display.
    pub fn command_line(&self) -> String {
        join_command(&self.command, &self.command_args)
    }
}

//! Command runner
//!
//! Spawns the user's command, tees its stdout/stderr to the terminal and to
//! a per-run log file, frames the log with a header and footer, and records
//! the run in the catalog. Each pipe is drained by its own thread; writes to
//! the shared log file go through a serialized sink that flushes at most
//! every 200 ms plus at explicit synchronization points. Both readers finish
//! before the child is reaped, so no writer can outlive the run.
//!
//! Bookkeeping (registration, counters, history, cache) is best-effort: the
//! user's command outcome is authoritative, failures there are reported on
//! stderr and swallowed.

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::format::{format_args_list, format_duration_ms};
use crate::history::HistoryStore;
use crate::registry::ProjectRegistry;
use crate::stats::StatsCache;
use crate::types::{command_head, join_command, Project, RunRecord, RunStatus};
use chrono::{DateTime, Local, Utc};
use crossbeam_channel::{bounded, select};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Flush cadence of the shared log sink.
const FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Command head as invoked
    pub command: String,
    pub args: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    /// Exit code; `-1` when the child died to a signal
    pub exit_code: i32,
    /// `exit_code == 0`
    pub success: bool,
}

/// A completed [`Runner::run`] call.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: RunResult,
    pub log_path: PathBuf,
    /// The ambient token fired during the run; the child was interrupted
    pub cancelled: bool,
}

/// Serialized writer over the log file. Interleaving is well-defined at the
/// granularity of one `write_bytes` call.
struct LogSink {
    writer: BufWriter<File>,
    last_flush: Instant,
}

impl LogSink {
    fn new(file: File, buffer_size: usize) -> Self {
        LogSink {
            writer: BufWriter::with_capacity(buffer_size.max(1024), file),
            last_flush: Instant::now(),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)?;
        if self.last_flush.elapsed() >= FLUSH_INTERVAL {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        self.last_flush = Instant::now();
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum StreamTarget {
    Stdout,
    Stderr,
}

/// Runner for a single configuration; construct one per invocation.
pub struct Runner {
    config: Config,
    db: Option<Arc<Database>>,
    preset_log_path: Option<PathBuf>,
}

impl Runner {
    pub fn new(config: Config) -> Self {
        Runner {
            config,
            db: None,
            preset_log_path: None,
        }
    }

    /// Attach the catalog for registration, counters, history and cache.
    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Use a pre-computed log path instead of rendering one (task workers
    /// store the path before the first byte is written).
    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.preset_log_path = Some(path);
        self
    }

    /// Execute `command args…`, teeing output and recording the run.
    ///
    /// A failure to open the log file or start the child is fatal and
    /// surfaced immediately. Cancellation interrupts the child but still
    /// writes the footer and returns the partial result with `cancelled`
    /// set.
    pub fn run(&self, cancel: &CancelToken, command: &str, args: &[String]) -> Result<RunOutcome> {
        let log_path = match &self.preset_log_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                path.clone()
            }
            None => self.config.log_file_path(command)?,
        };

        let project = self.register_project();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let sink = Arc::new(Mutex::new(LogSink::new(file, self.config.buffer_size)));

        println!("logging to: {}", log_path.display());
        write_header(&sink, command, args)?;

        let start_time = Utc::now();
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", command, e)))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("missing stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn("missing stderr pipe".to_string()))?;

        let (done_tx, done_rx) = bounded::<()>(0);
        let mut wait_result: Option<std::io::Result<std::process::ExitStatus>> = None;

        std::thread::scope(|scope| {
            // Translate cancellation into SIGINT while the child lives.
            let watcher = {
                let cancel_rx = cancel.channel().clone();
                scope.spawn(move || {
                    select! {
                        recv(cancel_rx) -> _ => {
                            unsafe {
                                libc::kill(pid as libc::pid_t, libc::SIGINT);
                            }
                        }
                        recv(done_rx) -> _ => {}
                    }
                })
            };

            let out_sink = Arc::clone(&sink);
            let out_handle =
                scope.spawn(move || stream_copy(stdout, StreamTarget::Stdout, &out_sink));
            let err_sink = Arc::clone(&sink);
            let err_handle =
                scope.spawn(move || stream_copy(stderr, StreamTarget::Stderr, &err_sink));

            // Stream drain precedes reap.
            let _ = out_handle.join();
            let _ = err_handle.join();

            wait_result = Some(child.wait());
            drop(done_tx);
            let _ = watcher.join();
        });

        let status = wait_result.ok_or_else(|| Error::Spawn("child was never awaited".to_string()))?;
        let status = status?;

        let end_time = Utc::now();
        let exit_code = status.code().unwrap_or(-1);
        let result = RunResult {
            command: command.to_string(),
            args: args.to_vec(),
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds(),
            exit_code,
            success: exit_code == 0,
        };

        write_footer(&sink, &result)?;

        if let Some(project) = &project {
            self.update_bookkeeping(project, &result, &log_path);
        }

        Ok(RunOutcome {
            result,
            log_path,
            cancelled: cancel.is_cancelled(),
        })
    }

    /// Best-effort registration of the log directory as a project.
    fn register_project(&self) -> Option<Project> {
        let db = self.db.as_ref()?;

        if let Err(e) = std::fs::create_dir_all(&self.config.log_dir) {
            eprintln!("warning: failed to create log directory: {}", e);
            return None;
        }

        let registry = ProjectRegistry::new(db.clone());
        match registry.register(&self.config.log_dir) {
            Ok(project) => Some(project),
            Err(e) => {
                eprintln!("warning: failed to register project: {}", e);
                tracing::warn!(error = %e, "project registration failed");
                None
            }
        }
    }

    /// Counters, history and stats cache; failures never fail the run.
    fn update_bookkeeping(&self, project: &Project, result: &RunResult, log_path: &Path) {
        let Some(db) = self.db.as_ref() else {
            return;
        };

        let registry = ProjectRegistry::new(db.clone());
        if let Err(e) = registry.update_stats(
            project.id,
            &result.command,
            result.success,
            result.duration_ms,
        ) {
            eprintln!("warning: failed to update project stats: {}", e);
        }

        if let Err(e) = record_run(db, project, result, log_path) {
            eprintln!("warning: failed to record run history: {}", e);
        }
    }
}

/// Persist one run: insert the history row, then regenerate the day's stats
/// cache row (the cache is always derived from history, never updated in
/// place).
pub fn record_run(
    db: &Arc<Database>,
    project: &Project,
    result: &RunResult,
    log_path: &Path,
) -> Result<()> {
    let history = HistoryStore::new(db.clone());
    let cache = StatsCache::new(db.clone());

    let log_date = result
        .start_time
        .with_timezone(&Local)
        .format("%Y-%m-%d")
        .to_string();
    let command_line = join_command(&result.command, &result.args);

    let record = RunRecord {
        id: 0,
        project_id: project.id,
        command_name: command_head(&command_line),
        command: command_line,
        command_args: result.args.clone(),
        start_time: result.start_time,
        end_time: result.end_time,
        duration_ms: result.duration_ms,
        exit_code: result.exit_code,
        status: RunStatus::from_exit_code(result.exit_code),
        log_file_path: log_path.to_string_lossy().into_owned(),
        log_date: log_date.clone(),
        stdout_preview: None,
        stderr_preview: None,
        has_error: !result.success,
        working_directory: std::env::current_dir()
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default(),
        environment: None,
        created_at: Utc::now(),
    };

    history.record(&record)?;
    cache.generate_for_date(project.id, &log_date)?;
    Ok(())
}

/// Copy one pipe line by line to its terminal stream and the shared sink.
fn stream_copy<R: Read>(pipe: R, target: StreamTarget, sink: &Arc<Mutex<LogSink>>) {
    let mut reader = BufReader::with_capacity(256 * 1024, pipe);
    let mut buf: Vec<u8> = Vec::with_capacity(8 * 1024);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let terminal_result = match target {
                    StreamTarget::Stdout => {
                        let mut out = std::io::stdout().lock();
                        out.write_all(&buf).and_then(|_| out.flush())
                    }
                    StreamTarget::Stderr => {
                        let mut err = std::io::stderr().lock();
                        err.write_all(&buf).and_then(|_| err.flush())
                    }
                };
                if let Err(e) = terminal_result {
                    tracing::warn!(error = %e, "terminal write failed");
                }

                if let Ok(mut sink) = sink.lock() {
                    if let Err(e) = sink.write_bytes(&buf) {
                        eprintln!("warning: log write failed: {}", e);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

fn lock_sink(sink: &Arc<Mutex<LogSink>>) -> Result<std::sync::MutexGuard<'_, LogSink>> {
    sink.lock()
        .map_err(|_| Error::Io(std::io::Error::other("log sink poisoned")))
}

fn write_header(sink: &Arc<Mutex<LogSink>>, command: &str, args: &[String]) -> Result<()> {
    let bar = "#".repeat(80);
    let header = format!(
        "\n{bar}\n# LogCmd - 命令执行日志\n# 时间: {}\n# 命令: {} {}\n{bar}\n\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        command,
        format_args_list(args),
    );

    let mut sink = lock_sink(sink)?;
    sink.write_bytes(header.as_bytes())?;
    sink.flush()?;
    Ok(())
}

fn write_footer(sink: &Arc<Mutex<LogSink>>, result: &RunResult) -> Result<()> {
    let bar = "=".repeat(80);
    let status = if result.success { "成功" } else { "失败" };
    let footer = format!(
        "\n{bar}\n命令: {} {}\n开始时间: {}\n结束时间: {}\n执行时长: {}\n退出码: {}\n执行状态: {}\n{bar}\n",
        result.command,
        format_args_list(&result.args),
        result.start_time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        result.end_time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        format_duration_ms(result.duration_ms),
        result.exit_code,
        status,
    );

    let mut sink = lock_sink(sink)?;
    sink.write_bytes(footer.as_bytes())?;
    sink.flush()?;
    Ok(())
}

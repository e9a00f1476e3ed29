//! Log-file stats scanner
//!
//! The fallback path when the catalog is unavailable: walks a log tree in
//! parallel and recovers each run's metadata from the file itself. Only the
//! header (first 32 lines, for the `# 时间:` wall-clock stamp) and the
//! footer (last 16 KiB, for command head, exit code, status and duration)
//! are parsed; the body is never read.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::format::parse_duration_ms;
use crate::stats::{DayStats, StatsReport, StatsSource};
use crate::walker::Walker;
use chrono::NaiveDateTime;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Number of header lines scanned for the `# 时间:` marker.
pub const MAX_HEADER_SCAN_LINES: usize = 32;

/// Number of trailing bytes scanned for the footer fields.
pub const FOOTER_READ_SIZE: u64 = 16 * 1024;

/// Metadata recovered from a single log file.
#[derive(Debug, Clone, Default)]
pub struct LogMetadata {
    /// Command head (first token of the footer's `命令:` line)
    pub command: String,
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: i64,
    /// `YYYY-MM-DD` from the header, empty when the header was unreadable
    pub date: String,
}

struct ScanPatterns {
    command: Regex,
    exit_code: Regex,
    status: Regex,
    duration: Regex,
    date: Regex,
}

impl ScanPatterns {
    fn new() -> Self {
        ScanPatterns {
            command: Regex::new(r"^命令:\s*(.+)$").unwrap(),
            exit_code: Regex::new(r"^退出码:\s*(-?\d+)$").unwrap(),
            status: Regex::new(r"^执行状态:\s*(\S+)$").unwrap(),
            duration: Regex::new(r"^执行时长:\s*(.+)$").unwrap(),
            date: Regex::new(r"^# 时间:\s*(.+)$").unwrap(),
        }
    }
}

/// Scanner that aggregates a [`StatsReport`] from raw log files.
pub struct LogAnalyzer {
    log_dir: PathBuf,
    patterns: ScanPatterns,
}

impl LogAnalyzer {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        LogAnalyzer {
            log_dir: log_dir.into(),
            patterns: ScanPatterns::new(),
        }
    }

    /// Walk the log tree and aggregate every readable run.
    ///
    /// Files missing the command metadata are skipped with a warning; files
    /// missing only the date are counted but left out of the per-day
    /// rollups.
    pub fn analyze(&self, cancel: &CancelToken) -> Result<StatsReport> {
        let report = Mutex::new(StatsReport::empty(StatsSource::Logs));

        let walker = Walker::new(&self.log_dir)
            .with_filter(|path, _| path.extension().and_then(|e| e.to_str()) == Some("log"));

        walker.walk(cancel, |_, path, _| {
            match self.scan_file(path) {
                Ok(Some(meta)) => report.lock().unwrap().absorb(&meta),
                Ok(None) => {}
                Err(e) => {
                    eprintln!("warning: failed to analyze {}: {}", path.display(), e);
                }
            }
            Ok(())
        })?;

        let mut report = report.into_inner().unwrap();
        report.finalize();
        Ok(report)
    }

    /// Parse one log file's header and footer. Returns `None` when the file
    /// carries no command metadata.
    pub fn scan_file(&self, path: &Path) -> Result<Option<LogMetadata>> {
        let mut file = File::open(path)?;
        let mut meta = LogMetadata::default();

        self.parse_header(&mut file, &mut meta)?;
        self.parse_footer(&mut file, &mut meta)?;

        if meta.command.is_empty() {
            eprintln!(
                "warning: skipping log without run metadata: {}",
                path.display()
            );
            return Ok(None);
        }
        if meta.date.is_empty() {
            eprintln!(
                "warning: log missing timestamp header, counted without day rollup: {}",
                path.display()
            );
        }

        Ok(Some(meta))
    }

    fn parse_header(&self, file: &mut File, meta: &mut LogMetadata) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        let reader = BufReader::new(file.by_ref());

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if let Some(captures) = self.patterns.date.captures(&line) {
                let stamp = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                if let Ok(parsed) = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S") {
                    meta.date = parsed.format("%Y-%m-%d").to_string();
                }
                break;
            }
            if index + 1 >= MAX_HEADER_SCAN_LINES {
                break;
            }
        }

        Ok(())
    }

    fn parse_footer(&self, file: &mut File, meta: &mut LogMetadata) -> Result<()> {
        let size = file.metadata()?.len();
        if size == 0 {
            return Ok(());
        }

        let read_size = FOOTER_READ_SIZE.min(size);
        file.seek(SeekFrom::Start(size - read_size))?;
        let mut buf = Vec::with_capacity(read_size as usize);
        file.read_to_end(&mut buf)?;
        let tail = String::from_utf8_lossy(&buf);

        for line in tail.lines() {
            if let Some(captures) = self.patterns.command.captures(line) {
                if let Some(head) = captures[1].split_whitespace().next() {
                    meta.command = head.to_string();
                }
            }
            if let Some(captures) = self.patterns.exit_code.captures(line) {
                meta.exit_code = captures[1].parse().unwrap_or(0);
            }
            if let Some(captures) = self.patterns.status.captures(line) {
                meta.success = &captures[1] == "成功";
            }
            if let Some(captures) = self.patterns.duration.captures(line) {
                meta.duration_ms = parse_duration_ms(&captures[1]).unwrap_or(0);
            }
        }

        Ok(())
    }
}

impl StatsReport {
    /// Fold one file's metadata into the aggregate.
    fn absorb(&mut self, meta: &LogMetadata) {
        self.total_commands += 1;
        if meta.success {
            self.success_commands += 1;
        } else {
            self.failed_commands += 1;
        }

        self.total_duration_ms += meta.duration_ms;
        if meta.duration_ms > self.max_duration_ms {
            self.max_duration_ms = meta.duration_ms;
        }
        if meta.duration_ms > 0
            && (self.min_duration_ms == 0 || meta.duration_ms < self.min_duration_ms)
        {
            self.min_duration_ms = meta.duration_ms;
        }

        *self
            .command_counts
            .entry(meta.command.clone())
            .or_insert(0) += 1;
        *self.exit_codes.entry(meta.exit_code).or_insert(0) += 1;

        if !meta.date.is_empty() {
            let day = self
                .daily
                .entry(meta.date.clone())
                .or_insert_with(|| DayStats {
                    date: meta.date.clone(),
                    commands: 0,
                    success: 0,
                    failed: 0,
                    duration_ms: 0,
                });
            day.commands += 1;
            if meta.success {
                day.success += 1;
            } else {
                day.failed += 1;
            }
            day.duration_ms += meta.duration_ms;
        }
    }

    /// Derive the average and patch up an all-zero minimum.
    fn finalize(&mut self) {
        if self.total_commands > 0 {
            self.avg_duration_ms = self.total_duration_ms / self.total_commands;
            if self.min_duration_ms == 0 {
                self.min_duration_ms = self.max_duration_ms;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format_duration_ms;

    fn write_run_log(
        dir: &Path,
        name: &str,
        date: &str,
        command: &str,
        exit_code: i32,
        duration_ms: i64,
    ) {
        let status = if exit_code == 0 { "成功" } else { "失败" };
        let content = format!(
            "\n{hash}\n# LogCmd - 命令执行日志\n# 时间: {date} 10:00:00\n# 命令: {command} []\n{hash}\n\n\
             some output line\n\n\
             {eq}\n命令: {command} []\n开始时间: {date} 10:00:00\n结束时间: {date} 10:00:02\n\
             执行时长: {duration}\n退出码: {exit_code}\n执行状态: {status}\n{eq}\n",
            hash = "#".repeat(80),
            eq = "=".repeat(80),
            duration = format_duration_ms(duration_ms),
        );
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_scan_file_recovers_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        write_run_log(tmp.path(), "a.log", "2024-01-15", "echo", 0, 2345);

        let analyzer = LogAnalyzer::new(tmp.path());
        let meta = analyzer
            .scan_file(&tmp.path().join("a.log"))
            .unwrap()
            .unwrap();

        assert_eq!(meta.command, "echo");
        assert_eq!(meta.exit_code, 0);
        assert!(meta.success);
        assert_eq!(meta.duration_ms, 2345);
        assert_eq!(meta.date, "2024-01-15");
    }

    #[test]
    fn test_scan_file_accepts_negative_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        write_run_log(tmp.path(), "a.log", "2024-01-15", "sleep", -1, 100);

        let analyzer = LogAnalyzer::new(tmp.path());
        let meta = analyzer
            .scan_file(&tmp.path().join("a.log"))
            .unwrap()
            .unwrap();

        assert_eq!(meta.exit_code, -1);
        assert!(!meta.success);
    }

    #[test]
    fn test_scan_file_skips_files_without_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("plain.log"), "just some text\n").unwrap();

        let analyzer = LogAnalyzer::new(tmp.path());
        assert!(analyzer
            .scan_file(&tmp.path().join("plain.log"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_analyze_aggregates_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let day_one = tmp.path().join("2024-01-15");
        let day_two = tmp.path().join("2024-01-16");
        std::fs::create_dir_all(&day_one).unwrap();
        std::fs::create_dir_all(&day_two).unwrap();

        write_run_log(&day_one, "a.log", "2024-01-15", "echo", 0, 1000);
        write_run_log(&day_one, "b.log", "2024-01-15", "make", 2, 3000);
        write_run_log(&day_two, "c.log", "2024-01-16", "echo", 0, 500);
        std::fs::write(day_one.join("note.txt"), "not a log").unwrap();

        let analyzer = LogAnalyzer::new(tmp.path());
        let report = analyzer.analyze(&CancelToken::new()).unwrap();

        assert_eq!(report.total_commands, 3);
        assert_eq!(report.success_commands, 2);
        assert_eq!(report.failed_commands, 1);
        assert_eq!(report.total_duration_ms, 4500);
        assert_eq!(report.avg_duration_ms, 1500);
        assert_eq!(report.max_duration_ms, 3000);
        assert_eq!(report.min_duration_ms, 500);
        assert_eq!(report.command_counts.get("echo"), Some(&2));
        assert_eq!(report.exit_codes.get(&2), Some(&1));
        assert_eq!(report.daily.len(), 2);
        assert_eq!(report.daily.get("2024-01-15").unwrap().commands, 2);
    }

    #[test]
    fn test_header_scan_stops_after_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut content = String::new();
        for _ in 0..MAX_HEADER_SCAN_LINES {
            content.push_str("filler line\n");
        }
        // marker appears too late to be picked up
        content.push_str("# 时间: 2024-01-15 10:00:00\n");
        content.push_str("\n命令: echo []\n退出码: 0\n执行状态: 成功\n执行时长: 100ms\n");
        std::fs::write(tmp.path().join("late.log"), content).unwrap();

        let analyzer = LogAnalyzer::new(tmp.path());
        let meta = analyzer
            .scan_file(&tmp.path().join("late.log"))
            .unwrap()
            .unwrap();

        assert_eq!(meta.command, "echo");
        assert!(meta.date.is_empty());
    }
}

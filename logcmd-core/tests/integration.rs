//! Integration tests for the run → record → search/stats pipeline
//!
//! These tests drive the real Runner against throwaway log trees and an
//! in-memory catalog, then verify the artifacts every subsystem derives
//! from a run: the log file framing, the project counters, the history
//! rows, the per-day stats cache and the scanners.

use logcmd_core::history::{HistoryQuery, HistoryStore};
use logcmd_core::registry::ProjectRegistry;
use logcmd_core::runner::Runner;
use logcmd_core::search::{SearchOptions, Searcher};
use logcmd_core::stats::{LogAnalyzer, StatsCache, StatsService, StatsSource};
use logcmd_core::tasks::{NewTask, TaskStore};
use logcmd_core::{CancelToken, Config, Database, RunStatus, TaskStatus};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct TestEnv {
    config: Config,
    db: Arc<Database>,
    _tmp: TempDir,
}

fn test_env() -> TestEnv {
    let tmp = tempfile::tempdir().unwrap();
    let log_dir = tmp.path().join("demo").join(".logcmd");
    std::fs::create_dir_all(&log_dir).unwrap();

    let config = Config {
        log_dir,
        buffer_size: 8192,
        auto_compress: false,
        time_format: "%Y%m%d_%H%M%S".to_string(),
    };

    let db = Arc::new(Database::open_in_memory().unwrap());
    db.migrate().unwrap();

    TestEnv {
        config,
        db,
        _tmp: tmp,
    }
}

fn run_command(env: &TestEnv, command: &str, args: &[&str]) -> (bool, PathBuf) {
    let runner = Runner::new(env.config.clone()).with_database(env.db.clone());
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let outcome = runner.run(&CancelToken::new(), command, &args).unwrap();
    (outcome.result.success, outcome.log_path)
}

fn search_tree(log_dir: &std::path::Path, keyword: &str, context: usize) -> Vec<Vec<String>> {
    let searcher = Searcher::new(SearchOptions {
        log_dir: log_dir.to_path_buf(),
        keyword: keyword.to_string(),
        case_sensitive: true,
        context,
        ..Default::default()
    })
    .unwrap();

    let collected = Mutex::new(Vec::new());
    searcher
        .search(&CancelToken::new(), |m| {
            collected
                .lock()
                .unwrap()
                .push((m.file_path.clone(), m.line_no, m.context.clone(), m.line.clone()));
            Ok(())
        })
        .unwrap();

    let mut collected = collected.into_inner().unwrap();
    collected.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
    collected
        .into_iter()
        .map(|(_, _, context, line)| if context.is_empty() { vec![line] } else { context })
        .collect()
}

#[test]
fn test_run_produces_log_counters_and_cache() {
    let env = test_env();
    let (success, log_path) = run_command(&env, "echo", &["hello"]);
    assert!(success);

    // log file framing
    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("# LogCmd - 命令执行日志"));
    assert!(content.contains("# 命令: echo [hello]"));
    assert!(content.contains("hello\n"));
    assert!(content.contains("退出码: 0"));
    assert!(content.contains("执行状态: 成功"));

    // registry counters
    let registry = ProjectRegistry::new(env.db.clone());
    let project = registry.get_by_path(&env.config.log_dir).unwrap().unwrap();
    assert_eq!(project.total_commands, 1);
    assert_eq!(project.success_commands, 1);
    assert_eq!(project.failed_commands, 0);
    assert_eq!(project.last_command, "echo");

    // history row
    let history = HistoryStore::new(env.db.clone());
    let records = history
        .query(&HistoryQuery {
            project_id: Some(project.id),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].command, "echo hello");
    assert_eq!(records[0].status, RunStatus::Success);

    // stats cache row for today
    let cache = StatsCache::new(env.db.clone());
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let row = cache.get(project.id, &today).unwrap().unwrap();
    assert_eq!(row.total_commands, 1);
    assert_eq!(row.command_distribution.get("echo"), Some(&1));
    assert_eq!(row.exit_code_distribution.get(&0), Some(&1));
}

#[test]
fn test_failed_run_is_recorded_as_failed_everywhere() {
    let env = test_env();
    let (success, log_path) = run_command(&env, "sh", &["-c", "echo boom 1>&2; exit 3"]);
    assert!(!success);

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("boom\n"));
    assert!(content.contains("退出码: 3"));
    assert!(content.contains("执行状态: 失败"));

    let registry = ProjectRegistry::new(env.db.clone());
    let project = registry.get_by_path(&env.config.log_dir).unwrap().unwrap();
    assert_eq!(project.failed_commands, 1);
    assert_eq!(
        project.total_commands,
        project.success_commands + project.failed_commands
    );

    let history = HistoryStore::new(env.db.clone());
    let failed = history.failed(project.id, 10).unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].has_error);
}

#[test]
fn test_stats_service_prefers_database_and_scan_agrees() {
    let env = test_env();
    run_command(&env, "echo", &["alpha"]);
    run_command(&env, "echo", &["beta"]);
    run_command(&env, "sh", &["-c", "exit 1"]);

    let service = StatsService::new(env.db.clone());
    let report = service
        .stats_for_path(&CancelToken::new(), &env.config.log_dir)
        .unwrap();

    assert_eq!(report.source, StatsSource::Database);
    assert_eq!(report.total_commands, 3);
    assert_eq!(report.success_commands, 2);
    assert_eq!(report.failed_commands, 1);
    assert_eq!(report.command_counts.get("echo"), Some(&2));
    assert_eq!(report.command_counts.get("sh"), Some(&1));

    // the log files alone tell the same story
    let analyzer = LogAnalyzer::new(&env.config.log_dir);
    let scanned = analyzer.analyze(&CancelToken::new()).unwrap();
    assert_eq!(scanned.total_commands, report.total_commands);
    assert_eq!(scanned.success_commands, report.success_commands);
    assert_eq!(scanned.failed_commands, report.failed_commands);
    assert_eq!(scanned.command_counts, report.command_counts);
}

#[test]
fn test_cache_rebuild_matches_incremental_state() {
    let env = test_env();
    run_command(&env, "echo", &["one"]);
    run_command(&env, "echo", &["two"]);
    run_command(&env, "sh", &["-c", "exit 7"]);

    let registry = ProjectRegistry::new(env.db.clone());
    let project = registry.get_by_path(&env.config.log_dir).unwrap().unwrap();
    let cache = StatsCache::new(env.db.clone());
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();

    let incremental = cache.get(project.id, &today).unwrap().unwrap();

    cache.delete_by_project(project.id).unwrap();
    assert!(cache.get(project.id, &today).unwrap().is_none());
    cache.generate_for_project(project.id).unwrap();

    let rebuilt = cache.get(project.id, &today).unwrap().unwrap();
    assert_eq!(incremental.total_commands, rebuilt.total_commands);
    assert_eq!(incremental.success_commands, rebuilt.success_commands);
    assert_eq!(incremental.failed_commands, rebuilt.failed_commands);
    assert_eq!(incremental.total_duration_ms, rebuilt.total_duration_ms);
    assert_eq!(incremental.avg_duration_ms, rebuilt.avg_duration_ms);
    assert_eq!(incremental.max_duration_ms, rebuilt.max_duration_ms);
    assert_eq!(incremental.min_duration_ms, rebuilt.min_duration_ms);
    assert_eq!(incremental.command_distribution, rebuilt.command_distribution);
    assert_eq!(
        incremental.exit_code_distribution,
        rebuilt.exit_code_distribution
    );
}

#[test]
fn test_search_finds_run_output_with_context() {
    let env = test_env();
    run_command(&env, "sh", &["-c", "echo before; echo TARGET; echo after"]);

    let matches = search_tree(&env.config.log_dir, "TARGET", 1);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0], vec!["before", "TARGET", "after"]);
}

#[test]
fn test_search_is_idempotent() {
    let env = test_env();
    run_command(&env, "sh", &["-c", "echo needle; echo hay; echo needle"]);
    run_command(&env, "echo", &["needle in a second file"]);

    let first = search_tree(&env.config.log_dir, "needle", 0);
    let second = search_tree(&env.config.log_dir, "needle", 0);

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
fn test_task_lifecycle_through_worker_protocol() {
    let env = test_env();
    let store = TaskStore::new(env.db.clone());

    // foreground side: persist the task
    let task = store
        .create(&NewTask {
            command: "echo".to_string(),
            command_args: vec!["from-task".to_string()],
            working_dir: std::env::temp_dir(),
            log_dir: env.config.log_dir.clone(),
        })
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    // worker side: compute and record the log path, mark running, run
    let log_path = env.config.log_file_path(&task.command).unwrap();
    store.update_log_file_path(task.id, &log_path).unwrap();
    store
        .mark_running(task.id, std::process::id() as i64)
        .unwrap();

    let loaded = store.get(task.id).unwrap();
    assert_eq!(loaded.status, TaskStatus::Running);
    assert_eq!(loaded.log_file_path.as_deref(), Some(log_path.as_path()));
    assert!(loaded.pid.is_some());

    let runner = Runner::new(env.config.clone())
        .with_database(env.db.clone())
        .with_log_path(log_path.clone());
    let outcome = runner
        .run(&CancelToken::new(), &task.command, &task.command_args)
        .unwrap();
    assert!(outcome.result.success);

    store
        .mark_completion(
            task.id,
            TaskStatus::Success,
            outcome.result.exit_code,
            Some(&outcome.log_path),
            "",
        )
        .unwrap();

    let finished = store.get(task.id).unwrap();
    assert_eq!(finished.status, TaskStatus::Success);
    assert!(finished.pid.is_none());
    assert!(finished.completed_at.is_some());
    assert_eq!(finished.exit_code, Some(0));

    // the run itself landed in the log file and the catalog
    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("from-task"));

    let registry = ProjectRegistry::new(env.db.clone());
    let project = registry.get_by_path(&env.config.log_dir).unwrap().unwrap();
    assert_eq!(project.total_commands, 1);

    // a raced stop on the finished task is rejected
    assert!(store
        .mark_stopped(task.id, TaskStatus::Stopped, "late stop")
        .is_err());
}

#[test]
fn test_cross_project_isolation() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.migrate().unwrap();

    for name in ["one", "two"] {
        let log_dir = tmp.path().join(name).join(".logcmd");
        std::fs::create_dir_all(&log_dir).unwrap();
        let config = Config {
            log_dir,
            buffer_size: 8192,
            auto_compress: false,
            time_format: "%Y%m%d_%H%M%S".to_string(),
        };
        let runner = Runner::new(config).with_database(db.clone());
        runner
            .run(&CancelToken::new(), "echo", &[name.to_string()])
            .unwrap();
    }

    let registry = ProjectRegistry::new(db.clone());
    let projects = registry.list().unwrap();
    assert_eq!(projects.len(), 2);
    for project in &projects {
        assert_eq!(project.total_commands, 1);
    }

    // deleting one project leaves the other's history intact
    let history = HistoryStore::new(db.clone());
    assert_eq!(history.count(None).unwrap(), 2);
    registry.delete(&projects[0].id.to_string()).unwrap();
    assert_eq!(history.count(None).unwrap(), 1);
}

//! Statistics: cache engine, log scanner and the aggregation strategy
//!
//! Statistics prefer the catalog (stats cache regenerated from run history);
//! when the catalog is unavailable or empty they fall back to scanning the
//! log files themselves. Both paths produce the same [`StatsReport`] shape.

pub mod cache;
pub mod scan;

pub use cache::StatsCache;
pub use scan::{LogAnalyzer, LogMetadata};

use crate::cancel::CancelToken;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::registry::ProjectRegistry;
use crate::types::{Project, StatsCacheRow};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Where a report's numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsSource {
    /// Scanned from raw log files
    Logs,
    /// Aggregated from the catalog's stats cache
    Database,
}

impl StatsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatsSource::Logs => "logs",
            StatsSource::Database => "database",
        }
    }
}

/// One day's slice of a report.
#[derive(Debug, Clone, Default)]
pub struct DayStats {
    pub date: String,
    pub commands: i64,
    pub success: i64,
    pub failed: i64,
    pub duration_ms: i64,
}

/// Aggregated statistics for one project (or one log tree).
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub project_name: String,
    /// Human-readable description of the covered range
    pub range_label: String,
    pub source: StatsSource,

    pub total_commands: i64,
    pub success_commands: i64,
    pub failed_commands: i64,

    pub total_duration_ms: i64,
    pub avg_duration_ms: i64,
    pub max_duration_ms: i64,
    pub min_duration_ms: i64,

    /// command head → count
    pub command_counts: HashMap<String, i64>,
    /// exit code → count
    pub exit_codes: HashMap<i32, i64>,
    /// per-day rollups, ordered by date
    pub daily: BTreeMap<String, DayStats>,
}

impl StatsReport {
    pub fn empty(source: StatsSource) -> Self {
        StatsReport {
            project_name: String::new(),
            range_label: String::new(),
            source,
            total_commands: 0,
            success_commands: 0,
            failed_commands: 0,
            total_duration_ms: 0,
            avg_duration_ms: 0,
            max_duration_ms: 0,
            min_duration_ms: 0,
            command_counts: HashMap::new(),
            exit_codes: HashMap::new(),
            daily: BTreeMap::new(),
        }
    }

    /// Build a report from a (possibly merged) stats cache row.
    pub fn from_cache(row: &StatsCacheRow, project_name: &str) -> Self {
        let mut report = StatsReport {
            project_name: project_name.to_string(),
            range_label: row.stat_date.clone(),
            source: StatsSource::Database,
            total_commands: row.total_commands,
            success_commands: row.success_commands,
            failed_commands: row.failed_commands,
            total_duration_ms: row.total_duration_ms,
            avg_duration_ms: row.avg_duration_ms,
            max_duration_ms: row.max_duration_ms,
            min_duration_ms: row.min_duration_ms,
            command_counts: row.command_distribution.clone(),
            exit_codes: row.exit_code_distribution.clone(),
            daily: BTreeMap::new(),
        };

        if report.avg_duration_ms == 0 && report.total_commands > 0 {
            report.avg_duration_ms = report.total_duration_ms / report.total_commands;
        }

        report
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_commands == 0 {
            return 0.0;
        }
        self.success_commands as f64 / self.total_commands as f64 * 100.0
    }
}

/// Database-first statistics with log-scan fallback.
pub struct StatsService {
    registry: Option<ProjectRegistry>,
    cache: Option<StatsCache>,
}

impl StatsService {
    /// Service backed by the catalog.
    pub fn new(db: Arc<Database>) -> Self {
        StatsService {
            registry: Some(ProjectRegistry::new(db.clone())),
            cache: Some(StatsCache::new(db)),
        }
    }

    /// Service without a catalog; every query scans log files.
    pub fn without_database() -> Self {
        StatsService {
            registry: None,
            cache: None,
        }
    }

    /// Statistics for a registered project: cache first, scan fallback.
    pub fn stats_for_project(
        &self,
        cancel: &CancelToken,
        project: &Project,
    ) -> Result<StatsReport> {
        match self.stats_from_cache(project) {
            Ok(report) => Ok(report),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                eprintln!("warning: database stats failed, scanning logs: {}", e);
                self.stats_from_logs(cancel, &project.path, &self.display_name(project))
            }
        }
    }

    /// Statistics for a directory, registering it when a catalog is present.
    pub fn stats_for_path(&self, cancel: &CancelToken, path: &Path) -> Result<StatsReport> {
        if self.registry.is_none() {
            let name = crate::registry::project_display_name(path);
            return self.stats_from_logs(cancel, path, &name);
        }

        match self.project_by_path(path) {
            Ok(project) => self.stats_for_project(cancel, &project),
            Err(e) => {
                eprintln!("warning: project lookup failed, scanning logs: {}", e);
                let name = crate::registry::project_display_name(path);
                self.stats_from_logs(cancel, path, &name)
            }
        }
    }

    /// Look up (or register) the project owning `path`.
    pub fn project_by_path(&self, path: &Path) -> Result<Project> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| Error::Config("project registry unavailable".to_string()))?;

        let abs = crate::config::absolute_path(path);
        if let Some(project) = registry.get_by_path(&abs)? {
            return Ok(project);
        }
        registry.register(&abs)
    }

    pub fn cache(&self) -> Option<&StatsCache> {
        self.cache.as_ref()
    }

    fn stats_from_cache(&self, project: &Project) -> Result<StatsReport> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| Error::Config("stats cache unavailable".to_string()))?;

        cache.sync(project.id)?;

        let summary = match cache.project_summary(project.id)? {
            Some(summary) => summary,
            None => {
                cache.generate_for_project(project.id)?;
                cache.project_summary(project.id)?.ok_or_else(|| {
                    Error::InvalidInput(format!("no recorded runs for project {}", project.id))
                })?
            }
        };

        Ok(StatsReport::from_cache(&summary, &self.display_name(project)))
    }

    fn stats_from_logs(
        &self,
        cancel: &CancelToken,
        path: &Path,
        display_name: &str,
    ) -> Result<StatsReport> {
        let analyzer = LogAnalyzer::new(path);
        let mut report = analyzer.analyze(cancel)?;
        if !display_name.is_empty() {
            report.project_name = display_name.to_string();
        }
        Ok(report)
    }

    fn display_name(&self, project: &Project) -> String {
        let trimmed = project.name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
        crate::registry::project_display_name(&project.path)
    }
}

//! Configuration loading and log-directory discovery
//!
//! Layout on disk:
//! - Catalog database: `<home>/.logcmd/data/registry.db`
//! - Global config: `<home>/.logcmd/config.json`
//! - Local config: `<log_dir>/config.json`
//! - Naming template: `<home>/.logcmd/config/template.json`
//! - Diagnostics: `<home>/.logcmd/logs/`
//!
//! Effective settings merge defaults ← global ← local (local wins). The log
//! directory is discovered by walking upward from the working directory for
//! an existing `.logcmd/`; `<home>/.logcmd` is only used when the working
//! directory is the home directory itself.

use crate::error::{Error, Result};
use crate::template::LogNameTemplate;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default tee buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default time format name.
pub const DEFAULT_TIME_FORMAT: &str = "compact";

/// Named time formats and their chrono patterns.
pub const TIME_FORMATS: &[(&str, &str)] = &[
    ("compact", "%Y%m%d_%H%M%S"),
    ("standard", "%Y-%m-%d_%H-%M-%S"),
    ("simple", "%Y%m%d-%H%M%S"),
    ("dateonly", "%Y%m%d"),
];

/// Resolve a time format name to its chrono pattern. Unknown names are
/// treated as explicit patterns and returned verbatim.
pub fn resolve_time_format(name: &str) -> &str {
    for (key, pattern) in TIME_FORMATS {
        if *key == name {
            return pattern;
        }
    }
    name
}

/// Whether `name` is one of the predefined format names.
pub fn is_named_time_format(name: &str) -> bool {
    TIME_FORMATS.iter().any(|(key, _)| *key == name)
}

/// Returns a best-effort home directory path.
pub fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `<home>/.logcmd`
pub fn logcmd_home() -> PathBuf {
    home_dir().join(".logcmd")
}

/// `<home>/.logcmd/data`
pub fn data_dir() -> PathBuf {
    logcmd_home().join("data")
}

/// `<home>/.logcmd/data/registry.db`
pub fn database_path() -> PathBuf {
    data_dir().join("registry.db")
}

/// `<home>/.logcmd/logs` (tracing output)
pub fn logs_dir() -> PathBuf {
    logcmd_home().join("logs")
}

/// `<home>/.logcmd/config.json`
pub fn global_config_path() -> PathBuf {
    logcmd_home().join("config.json")
}

/// Make a path absolute against the current working directory without
/// touching the filesystem.
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Discover the log directory for the current working directory.
pub fn find_log_dir() -> PathBuf {
    match std::env::current_dir() {
        Ok(cwd) => find_log_dir_from(&cwd),
        Err(_) => PathBuf::from(".logcmd"),
    }
}

/// Discovery rules, starting from `cwd`:
/// 1. the nearest ancestor (including `cwd`) containing a `.logcmd/` dir;
/// 2. `<home>/.logcmd` only when `cwd` is exactly the home directory;
/// 3. otherwise `<cwd>/.logcmd` (not yet created).
pub fn find_log_dir_from(cwd: &Path) -> PathBuf {
    let home = home_dir();
    let home_logcmd = home.join(".logcmd");

    let mut current = cwd.to_path_buf();
    loop {
        let candidate = current.join(".logcmd");
        if candidate.is_dir() {
            if candidate == home_logcmd {
                if cwd == home {
                    return candidate;
                }
            } else {
                return candidate;
            }
        }
        if !current.pop() {
            break;
        }
    }

    if cwd == home {
        return home_logcmd;
    }

    cwd.join(".logcmd")
}

// ============================================
// Persisted configuration files
// ============================================

/// The on-disk shape of `config.json`. All keys are optional; absent keys
/// fall through to the next layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_compress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<String>,
}

impl ConfigFile {
    /// Read a config file. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Option<ConfigFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("invalid config {}: {}", path.display(), e)))?;
        file.validate()?;
        Ok(Some(file))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.buffer_size {
            if size == 0 {
                return Err(Error::Config("buffer_size must be positive".to_string()));
            }
        }
        Ok(())
    }
}

// ============================================
// Effective configuration
// ============================================

/// Effective, fully merged configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the per-project log tree
    pub log_dir: PathBuf,
    /// Tee buffer size in bytes
    pub buffer_size: usize,
    /// Advisory; parsed and persisted but no compression is performed
    pub auto_compress: bool,
    /// Resolved chrono pattern for time elements in log names
    pub time_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_dir: find_log_dir(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            auto_compress: false,
            time_format: resolve_time_format(DEFAULT_TIME_FORMAT).to_string(),
        }
    }
}

impl Config {
    /// Load the effective configuration: defaults ← global ← local.
    pub fn load() -> Result<Self> {
        let log_dir = find_log_dir();
        Self::load_for_dir(log_dir)
    }

    /// Load with a fixed log directory (CLI `--dir` override); the local
    /// config layer is read from that directory.
    pub fn load_for_dir(log_dir: PathBuf) -> Result<Self> {
        let mut config = Config {
            log_dir,
            buffer_size: DEFAULT_BUFFER_SIZE,
            auto_compress: false,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        };

        if let Some(global) = ConfigFile::load(&global_config_path())? {
            config.apply(&global);
        }
        let local_path = config.local_config_path();
        if let Some(local) = ConfigFile::load(&local_path)? {
            config.apply(&local);
        }

        config.time_format = resolve_time_format(&config.time_format).to_string();
        Ok(config)
    }

    fn apply(&mut self, file: &ConfigFile) {
        if let Some(size) = file.buffer_size {
            self.buffer_size = size;
        }
        if let Some(compress) = file.auto_compress {
            self.auto_compress = compress;
        }
        if let Some(format) = &file.time_format {
            self.time_format = format.clone();
        }
    }

    /// `<log_dir>/config.json`
    pub fn local_config_path(&self) -> PathBuf {
        self.log_dir.join("config.json")
    }

    /// Compute the log file path for a run: `<log_dir>/<YYYY-MM-DD>/<name>.log`,
    /// deduplicated with `_1`, `_2`, … suffixes. Creates the directories.
    pub fn log_file_path(&self, command: &str) -> Result<PathBuf> {
        let now = Local::now();

        std::fs::create_dir_all(&self.log_dir)?;
        let date_dir = self.log_dir.join(now.format("%Y-%m-%d").to_string());
        std::fs::create_dir_all(&date_dir)?;

        let template = LogNameTemplate::load().unwrap_or_default();
        let project_name = crate::template::project_name_for(&self.log_dir);
        let filename = template.generate_log_name(command, &project_name, &self.time_format, now);

        ensure_unique_log_path(&date_dir, &filename)
    }
}

/// If `<dir>/<filename>` exists, probe `<base>_1<ext>` … `<base>_9999<ext>`
/// for the first free name.
pub fn ensure_unique_log_path(dir: &Path, filename: &str) -> Result<PathBuf> {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let (base, ext) = match filename.rfind('.') {
        Some(idx) => (&filename[..idx], &filename[idx..]),
        None => (filename, ""),
    };

    for i in 1..10_000 {
        let candidate = dir.join(format!("{}_{}{}", base, i, ext));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(Error::Config(format!(
        "unable to allocate a unique log file under {} for {}",
        dir.display(),
        filename
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_time_format() {
        assert_eq!(resolve_time_format("compact"), "%Y%m%d_%H%M%S");
        assert_eq!(resolve_time_format("dateonly"), "%Y%m%d");
        // unknown names pass through as explicit patterns
        assert_eq!(resolve_time_format("%H-%M"), "%H-%M");
        assert!(is_named_time_format("standard"));
        assert!(!is_named_time_format("%H-%M"));
    }

    #[test]
    fn test_find_log_dir_prefers_nearest_ancestor() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let project = root.join("project");
        let nested = project.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(project.join(".logcmd")).unwrap();

        assert_eq!(find_log_dir_from(&nested), project.join(".logcmd"));
        assert_eq!(find_log_dir_from(&project), project.join(".logcmd"));
    }

    #[test]
    fn test_find_log_dir_defaults_to_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        let cwd = tmp.path().join("plain");
        std::fs::create_dir_all(&cwd).unwrap();

        assert_eq!(find_log_dir_from(&cwd), cwd.join(".logcmd"));
    }

    #[test]
    fn test_config_file_merge_order() {
        let tmp = tempfile::tempdir().unwrap();
        let log_dir = tmp.path().join(".logcmd");
        std::fs::create_dir_all(&log_dir).unwrap();

        let local = ConfigFile {
            buffer_size: Some(4096),
            auto_compress: None,
            time_format: Some("dateonly".to_string()),
        };
        local.save(&log_dir.join("config.json")).unwrap();

        let mut config = Config {
            log_dir,
            buffer_size: DEFAULT_BUFFER_SIZE,
            auto_compress: true,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        };
        let loaded = ConfigFile::load(&config.local_config_path()).unwrap().unwrap();
        config.apply(&loaded);

        assert_eq!(config.buffer_size, 4096);
        assert!(config.auto_compress); // absent key leaves the lower layer
        assert_eq!(config.time_format, "dateonly");
    }

    #[test]
    fn test_config_file_rejects_zero_buffer() {
        let file = ConfigFile {
            buffer_size: Some(0),
            ..Default::default()
        };
        assert!(file.validate().is_err());
    }

    #[test]
    fn test_ensure_unique_log_path_suffixes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();

        let first = ensure_unique_log_path(dir, "run.log").unwrap();
        assert_eq!(first, dir.join("run.log"));

        std::fs::write(dir.join("run.log"), b"").unwrap();
        let second = ensure_unique_log_path(dir, "run.log").unwrap();
        assert_eq!(second, dir.join("run_1.log"));

        std::fs::write(dir.join("run_1.log"), b"").unwrap();
        let third = ensure_unique_log_path(dir, "run.log").unwrap();
        assert_eq!(third, dir.join("run_2.log"));
    }
}

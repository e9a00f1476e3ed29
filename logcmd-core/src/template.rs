//! Log-file naming template
//!
//! A template is an ordered list of elements (`command`, `time`, `project`,
//! `custom`) joined by a separator, persisted as JSON at
//! `<home>/.logcmd/config/template.json`. Rendering sanitizes every element
//! and appends `.log`.

use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Kind of a single naming element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// The command head
    Command,
    /// A timestamp; `config.format` holds the chrono pattern
    Time,
    /// The project display name
    Project,
    /// Literal text from `config.text`
    Custom,
}

/// One ordered element of the template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameElement {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl NameElement {
    pub fn time() -> Self {
        NameElement {
            kind: ElementKind::Time,
            config: HashMap::new(),
        }
    }

    pub fn command() -> Self {
        NameElement {
            kind: ElementKind::Command,
            config: HashMap::new(),
        }
    }

    pub fn project() -> Self {
        NameElement {
            kind: ElementKind::Project,
            config: HashMap::new(),
        }
    }

    pub fn custom(text: &str) -> Self {
        let mut config = HashMap::new();
        config.insert("text".to_string(), text.to_string());
        NameElement {
            kind: ElementKind::Custom,
            config,
        }
    }
}

/// Ordered naming template plus separator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogNameTemplate {
    pub elements: Vec<NameElement>,
    pub separator: String,
}

impl Default for LogNameTemplate {
    /// A single timestamp element separated by `_`.
    fn default() -> Self {
        LogNameTemplate {
            separator: "_".to_string(),
            elements: vec![NameElement::time()],
        }
    }
}

/// Path of the persisted template, `<home>/.logcmd/config/template.json`.
pub fn template_path() -> PathBuf {
    crate::config::logcmd_home().join("config").join("template.json")
}

impl LogNameTemplate {
    /// Load the persisted template, falling back to the default when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&template_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(LogNameTemplate::default());
        }
        let data = std::fs::read_to_string(path)?;
        let template: LogNameTemplate = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("invalid template {}: {}", path.display(), e)))?;
        Ok(template)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&template_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Render a log file name.
    ///
    /// Elements rendering to an empty string are dropped; an empty template
    /// renders `log_<timestamp>.log`. `default_time_format` is the resolved
    /// chrono pattern used by time elements without an explicit `format`.
    pub fn generate_log_name(
        &self,
        command: &str,
        project_name: &str,
        default_time_format: &str,
        now: DateTime<Local>,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        for element in &self.elements {
            let part = match element.kind {
                ElementKind::Command => sanitize_filename(command),
                ElementKind::Time => {
                    let format = element
                        .config
                        .get("format")
                        .map(String::as_str)
                        .unwrap_or(default_time_format);
                    now.format(format).to_string()
                }
                ElementKind::Project => sanitize_filename(project_name),
                ElementKind::Custom => {
                    sanitize_filename(element.config.get("text").map(String::as_str).unwrap_or(""))
                }
            };

            if !part.is_empty() {
                parts.push(part);
            }
        }

        if parts.is_empty() {
            return now.format("log_%Y%m%d_%H%M%S.log").to_string();
        }

        format!("{}.log", parts.join(&self.separator))
    }
}

/// Replace every character unsafe in a file name (`/ \ : * ? " < > |` and
/// space) with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            other => other,
        })
        .collect()
}

/// Derive the project display name for a log directory: the basename of its
/// parent directory (the directory that owns the `.logcmd` tree).
pub fn project_name_for(log_dir: &Path) -> String {
    let abs = crate::config::absolute_path(log_dir);
    let parent = match abs.parent() {
        Some(parent) => parent,
        None => return "unknown".to_string(),
    };
    match parent.file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "unknown".to_string(),
    }
}

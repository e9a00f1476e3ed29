//! `logcmd config` - inspect and edit the layered configuration.

use crate::commands::load_config;
use anyhow::{bail, Context};
use clap::Subcommand;
use logcmd_core::config::{
    global_config_path, is_named_time_format, ConfigFile, TIME_FORMATS,
};
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
    /// Show the effective configuration
    Show,
    /// Set a configuration key (buffer_size, auto_compress, time_format)
    Set {
        key: String,
        value: String,
        /// Write to the project-local config instead of the global one
        #[arg(long)]
        local: bool,
    },
    /// Print the configuration file paths
    Path,
}

pub fn run(dir: Option<PathBuf>, command: ConfigCmd) -> anyhow::Result<i32> {
    match command {
        ConfigCmd::Show => show(dir),
        ConfigCmd::Set { key, value, local } => set(dir, &key, &value, local),
        ConfigCmd::Path => path(dir),
    }
}

fn show(dir: Option<PathBuf>) -> anyhow::Result<i32> {
    let config = load_config(dir)?;

    println!("log_dir:       {}", config.log_dir.display());
    println!("buffer_size:   {}", config.buffer_size);
    println!("auto_compress: {} (advisory)", config.auto_compress);
    println!("time_format:   {}", config.time_format);
    println!();
    println!("named time formats:");
    for (name, pattern) in TIME_FORMATS {
        println!("  {:<9} {}", name, pattern);
    }
    Ok(0)
}

fn set(dir: Option<PathBuf>, key: &str, value: &str, local: bool) -> anyhow::Result<i32> {
    let config = load_config(dir)?;
    let target = if local {
        config.local_config_path()
    } else {
        global_config_path()
    };

    let mut file = ConfigFile::load(&target)?.unwrap_or_default();

    match key {
        "buffer_size" => {
            let size: usize = value
                .parse()
                .with_context(|| format!("buffer_size must be a positive integer: {value}"))?;
            if size == 0 {
                bail!("buffer_size must be positive");
            }
            file.buffer_size = Some(size);
        }
        "auto_compress" => {
            let flag: bool = value
                .parse()
                .with_context(|| format!("auto_compress must be true or false: {value}"))?;
            file.auto_compress = Some(flag);
        }
        "time_format" => {
            if !is_named_time_format(value) && !value.contains('%') {
                bail!(
                    "unknown time format '{value}' (use one of compact, standard, simple, \
                     dateonly, or an explicit chrono pattern)"
                );
            }
            file.time_format = Some(value.to_string());
        }
        other => bail!("unknown configuration key: {other}"),
    }

    file.save(&target)
        .with_context(|| format!("failed to write {}", target.display()))?;
    println!("{key} = {value} written to {}", target.display());
    Ok(0)
}

fn path(dir: Option<PathBuf>) -> anyhow::Result<i32> {
    let config = load_config(dir)?;
    println!("global: {}", global_config_path().display());
    println!("local:  {}", config.local_config_path().display());
    println!("database: {}", logcmd_core::config::database_path().display());
    Ok(0)
}

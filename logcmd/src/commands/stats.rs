//! `logcmd stats` - execution statistics, database-first with log fallback.

use crate::commands::{open_database, parse_date};
use anyhow::bail;
use clap::Args;
use logcmd_core::format::format_duration_ms;
use logcmd_core::stats::{StatsReport, StatsService};
use logcmd_core::CancelToken;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Project path (default: the discovered log directory)
    pub path: Option<PathBuf>,

    /// Range start (YYYY-MM-DD); requires the catalog
    #[arg(long)]
    pub start: Option<String>,

    /// Range end (YYYY-MM-DD); requires the catalog
    #[arg(long)]
    pub end: Option<String>,

    /// Export the cached per-day rows as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(dir: Option<PathBuf>, args: StatsArgs) -> anyhow::Result<i32> {
    let cancel = CancelToken::new();
    cancel.install_signal_handler()?;

    let target = args
        .path
        .clone()
        .or(dir)
        .unwrap_or_else(logcmd_core::config::find_log_dir);

    let service = match open_database() {
        Ok(db) => StatsService::new(db),
        Err(e) => {
            eprintln!("warning: catalog unavailable, falling back to log scan: {e:#}");
            StatsService::without_database()
        }
    };

    if args.json || args.start.is_some() || args.end.is_some() {
        // validate before defaulting the open ends of the range
        parse_date(args.start.as_deref())?;
        parse_date(args.end.as_deref())?;

        let Some(cache) = service.cache() else {
            bail!("date ranges and JSON export require the catalog database");
        };

        let project = service.project_by_path(&target)?;
        cache.sync(project.id)?;

        let start = args.start.clone().unwrap_or_else(|| "0000-01-01".to_string());
        let end = args.end.clone().unwrap_or_else(|| "9999-12-31".to_string());

        if args.json {
            println!("{}", cache.export_json(project.id, &start, &end)?);
            return Ok(0);
        }

        match cache.summary(project.id, &start, &end)? {
            Some(summary) => {
                let report = StatsReport::from_cache(&summary, &project.name);
                print_report(&report);
            }
            None => println!("no recorded runs in range"),
        }
        return Ok(0);
    }

    let report = service.stats_for_path(&cancel, &target)?;
    print_report(&report);
    Ok(0)
}

fn print_report(report: &StatsReport) {
    println!("{}", "=".repeat(60));
    if report.project_name.is_empty() {
        println!("log statistics");
    } else {
        println!("log statistics for {}", report.project_name);
    }
    println!("{}", "=".repeat(60));
    println!();

    if !report.range_label.is_empty() {
        println!("range:  {}", report.range_label);
    }
    println!("source: {}", report.source.as_str());
    println!();

    if report.total_commands == 0 {
        println!("no recorded runs");
        return;
    }

    println!("total commands: {}", report.total_commands);
    println!(
        "success: {} ({:.1}%)",
        report.success_commands,
        report.success_rate()
    );
    println!(
        "failed:  {} ({:.1}%)",
        report.failed_commands,
        100.0 - report.success_rate()
    );
    println!(
        "total duration: {}",
        format_duration_ms(report.total_duration_ms)
    );
    if report.avg_duration_ms > 0 {
        println!(
            "avg duration:   {}",
            format_duration_ms(report.avg_duration_ms)
        );
    }
    if report.max_duration_ms > 0 {
        println!(
            "max duration:   {}",
            format_duration_ms(report.max_duration_ms)
        );
    }
    if report.min_duration_ms > 0 && report.min_duration_ms != report.max_duration_ms {
        println!(
            "min duration:   {}",
            format_duration_ms(report.min_duration_ms)
        );
    }
    println!();

    if !report.command_counts.is_empty() {
        println!("command frequency (top 10):");
        println!("{}", "-".repeat(40));

        let mut commands: Vec<(&String, &i64)> = report.command_counts.iter().collect();
        commands.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (rank, (command, count)) in commands.iter().take(10).enumerate() {
            println!("  {}. {}: {}", rank + 1, command, count);
        }
        println!();
    }

    if !report.exit_codes.is_empty() {
        println!("exit code distribution:");
        println!("{}", "-".repeat(40));

        let mut codes: Vec<(&i32, &i64)> = report.exit_codes.iter().collect();
        codes.sort_by_key(|(code, _)| **code);
        for (code, count) in codes {
            println!("  exit {}: {}", code, count);
        }
        println!();
    }

    if !report.daily.is_empty() {
        println!("daily breakdown:");
        println!("{}", "-".repeat(40));
        for day in report.daily.values() {
            println!(
                "  {}: {} run(s) (success {}, failed {}, total {})",
                day.date,
                day.commands,
                day.success,
                day.failed,
                format_duration_ms(day.duration_ms)
            );
        }
        println!();
    }

    println!("{}", "=".repeat(60));
}

//! `logcmd search` - scan one log tree or every registered project.

use crate::commands::{open_database, parse_date, EXIT_INTERRUPTED};
use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Args;
use crossbeam_channel::{bounded, select};
use logcmd_core::registry::ProjectRegistry;
use logcmd_core::search::{SearchMatch, SearchOptions, Searcher};
use logcmd_core::{walker, CancelToken, Error, Project};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Keyword or pattern to search for
    #[arg(long)]
    pub keyword: String,

    /// Interpret the keyword as a regular expression
    #[arg(long)]
    pub regex: bool,

    /// Case-sensitive matching
    #[arg(long)]
    pub case: bool,

    /// Context lines shown around each match
    #[arg(long, default_value_t = 0)]
    pub context: usize,

    /// Only files modified on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<String>,

    /// Only files modified on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<String>,

    /// Search every registered project
    #[arg(long)]
    pub all: bool,
}

impl SearchArgs {
    fn options(&self, log_dir: PathBuf, start: Option<NaiveDate>, end: Option<NaiveDate>) -> SearchOptions {
        SearchOptions {
            log_dir,
            keyword: self.keyword.clone(),
            use_regex: self.regex,
            case_sensitive: self.case,
            context: self.context,
            start_date: start,
            end_date: end,
        }
    }
}

pub fn run(dir: Option<PathBuf>, args: SearchArgs) -> anyhow::Result<i32> {
    let start = parse_date(args.start.as_deref())?;
    let end = parse_date(args.end.as_deref())?;

    let cancel = CancelToken::new();
    cancel.install_signal_handler()?;

    if args.all {
        return search_all_projects(&cancel, &args, start, end);
    }

    let log_dir = dir.unwrap_or_else(logcmd_core::config::find_log_dir);
    let searcher = Searcher::new(args.options(log_dir, start, end))?;

    let count = AtomicUsize::new(0);
    let result = searcher.search(&cancel, |m| {
        count.fetch_add(1, Ordering::SeqCst);
        print_match(m);
        Ok(())
    });

    match result {
        Ok(()) => {}
        Err(Error::Cancelled) => return Ok(EXIT_INTERRUPTED),
        Err(e) => return Err(e).context("search failed"),
    }

    let count = count.load(Ordering::SeqCst);
    if count == 0 {
        println!("no matches found");
    } else {
        println!("{count} matching line(s)");
    }
    Ok(0)
}

struct ProjectMatches {
    project: Project,
    matches: Vec<SearchMatch>,
    error: Option<String>,
}

fn search_all_projects(
    cancel: &CancelToken,
    args: &SearchArgs,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> anyhow::Result<i32> {
    let db = open_database()?;
    let registry = ProjectRegistry::new(db);

    let projects = registry.list().context("failed to list projects")?;
    if projects.is_empty() {
        bail!("no registered projects");
    }

    // Prune rows whose directory vanished; only survivors are searched.
    let mut survivors = Vec::new();
    for project in projects {
        match std::fs::metadata(&project.path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                println!("skipping removed project: {}", project.path.display());
                if let Err(e) = registry.delete(&project.id.to_string()) {
                    eprintln!("warning: failed to prune project: {e}");
                }
            }
            _ => survivors.push(project),
        }
    }
    if survivors.is_empty() {
        println!("no searchable projects remain");
        return Ok(0);
    }

    println!("searching {} project(s)...\n", survivors.len());

    let workers = walker::worker_count(survivors.len());
    let (tx, rx) = bounded::<(usize, Project)>(0);
    let results: Mutex<Vec<Option<ProjectMatches>>> =
        Mutex::new((0..survivors.len()).map(|_| None).collect());
    let results = &results;

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let rx = rx.clone();
            let cancel = cancel.clone();
            scope.spawn(move || {
                for (index, project) in rx.iter() {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let outcome = search_project(&cancel, args, start, end, project);
                    results.lock().unwrap()[index] = Some(outcome);
                }
            });
        }
        drop(rx);

        'feed: for item in survivors.iter().cloned().enumerate() {
            select! {
                send(tx, item) -> res => {
                    if res.is_err() {
                        break 'feed;
                    }
                }
                recv(cancel.channel()) -> _ => break 'feed,
            }
        }
        drop(tx);
    });

    if cancel.is_cancelled() {
        return Ok(EXIT_INTERRUPTED);
    }

    let results = results.lock().unwrap();
    let mut total = 0usize;
    for slot in results.iter().flatten() {
        println!(
            "project: {} ({})",
            slot.project.name,
            slot.project.path.display()
        );
        if let Some(error) = &slot.error {
            eprintln!("  warning: search failed: {error}");
            continue;
        }

        if slot.matches.is_empty() {
            println!("  no matches");
        } else {
            println!("  {} match(es)", slot.matches.len());
            for m in &slot.matches {
                print_match(m);
            }
            total += slot.matches.len();
        }
        println!();

        let _ = registry.update_last_checked(&slot.project.id.to_string());
    }

    println!("search complete, {total} matching line(s) in total");
    Ok(0)
}

fn search_project(
    cancel: &CancelToken,
    args: &SearchArgs,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    project: Project,
) -> ProjectMatches {
    let searcher = match Searcher::new(args.options(project.path.clone(), start, end)) {
        Ok(searcher) => searcher,
        Err(e) => {
            return ProjectMatches {
                project,
                matches: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    };

    let matches = Mutex::new(Vec::new());
    let result = searcher.search(cancel, |m| {
        matches.lock().unwrap().push(m.clone());
        Ok(())
    });

    ProjectMatches {
        project,
        matches: matches.into_inner().unwrap_or_default(),
        error: result.err().map(|e| e.to_string()),
    }
}

/// One buffered write per match keeps concurrent emitters readable.
fn print_match(m: &SearchMatch) {
    let mut out = String::new();
    out.push_str(&format!("{}:{}\n", m.file_path.display(), m.line_no));
    if m.context.is_empty() {
        out.push_str(&format!("  {}\n", m.line));
    } else {
        for line in &m.context {
            out.push_str(&format!("  {line}\n"));
        }
    }
    out.push('\n');
    print!("{out}");
}

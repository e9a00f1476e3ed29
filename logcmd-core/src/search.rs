//! Log search scanner
//!
//! Walks a log directory in parallel and matches lines against a keyword.
//! Regex patterns are compiled once at construction (`(?i)`-prefixed when
//! case-insensitive); literal keywords use substring search, with a byte-wise
//! ASCII fast path for case-insensitive pure-ASCII keywords. Matches are
//! emitted through a handler callback, optionally with surrounding context
//! lines.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::walker::Walker;
use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Scanner options.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Root directory of the log tree
    pub log_dir: PathBuf,
    /// Keyword or regex pattern
    pub keyword: String,
    /// Interpret the keyword as a regular expression
    pub use_regex: bool,
    pub case_sensitive: bool,
    /// Number of context lines captured before and after each match
    pub context: usize,
    /// Inclusive lower bound on the file's modification date
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper bound on the file's modification date
    pub end_date: Option<NaiveDate>,
}

/// One matching line.
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub file_path: PathBuf,
    /// 1-based line number
    pub line_no: usize,
    pub line: String,
    /// `context` preceding lines, the match itself, then up to `context`
    /// following lines; empty when no context was requested
    pub context: Vec<String>,
}

enum Matcher {
    Regex(Regex),
    Literal(String),
    AsciiLower(Vec<u8>),
    UnicodeLower(String),
}

/// A match whose trailing context is still being collected.
struct PendingContext {
    result: SearchMatch,
    remaining: usize,
}

/// Compiled searcher over a log tree.
pub struct Searcher {
    options: SearchOptions,
    matcher: Matcher,
}

impl Searcher {
    pub fn new(options: SearchOptions) -> Result<Self> {
        let matcher = if options.use_regex {
            let pattern = if options.case_sensitive {
                options.keyword.clone()
            } else {
                format!("(?i){}", options.keyword)
            };
            Matcher::Regex(Regex::new(&pattern)?)
        } else if options.case_sensitive {
            Matcher::Literal(options.keyword.clone())
        } else {
            let lower = options.keyword.to_lowercase();
            if lower.is_ascii() {
                Matcher::AsciiLower(lower.into_bytes())
            } else {
                Matcher::UnicodeLower(lower)
            }
        };

        Ok(Searcher { options, matcher })
    }

    /// Scan the log tree, invoking `handler` for every match.
    ///
    /// Per-file scan failures are reported to stderr and do not abort the
    /// walk; cancellation does.
    pub fn search<H>(&self, cancel: &CancelToken, handler: H) -> Result<()>
    where
        H: Fn(&SearchMatch) -> Result<()> + Send + Sync,
    {
        let (start, end) = (self.options.start_date, self.options.end_date);
        let walker = Walker::new(&self.options.log_dir).with_filter(move |path, meta| {
            path.extension().and_then(|e| e.to_str()) == Some("log")
                && modified_within(meta, start, end)
        });

        walker.walk(cancel, |token, path, _meta| {
            match self.search_file(token, path, &handler) {
                Ok(()) => Ok(()),
                Err(Error::Cancelled) => Err(Error::Cancelled),
                Err(e) => {
                    eprintln!("warning: search failed for {}: {}", path.display(), e);
                    Ok(())
                }
            }
        })
    }

    /// Scan a single file line by line.
    pub fn search_file<H>(&self, cancel: &CancelToken, path: &Path, handler: &H) -> Result<()>
    where
        H: Fn(&SearchMatch) -> Result<()>,
    {
        let file = File::open(path)?;
        // Sized to take lines of at least 1 MiB without reallocation churn.
        let mut reader = BufReader::with_capacity(1024 * 1024, file);

        let context = self.options.context;
        let mut prev: std::collections::VecDeque<String> =
            std::collections::VecDeque::with_capacity(context);
        let mut pendings: Vec<PendingContext> = Vec::new();

        let mut line_no = 0usize;
        let mut buf: Vec<u8> = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            line_no += 1;

            let mut line = String::from_utf8_lossy(&buf).into_owned();
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }

            feed_pending(&mut pendings, &line, handler)?;

            if self.matches(&line) {
                let mut result = SearchMatch {
                    file_path: path.to_path_buf(),
                    line_no,
                    line: line.clone(),
                    context: Vec::new(),
                };

                if context > 0 {
                    let mut lines: Vec<String> = prev.iter().cloned().collect();
                    lines.push(line.clone());
                    result.context = lines;
                    pendings.push(PendingContext {
                        result,
                        remaining: context,
                    });
                } else {
                    handler(&result)?;
                }
            }

            if context > 0 {
                if prev.len() == context {
                    prev.pop_front();
                }
                prev.push_back(line);
            }
        }

        // End of file flushes partially filled pending contexts.
        for pending in pendings {
            handler(&pending.result)?;
        }

        Ok(())
    }

    fn matches(&self, line: &str) -> bool {
        match &self.matcher {
            Matcher::Regex(regex) => regex.is_match(line),
            Matcher::Literal(keyword) => line.contains(keyword),
            Matcher::AsciiLower(needle) => contains_lower_ascii(line.as_bytes(), needle),
            Matcher::UnicodeLower(keyword) => line.to_lowercase().contains(keyword),
        }
    }
}

/// Append the line to every pending context, emitting those that filled up.
fn feed_pending<H>(pendings: &mut Vec<PendingContext>, line: &str, handler: &H) -> Result<()>
where
    H: Fn(&SearchMatch) -> Result<()>,
{
    if pendings.is_empty() {
        return Ok(());
    }

    for mut pending in std::mem::take(pendings) {
        pending.result.context.push(line.to_string());
        pending.remaining -= 1;
        if pending.remaining > 0 {
            pendings.push(pending);
        } else {
            handler(&pending.result)?;
        }
    }

    Ok(())
}

/// Case-insensitive ASCII substring search; `needle` must already be
/// lowercase.
fn contains_lower_ascii(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|window| {
            window
                .iter()
                .zip(needle)
                .all(|(byte, expected)| byte.to_ascii_lowercase() == *expected)
        })
}

fn modified_within(meta: &Metadata, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    if start.is_none() && end.is_none() {
        return true;
    }
    let Ok(modified) = meta.modified() else {
        return false;
    };
    let date = DateTime::<Local>::from(modified).date_naive();
    if let Some(start) = start {
        if date < start {
            return false;
        }
    }
    if let Some(end) = end {
        if date > end {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn write_log(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn collect_matches(options: SearchOptions) -> Vec<SearchMatch> {
        let searcher = Searcher::new(options).unwrap();
        let matches = Mutex::new(Vec::new());
        searcher
            .search(&CancelToken::new(), |m| {
                matches.lock().unwrap().push(m.clone());
                Ok(())
            })
            .unwrap();
        let mut matches = matches.into_inner().unwrap();
        matches.sort_by(|a, b| (&a.file_path, a.line_no).cmp(&(&b.file_path, b.line_no)));
        matches
    }

    #[test]
    fn test_literal_match_line_numbers() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(tmp.path(), "a.log", "alpha\nbeta\ngamma beta\n");

        let matches = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: "beta".to_string(),
            case_sensitive: true,
            ..Default::default()
        });

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line_no, 2);
        assert_eq!(matches[1].line_no, 3);
        assert_eq!(matches[1].line, "gamma beta");
    }

    #[test]
    fn test_context_window() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(tmp.path(), "a.log", "A\nB\nTARGET\nC\nD\n");

        let matches = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: "TARGET".to_string(),
            case_sensitive: true,
            context: 1,
            ..Default::default()
        });

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].context, vec!["B", "TARGET", "C"]);
    }

    #[test]
    fn test_context_flushes_at_eof() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(tmp.path(), "a.log", "A\nTARGET\n");

        let matches = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: "TARGET".to_string(),
            case_sensitive: true,
            context: 2,
            ..Default::default()
        });

        assert_eq!(matches.len(), 1);
        // only one preceding line exists and no following lines arrive
        assert_eq!(matches[0].context, vec!["A", "TARGET"]);
    }

    #[test]
    fn test_overlapping_contexts() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(tmp.path(), "a.log", "X\nhit one\nhit two\nY\n");

        let matches = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: "hit".to_string(),
            case_sensitive: true,
            context: 1,
            ..Default::default()
        });

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].context, vec!["X", "hit one", "hit two"]);
        assert_eq!(matches[1].context, vec!["hit one", "hit two", "Y"]);
    }

    #[test]
    fn test_case_insensitive_ascii_fast_path() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(tmp.path(), "a.log", "An ERROR occurred\nall fine\n");

        let matches = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: "error".to_string(),
            case_sensitive: false,
            ..Default::default()
        });

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_no, 1);
    }

    #[test]
    fn test_regex_mode_with_case_flag() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(tmp.path(), "a.log", "code=404\ncode=500\nCODE=404\n");

        let matches = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: r"code=\d{3}".to_string(),
            use_regex: true,
            case_sensitive: false,
            ..Default::default()
        });
        assert_eq!(matches.len(), 3);

        let sensitive = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: r"code=\d{3}".to_string(),
            use_regex: true,
            case_sensitive: true,
            ..Default::default()
        });
        assert_eq!(sensitive.len(), 2);
    }

    #[test]
    fn test_invalid_regex_fails_construction() {
        let result = Searcher::new(SearchOptions {
            keyword: "(".to_string(),
            use_regex: true,
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::Regex(_))));
    }

    #[test]
    fn test_non_log_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(tmp.path(), "a.log", "needle\n");
        write_log(tmp.path(), "b.txt", "needle\n");

        let matches = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: "needle".to_string(),
            case_sensitive: true,
            ..Default::default()
        });

        assert_eq!(matches.len(), 1);
        assert!(matches[0].file_path.ends_with("a.log"));
    }

    #[test]
    fn test_date_range_filters_by_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        write_log(tmp.path(), "a.log", "needle\n");

        let today = Local::now().date_naive();
        let in_range = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: "needle".to_string(),
            case_sensitive: true,
            start_date: Some(today),
            end_date: Some(today),
            ..Default::default()
        });
        assert_eq!(in_range.len(), 1);

        let out_of_range = collect_matches(SearchOptions {
            log_dir: tmp.path().to_path_buf(),
            keyword: "needle".to_string(),
            case_sensitive: true,
            end_date: today.pred_opt(),
            ..Default::default()
        });
        assert!(out_of_range.is_empty());
    }

    #[test]
    fn test_contains_lower_ascii() {
        assert!(contains_lower_ascii(b"An ERROR here", b"error"));
        assert!(contains_lower_ascii(b"error", b"error"));
        assert!(!contains_lower_ascii(b"err", b"error"));
        assert!(contains_lower_ascii(b"anything", b""));
    }
}

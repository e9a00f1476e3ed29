//! Parallel file walker
//!
//! Collects the regular files under a root that pass an optional filter,
//! then dispatches them to a clamped worker pool over an unbuffered channel.
//! Every hand-off point selects over dispatch and cancellation, so a cancel
//! between enqueue and dequeue can never deadlock the walk. The first
//! visitor error cancels the walk and is returned; visit order is
//! unspecified and each matching file is visited at most once.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, select};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Worker pool size: `min(max(cpus, 2), 8)`, at least 1 and never more than
/// the number of files to visit.
pub fn worker_count(total: usize) -> usize {
    if total <= 1 {
        return 1;
    }
    let cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(2);
    cpus.clamp(2, 8).min(total)
}

type FileFilter = dyn Fn(&Path, &Metadata) -> bool + Send + Sync;

/// Parallel traversal of a directory tree.
pub struct Walker {
    root: PathBuf,
    workers: Option<usize>,
    filter: Option<Box<FileFilter>>,
}

impl Walker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Walker {
            root: root.into(),
            workers: None,
            filter: None,
        }
    }

    /// Override the computed worker count (still clamped to ≥ 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Only visit files for which the predicate holds.
    pub fn with_filter(
        mut self,
        filter: impl Fn(&Path, &Metadata) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Visit every matching regular file through `visitor`.
    ///
    /// The token handed to the visitor is a child of `cancel`: it also fires
    /// when another visitor fails, so long-running visitors can observe the
    /// abort at their own suspension points.
    pub fn walk<F>(&self, cancel: &CancelToken, visitor: F) -> Result<()>
    where
        F: Fn(&CancelToken, &Path, &Metadata) -> Result<()> + Send + Sync,
    {
        let files = self.collect_files(cancel)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if files.is_empty() {
            return Ok(());
        }

        let workers = self.workers.unwrap_or_else(|| worker_count(files.len()));
        let (tx, rx) = bounded::<(PathBuf, Metadata)>(0);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let child = CancelToken::new();

        let visitor = &visitor;
        let first_error = &first_error;

        std::thread::scope(|scope| {
            // Propagate parent cancellation into the child token; released
            // when the child token itself fires.
            let watcher = {
                let parent_rx = cancel.channel().clone();
                let child = child.clone();
                scope.spawn(move || {
                    let child_rx = child.channel().clone();
                    select! {
                        recv(parent_rx) -> _ => child.cancel(),
                        recv(child_rx) -> _ => {}
                    }
                })
            };

            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                let rx = rx.clone();
                let child = child.clone();
                handles.push(scope.spawn(move || {
                    for (path, meta) in rx.iter() {
                        if child.is_cancelled() {
                            return;
                        }
                        if let Err(e) = visitor(&child, &path, &meta) {
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            child.cancel();
                            return;
                        }
                    }
                }));
            }
            drop(rx);

            // Producer: rendezvous dispatch with a select over send and
            // cancellation.
            'feed: for item in files {
                select! {
                    send(tx, item) -> res => {
                        if res.is_err() {
                            break 'feed;
                        }
                    }
                    recv(child.channel()) -> _ => break 'feed,
                }
            }
            drop(tx);

            for handle in handles {
                let _ = handle.join();
            }
            child.cancel();
            let _ = watcher.join();
        });

        if let Some(e) = first_error.lock().unwrap().take() {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn collect_files(&self, cancel: &CancelToken) -> Result<Vec<(PathBuf, Metadata)>> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                let path = entry.path();

                if meta.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !meta.is_file() {
                    continue;
                }
                if let Some(filter) = &self.filter {
                    if !filter(&path, &meta) {
                        continue;
                    }
                }
                files.push((path, meta));
            }
        }

        Ok(files)
    }
}

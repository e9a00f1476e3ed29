//! `logcmd tail` - print (and follow) a task's log file.
//!
//! The worker stores the log path into the task row before the first byte is
//! written, so following can begin while the file does not exist yet.

use crate::commands::{open_database, EXIT_INTERRUPTED};
use anyhow::{bail, Context};
use clap::Args;
use logcmd_core::tasks::TaskStore;
use logcmd_core::CancelToken;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

const FOLLOW_POLL: Duration = Duration::from_millis(200);
const FOLLOW_CHUNK: usize = 64 * 1024;

#[derive(Args, Debug)]
pub struct TailArgs {
    /// Task id
    pub id: i64,

    /// Keep following appended output until the task finishes
    #[arg(short = 'f', long)]
    pub follow: bool,

    /// How many trailing bytes to print initially
    #[arg(short = 'n', long, default_value_t = 4096)]
    pub bytes: u64,
}

pub fn run(args: TailArgs) -> anyhow::Result<i32> {
    let db = open_database()?;
    let store = TaskStore::new(db);
    let task = store.get(args.id)?;

    let Some(path) = task.log_file_path.clone() else {
        bail!("task #{} has no log file yet", task.id);
    };

    let cancel = CancelToken::new();
    cancel.install_signal_handler()?;

    let (content, mut offset) = match read_tail(&path, args.bytes as usize) {
        Ok(result) => result,
        Err(e) if e.kind() == io::ErrorKind::NotFound && args.follow => (String::new(), 0),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    print!("{content}");
    io::stdout().flush()?;

    if !args.follow {
        return Ok(0);
    }

    loop {
        if cancel.is_cancelled() {
            return Ok(EXIT_INTERRUPTED);
        }
        std::thread::sleep(FOLLOW_POLL);

        match read_from_offset(&path, offset, FOLLOW_CHUNK) {
            Ok((chunk, new_offset)) => {
                if !chunk.is_empty() {
                    print!("{chunk}");
                    io::stdout().flush()?;
                    offset = new_offset;
                    continue;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        }

        // stop once the task reached a terminal state and the log is drained
        let task = store.get(args.id)?;
        if !task.is_active() {
            return Ok(0);
        }
    }
}

fn read_tail(path: &Path, max_bytes: usize) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let start = size.saturating_sub(max_bytes as u64);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok((String::from_utf8_lossy(&buf).to_string(), size))
}

fn read_from_offset(path: &Path, offset: u64, max_bytes: usize) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if offset >= size {
        return Ok((String::new(), offset));
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; max_bytes.min((size - offset) as usize)];
    let n = file.read(&mut buf)?;
    buf.truncate(n);
    Ok((String::from_utf8_lossy(&buf).to_string(), offset + n as u64))
}

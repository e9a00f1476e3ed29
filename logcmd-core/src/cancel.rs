//! Cooperative cancellation
//!
//! A [`CancelToken`] pairs an atomic flag with a channel that is closed on
//! cancellation, so blocked threads can wait for it inside a
//! `crossbeam_channel::select!` — the channel becomes ready (disconnected)
//! exactly once, waking every waiter.

use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Clonable cancellation handle shared between a caller and its workers.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    closer: Arc<Mutex<Option<Sender<()>>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            closer: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    /// Cancel. Idempotent; wakes every thread selecting on [`channel`].
    ///
    /// [`channel`]: CancelToken::channel
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.closer.lock() {
            guard.take();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once cancelled. Use inside
    /// `select!` as `recv(token.channel()) -> _`.
    pub fn channel(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Route SIGINT/SIGTERM into this token. May be installed once per
    /// process.
    pub fn install_signal_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || token.cancel())
            .map_err(|e| Error::Signal(e.to_string()))
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

//! One-shot readiness signal
//!
//! Resolved once when initial buffering completes. The notifier side can be
//! asked to resolve more than once (several tasks race to report readiness),
//! but only the first call takes effect; later ones get
//! `Error::AlreadyResolved`.

use crate::error::{Error, Result};
use tokio::sync::oneshot;
use tracing::debug;

/// Factory for a notifier/waiter pair
pub struct ReadySignal;

impl ReadySignal {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (ReadyNotifier, ReadyWaiter) {
        let (tx, rx) = oneshot::channel();
        (
            ReadyNotifier { tx: Some(tx) },
            ReadyWaiter {
                rx,
                resolved: false,
                failed: false,
            },
        )
    }
}

/// Resolving side
#[derive(Debug)]
pub struct ReadyNotifier {
    tx: Option<oneshot::Sender<()>>,
}

impl ReadyNotifier {
    /// Resolve the signal
    ///
    /// # Errors
    /// `AlreadyResolved` if the signal was resolved before. A waiter that has
    /// gone away is not an error.
    pub fn resolve(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(Error::AlreadyResolved)?;
        if tx.send(()).is_err() {
            debug!("Ready signal resolved with no waiter");
        }
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }
}

/// Waiting side
#[derive(Debug)]
pub struct ReadyWaiter {
    rx: oneshot::Receiver<()>,
    resolved: bool,
    /// Notifier dropped unresolved; the receiver must not be polled again
    failed: bool,
}

impl ReadyWaiter {
    /// Wait until resolved; returns immediately once it has been
    ///
    /// Cancel-safe: dropping the future keeps the waiter usable.
    ///
    /// # Errors
    /// `TaskFailed` if the notifier was dropped without resolving, which
    /// happens when the session ends before it became ready. Every later
    /// call fails the same way.
    pub async fn wait(&mut self) -> Result<()> {
        if self.resolved {
            return Ok(());
        }
        if self.failed {
            return Err(not_ready());
        }
        match (&mut self.rx).await {
            Ok(()) => {
                self.resolved = true;
                Ok(())
            }
            Err(_) => {
                self.failed = true;
                Err(not_ready())
            }
        }
    }

    /// Non-blocking check; true once resolved
    pub fn try_ready(&mut self) -> bool {
        if !self.resolved && !self.failed {
            match self.rx.try_recv() {
                Ok(()) => self.resolved = true,
                Err(oneshot::error::TryRecvError::Closed) => self.failed = true,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.resolved
    }
}

fn not_ready() -> Error {
    Error::TaskFailed("session ended before initial buffering completed".to_string())
}

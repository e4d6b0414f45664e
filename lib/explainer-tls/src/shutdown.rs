//! One-shot shutdown coordination.
//!
//! A [`ShutdownSignal`] is two [`Latch`]es: `begin` is set by whoever first
//! asks the server to stop, `complete` is set by the shutdown task once
//! draining has finished. Each latch is set at most once and is stamped with
//! a logical timestamp so the order of the two events can be checked.

use std::sync::atomic::{AtomicU64, Ordering};

use explainer_core::{ExplainerError, Result};
use tokio::sync::watch;
use tracing::{debug, info};

/// Single-assignment broadcast flag. Any number of tasks may wait on it.
#[derive(Debug)]
pub struct Latch {
    state: watch::Sender<Option<u64>>,
}

impl Latch {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Set the latch, stamping it with the value produced by `stamp`.
    /// Returns false, without calling `stamp`, if it was already set.
    fn set_with(&self, stamp: impl FnOnce() -> u64) -> bool {
        self.state.send_if_modified(|value| {
            if value.is_some() {
                return false;
            }
            *value = Some(stamp());
            true
        })
    }

    pub fn is_set(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Logical timestamp recorded when the latch was set
    pub fn set_at(&self) -> Option<u64> {
        *self.state.borrow()
    }

    /// Resolve once the latch is set (immediately if it already is)
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(Option::is_some).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// The `begin` / `complete` latch pair that drives server shutdown
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    clock: AtomicU64,
    begin: Latch,
    complete: Latch,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the server to shut down. The first caller wins and gets `true`;
    /// every later or concurrent caller gets `false` and changes nothing.
    pub fn request_shutdown(&self) -> bool {
        let first = self.begin.set_with(|| self.tick());
        if first {
            info!("Shutdown requested");
        } else {
            debug!("Shutdown already requested, ignoring");
        }
        first
    }

    /// Record that graceful shutdown finished.
    ///
    /// Completing before `begin` or completing twice is a logic error.
    pub(crate) fn mark_complete(&self) -> Result<()> {
        if !self.begin.is_set() {
            return Err(ExplainerError::Shutdown(
                "completion signalled before shutdown was requested".to_string(),
            ));
        }
        if !self.complete.set_with(|| self.tick()) {
            return Err(ExplainerError::Shutdown(
                "shutdown completion signalled twice".to_string(),
            ));
        }
        debug!("Shutdown complete");
        Ok(())
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.begin.is_set()
    }

    pub fn is_complete(&self) -> bool {
        self.complete.is_set()
    }

    /// Wait until shutdown has been requested
    pub async fn requested(&self) {
        self.begin.wait().await
    }

    /// Wait until shutdown has completed
    pub async fn completed(&self) {
        self.complete.wait().await
    }

    /// Logical timestamps of (`begin`, `complete`)
    pub fn timeline(&self) -> (Option<u64>, Option<u64>) {
        (self.begin.set_at(), self.complete.set_at())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }
}

//! Background settlement of expired posts.
//!
//! The scheduler never touches ledger state directly. Each sweep asks the
//! node for unresolved posts older than the voting window, and submits
//! a `Resolve` transaction for each through [`Node::commit_at`]. A duplicate
//! submission is harmless: settlement is a no-op once `resolved` is set.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::node::Node;
use crate::transaction::Transaction;
use crate::types::{current_timestamp, ContentId};

#[derive(Clone, Debug)]
pub struct ExpiryScheduler {
    poll_interval: Duration,
    voting_window_secs: u64,
}

impl ExpiryScheduler {
    pub fn new(poll_interval: Duration, voting_window_secs: u64) -> Self {
        Self {
            poll_interval,
            voting_window_secs,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.poll_interval(), config.voting_window_secs)
    }

    /// Submit settlements for every post expired at `now`. Returns the ids
    /// whose Resolve transaction was committed.
    pub fn sweep(&self, node: &Node, now: i64) -> Result<Vec<ContentId>> {
        let expired = node.expired_content(now, self.voting_window_secs)?;
        let mut settled = Vec::with_capacity(expired.len());
        for id in expired {
            info!(content = %id, "voting window expired, submitting settlement");
            match node.commit_at(Transaction::resolve(id.clone()), now) {
                Ok(_) => settled.push(id),
                Err(e) => warn!(content = %id, error = %e, "settlement submission failed"),
            }
        }
        Ok(settled)
    }

    /// Run `sweep` on a background thread every poll interval until the
    /// returned handle is shut down or dropped.
    pub fn spawn(self, node: Arc<Node>) -> SchedulerHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::spawn(move || {
            info!(
                poll_secs = self.poll_interval.as_secs(),
                window_secs = self.voting_window_secs,
                "expiry scheduler started"
            );
            loop {
                match stop_rx.recv_timeout(self.poll_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        match self.sweep(&node, current_timestamp()) {
                            Ok(settled) if !settled.is_empty() => {
                                debug!(count = settled.len(), "sweep settled posts")
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "expiry sweep failed"),
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("expiry scheduler stopped");
        });
        SchedulerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

/// Handle to a running scheduler thread.
pub struct SchedulerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for the current sweep to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("expiry scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

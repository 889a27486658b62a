//! Harvesting pipeline split into focused submodules.
//!
//! ```text
//!  InventorySource ──► producer ──► TransferChannel ──► worker 0 ──► LocalStore, RemoteDeleter
//!                                   (bounded, C)   ├──► worker 1
//!                                                  └──► worker W-1
//! ```
//!
//! - `channel` - Bounded queue with explicit close-for-writing
//! - `producer` - Drains the inventory into the channel
//! - `worker` - Download-then-optional-delete per descriptor
//! - `ledger` - Per-descriptor transfer state machine
//! - `lifecycle` - Run orchestration, cancellation and shutdown
//!
//! The [`PipelineController`] owns the only cancellation token, the only
//! write half of the channel, and every task handle. Nothing it spawns
//! outlives [`PipelineController::run`].

mod channel;
mod ledger;
mod lifecycle;
mod producer;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::types::{Event, PipelineState};

/// Buffer size of the event broadcast channel
const EVENT_BUFFER: usize = 1000;

/// Runs one harvesting pass (cloneable - all fields are Arc-wrapped)
///
/// Clones share the same run: any clone can [`cancel`](Self::cancel) it or
/// observe its [`state`](Self::state).
#[derive(Clone)]
pub struct PipelineController {
    pub(crate) config: Arc<PipelineConfig>,
    /// Single cancellation signal observed by the producer and every worker
    pub(crate) cancel_token: CancellationToken,
    pub(crate) state_tx: Arc<watch::Sender<PipelineState>>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Set once `run` has been entered; a controller runs at most once
    pub(crate) started: Arc<AtomicBool>,
}

impl PipelineController {
    /// Create a controller in the `Idle` state
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `config` does not validate.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let (state_tx, _rx) = watch::channel(PipelineState::default());
        let (event_tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            config: Arc::new(config),
            cancel_token: CancellationToken::new(),
            state_tx: Arc::new(state_tx),
            event_tx,
            started: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Configuration this controller runs with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Request cancellation
    ///
    /// Idempotent: repeated calls, or calls after the run has ended, change
    /// nothing.
    pub fn cancel(&self) {
        let mut changed = false;
        self.state_tx.send_if_modified(|state| {
            if state.status.is_terminal() || state.cancelled {
                return false;
            }
            state.cancelled = true;
            changed = true;
            true
        });
        if changed {
            tracing::info!("Pipeline cancellation requested");
            self.cancel_token.cancel();
        }
    }

    /// Whether cancellation has been requested for this run
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Snapshot of the current run state
    pub fn state(&self) -> PipelineState {
        self.state_tx.borrow().clone()
    }

    /// Watch state changes
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to pipeline events
    ///
    /// Each subscriber receives all events independently. A subscriber that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers; dropped silently when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Apply `update` to the run state and announce status changes
    pub(crate) fn update_state(&self, update: impl FnOnce(&mut PipelineState)) {
        let mut new_status = None;
        self.state_tx.send_modify(|state| {
            let before = state.status;
            update(state);
            if state.status != before {
                new_status = Some(state.status);
            }
        });
        if let Some(status) = new_status {
            tracing::info!(status = ?status, "Pipeline state changed");
            self.emit_event(Event::StateChanged { status });
        }
    }
}

//! Transfer channel - the bounded queue between producer and workers.
//!
//! A thin layer over [`tokio::sync::mpsc`] that adds what the pipeline needs
//! on top of a plain channel:
//! - cancellation-aware `send`/`recv` that hand the descriptor back instead of
//!   losing it when cancellation wins the race
//! - an explicit, consuming [`ChannelWriter::close`] (close-for-writing)
//! - a shared reader so many workers can pull from one queue, each descriptor
//!   going to exactly one of them
//! - occupancy tracking (pending count and high-water mark)

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::types::ResourceDescriptor;

#[derive(Debug, Default)]
struct Occupancy {
    high_water: AtomicUsize,
    enqueued: AtomicUsize,
}

/// Why a descriptor could not be enqueued; the descriptor is handed back
#[derive(Debug)]
pub(crate) enum SendError {
    /// Cancellation fired while waiting for queue space
    Cancelled(ResourceDescriptor),
    /// Every reader is gone
    Closed(ResourceDescriptor),
}

/// Result of a worker's attempt to dequeue
#[derive(Debug)]
pub(crate) enum Received {
    /// Exclusive ownership of the next descriptor
    Item(ResourceDescriptor),
    /// Closed for writing and empty - nothing more will arrive
    Drained,
    /// Cancellation fired before a descriptor became available
    Cancelled,
}

/// Create a bounded transfer channel holding at most `capacity` descriptors
pub(crate) fn transfer_channel(capacity: usize) -> (ChannelWriter, ChannelReader) {
    let (tx, rx) = mpsc::channel(capacity);
    let occupancy = Arc::new(Occupancy::default());
    (
        ChannelWriter {
            tx,
            occupancy: Arc::clone(&occupancy),
        },
        ChannelReader {
            rx: Arc::new(Mutex::new(rx)),
            occupancy,
        },
    )
}

/// Write half. Only one exists; dropping or closing it closes the channel for writing.
pub(crate) struct ChannelWriter {
    tx: mpsc::Sender<ResourceDescriptor>,
    occupancy: Arc<Occupancy>,
}

impl ChannelWriter {
    /// Enqueue a descriptor, waiting for space while the channel is full
    ///
    /// Cancellation is checked before space is reserved, so a cancelled
    /// producer never adds more work.
    pub(crate) async fn send(
        &self,
        descriptor: ResourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled(descriptor));
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SendError::Cancelled(descriptor)),
            permit = self.tx.reserve() => permit,
        };

        match permit {
            Ok(permit) => {
                permit.send(descriptor);
                self.occupancy.enqueued.fetch_add(1, Ordering::SeqCst);
                self.occupancy
                    .high_water
                    .fetch_max(self.pending(), Ordering::SeqCst);
                Ok(())
            }
            Err(_) => Err(SendError::Closed(descriptor)),
        }
    }

    /// Descriptors currently waiting in the channel
    pub(crate) fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Close the channel for writing
    ///
    /// Workers keep receiving what is already queued and see
    /// [`Received::Drained`] once it is gone.
    pub(crate) fn close(self) {
        tracing::debug!(
            pending = self.pending(),
            enqueued = self.occupancy.enqueued.load(Ordering::SeqCst),
            "Transfer channel closed for writing"
        );
        drop(self.tx);
    }
}

/// Shared read half; clone one per worker
#[derive(Clone)]
pub(crate) struct ChannelReader {
    rx: Arc<Mutex<mpsc::Receiver<ResourceDescriptor>>>,
    occupancy: Arc<Occupancy>,
}

impl ChannelReader {
    /// Wait for the next descriptor, the end of the queue, or cancellation
    pub(crate) async fn recv(&self, cancel: &CancellationToken) -> Received {
        if cancel.is_cancelled() {
            return Received::Cancelled;
        }

        // The lock is held only while waiting for one item; `recv` is
        // cancel-safe, so losing the race to cancellation loses no descriptor.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Received::Cancelled,
            item = async { self.rx.lock().await.recv().await } => match item {
                Some(descriptor) => Received::Item(descriptor),
                None => Received::Drained,
            },
        }
    }

    /// Take everything still queued without waiting
    ///
    /// Used after workers have stopped so leftover descriptors can be
    /// reported instead of silently dropped.
    pub(crate) async fn drain_remaining(&self) -> Vec<ResourceDescriptor> {
        let mut rx = self.rx.lock().await;
        let mut remaining = Vec::new();
        while let Ok(descriptor) = rx.try_recv() {
            remaining.push(descriptor);
        }
        remaining
    }

    /// Most descriptors ever waiting at once
    pub(crate) fn high_water(&self) -> usize {
        self.occupancy.high_water.load(Ordering::SeqCst)
    }

    /// Total descriptors ever enqueued
    pub(crate) fn enqueued(&self) -> usize {
        self.occupancy.enqueued.load(Ordering::SeqCst)
    }
}

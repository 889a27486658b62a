//! Inventory producer - drains an [`InventorySource`] into the transfer channel.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, TransferError};
use crate::inventory::InventorySource;
use crate::types::{Event, ResourceDescriptor};
use crate::utils::unique_file_name;

use super::PipelineController;
use super::channel::{ChannelWriter, SendError};

/// How the producer finished
#[derive(Debug, Default)]
pub(crate) struct ProducerReport {
    /// Descriptors successfully enqueued
    pub(crate) produced: usize,
    /// Stopped because cancellation fired
    pub(crate) cancelled: bool,
    /// Inventory read failure or channel fault
    pub(crate) error: Option<PipelineError>,
    /// Descriptor that was read but never enqueued
    pub(crate) unsent: Option<ResourceDescriptor>,
}

/// Map an inventory read failure to its pipeline-level error
fn inventory_error(e: &TransferError) -> PipelineError {
    match e {
        TransferError::Auth(msg) => PipelineError::Auth(msg.clone()),
        other => PipelineError::InventoryReadFailed(other.to_string()),
    }
}

/// Local file names handed out during one run
///
/// Compared case-insensitively, since `Repo.zip` and `repo.zip` are the same
/// file on case-insensitive filesystems.
#[derive(Debug, Default)]
struct ClaimedNames(HashSet<String>);

impl ClaimedNames {
    /// Reserve the descriptor's file name, renaming it if already taken
    fn claim(&mut self, descriptor: ResourceDescriptor) -> ResourceDescriptor {
        let name = unique_file_name(descriptor.local_file_name(), |n| {
            self.0.contains(&n.to_lowercase())
        });
        self.0.insert(name.to_lowercase());
        if name == descriptor.local_file_name() {
            return descriptor;
        }
        tracing::warn!(
            descriptor = %descriptor.id(),
            requested = descriptor.local_file_name(),
            assigned = %name,
            "Local file name already in use, storing under another name"
        );
        descriptor.with_local_file_name(&name)
    }
}

/// Read descriptors one at a time and enqueue each
///
/// Cancellation is checked before every read and while blocked on a full
/// channel. Every descriptor gets a local file name no earlier descriptor of
/// the run uses. The writer is only borrowed: closing the channel is the
/// controller's job once this returns.
pub(crate) async fn run_producer(
    controller: &PipelineController,
    mut source: Box<dyn InventorySource>,
    writer: &ChannelWriter,
    cancel: &CancellationToken,
) -> ProducerReport {
    let mut report = ProducerReport::default();
    let mut claimed = ClaimedNames::default();
    tracing::debug!("Inventory producer started");

    loop {
        // Dropping the pending read on cancellation stops further network reads.
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.cancelled = true;
                break;
            }
            next = source.next_descriptor() => next,
        };

        let descriptor = match next {
            Ok(Some(descriptor)) => claimed.claim(descriptor),
            Ok(None) => break,
            Err(e) => {
                let error = inventory_error(&e);
                tracing::error!(
                    error = %e,
                    produced = report.produced,
                    "Inventory read failed, no further descriptors will be listed"
                );
                report.error = Some(error);
                break;
            }
        };

        let id = descriptor.id().clone();
        let name = descriptor.display_name().to_string();
        match writer.send(descriptor, cancel).await {
            Ok(()) => {
                report.produced += 1;
                tracing::debug!(descriptor = %id, pending = writer.pending(), "Descriptor queued");
                controller.emit_event(Event::Queued { id, name });
            }
            Err(SendError::Cancelled(descriptor)) => {
                report.cancelled = true;
                report.unsent = Some(descriptor);
                break;
            }
            Err(SendError::Closed(descriptor)) => {
                tracing::error!(descriptor = %id, "Transfer channel closed under the producer");
                report.error = Some(PipelineError::ChannelClosed);
                report.unsent = Some(descriptor);
                break;
            }
        }
    }

    tracing::info!(
        produced = report.produced,
        cancelled = report.cancelled,
        failed = report.error.is_some(),
        "Inventory producer finished"
    );
    report
}

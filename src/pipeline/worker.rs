//! Transfer workers - download, then optionally delete, one descriptor at a time.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, TransferError};
use crate::remote::{ContentFetcher, RemoteDeleter};
use crate::retry::with_retry;
use crate::store::LocalStore;
use crate::types::{DescriptorReport, Event, ResourceDescriptor, SkipReason, TransferOutcome};

use super::PipelineController;
use super::channel::{ChannelReader, Received};
use super::ledger::{TransferLedger, TransferPhase};

/// Collaborators shared by every worker
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub(crate) fetcher: Arc<dyn ContentFetcher>,
    pub(crate) deleter: Arc<dyn RemoteDeleter>,
    pub(crate) store: Arc<dyn LocalStore>,
}

/// Messages from workers to the controller
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// Worker took exclusive ownership of a descriptor
    Started {
        worker: usize,
        descriptor: ResourceDescriptor,
    },
    /// Worker finished a descriptor
    Finished {
        worker: usize,
        report: DescriptorReport,
        fault: Option<PipelineError>,
    },
    /// Worker left its read loop
    Exited { worker: usize },
}

/// Everything one worker task needs
pub(crate) struct WorkerContext {
    pub(crate) index: usize,
    pub(crate) controller: PipelineController,
    pub(crate) reader: ChannelReader,
    pub(crate) collaborators: Collaborators,
    pub(crate) cancel: CancellationToken,
    pub(crate) outcome_tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerContext {
    fn send(&self, message: WorkerMessage) {
        // The controller keeps the receiver until every worker has exited.
        self.outcome_tx.send(message).ok();
    }
}

/// Run `operation` to completion unless cancellation fires and the grace
/// period after it runs out first; `None` means the operation was abandoned.
async fn within_grace<F, T>(operation: F, cancel: &CancellationToken, grace: Duration) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        result = operation => Some(result),
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        } => None,
    }
}

/// Worker loop: dequeue until the channel is drained or cancellation fires
pub(crate) async fn run_worker(ctx: WorkerContext) {
    tracing::debug!(worker = ctx.index, "Transfer worker started");
    let mut processed = 0usize;

    loop {
        let descriptor = match ctx.reader.recv(&ctx.cancel).await {
            Received::Item(descriptor) => descriptor,
            Received::Drained => {
                tracing::debug!(worker = ctx.index, processed, "Channel drained, worker exiting");
                break;
            }
            Received::Cancelled => {
                tracing::debug!(worker = ctx.index, processed, "Cancelled, worker exiting");
                break;
            }
        };

        ctx.send(WorkerMessage::Started {
            worker: ctx.index,
            descriptor: descriptor.clone(),
        });

        let (report, fault) = process_descriptor(&ctx, descriptor).await;
        processed += 1;
        let fatal = fault.is_some();
        ctx.send(WorkerMessage::Finished {
            worker: ctx.index,
            report,
            fault,
        });
        // Leave the rest of the queue to be reported by the controller
        if fatal {
            tracing::debug!(worker = ctx.index, processed, "Pipeline fault, worker exiting");
            break;
        }
    }

    ctx.send(WorkerMessage::Exited { worker: ctx.index });
}

/// Stream the content to its final local path
async fn download(
    ctx: &WorkerContext,
    descriptor: &ResourceDescriptor,
) -> Result<PathBuf, TransferError> {
    let retry = &ctx.controller.config.retry;
    let content = with_retry(retry, || ctx.collaborators.fetcher.fetch(descriptor)).await?;
    ctx.collaborators
        .store
        .write_atomic(descriptor.local_file_name(), content)
        .await
}

/// Download-then-optional-delete for one descriptor
///
/// Returns the descriptor's report plus a pipeline fault when something
/// happened that must stop the whole run (authentication failure or an
/// illegal state transition).
pub(crate) async fn process_descriptor(
    ctx: &WorkerContext,
    descriptor: ResourceDescriptor,
) -> (DescriptorReport, Option<PipelineError>) {
    let mut ledger = TransferLedger::new(descriptor);
    let fault = match transfer(ctx, &mut ledger).await {
        Ok(fault) => fault,
        Err(invalid) => {
            tracing::error!(
                worker = ctx.index,
                descriptor = %ledger.descriptor().id(),
                error = %invalid,
                "Transfer state machine violated"
            );
            Some(invalid)
        }
    };
    (ledger.into_report(), fault)
}

async fn transfer(
    ctx: &WorkerContext,
    ledger: &mut TransferLedger,
) -> Result<Option<PipelineError>, PipelineError> {
    let worker = ctx.index;
    let grace = ctx.controller.config.shutdown_grace;
    let descriptor = ledger.descriptor().clone();
    let id = descriptor.id().clone();

    if ctx.cancel.is_cancelled() {
        skip(ctx, ledger, SkipReason::Cancelled)?;
        return Ok(None);
    }

    // Phase 1: download
    tracing::debug!(worker, descriptor = %id, name = descriptor.display_name(), "Download started");
    ctx.controller.emit_event(Event::DownloadStarted {
        id: id.clone(),
        worker,
    });

    let downloaded = within_grace(download(ctx, &descriptor), &ctx.cancel, grace)
        .await
        .unwrap_or(Err(TransferError::Cancelled));

    let fault = match downloaded {
        Ok(path) => {
            tracing::info!(worker, descriptor = %id, path = %path.display(), "Download finished");
            ledger.record_downloaded(path)?;
            None
        }
        Err(e) => {
            tracing::warn!(worker, descriptor = %id, error = %e, "Download failed");
            ledger.record_download_failed(&e)?;
            e.is_fatal().then(|| PipelineError::Auth(e.to_string()))
        }
    };
    ctx.controller.emit_event(Event::DownloadFinished {
        id: id.clone(),
        worker,
        outcome: last_outcome(ledger),
    });
    if ledger.phase() != TransferPhase::Downloaded {
        return Ok(fault);
    }

    // Phase 2: delete, gated on policy and a completed download
    if !ctx.controller.config.delete_after_transfer {
        return Ok(None);
    }
    let permit = ledger.delete_permit()?;
    if ctx.cancel.is_cancelled() {
        tracing::info!(worker, descriptor = %id, "Cancelled before delete, remote copy kept");
        skip(ctx, ledger, SkipReason::Cancelled)?;
        return Ok(None);
    }

    tracing::debug!(worker, descriptor = %id, "Delete started");
    ctx.controller.emit_event(Event::DeleteStarted {
        id: id.clone(),
        worker,
    });

    let retry = &ctx.controller.config.retry;
    let deleted = within_grace(
        with_retry(retry, || ctx.collaborators.deleter.delete(&descriptor)),
        &ctx.cancel,
        grace,
    )
    .await
    .unwrap_or(Err(TransferError::Cancelled));

    let fault = match deleted {
        Ok(()) => {
            tracing::info!(worker, descriptor = %id, "Delete finished");
            ledger.record_deleted(permit)?;
            None
        }
        Err(e) => {
            tracing::warn!(worker, descriptor = %id, error = %e, "Delete failed, local copy kept");
            ledger.record_delete_failed(permit, &e)?;
            e.is_fatal().then(|| PipelineError::Auth(e.to_string()))
        }
    };
    ctx.controller.emit_event(Event::DeleteFinished {
        id,
        worker,
        outcome: last_outcome(ledger),
    });
    Ok(fault)
}

/// Record a skip and announce it like the controller does for leftovers
fn skip(
    ctx: &WorkerContext,
    ledger: &mut TransferLedger,
    reason: SkipReason,
) -> Result<(), PipelineError> {
    ledger.record_skipped(reason)?;
    ctx.controller.emit_event(Event::Skipped {
        id: ledger.descriptor().id().clone(),
        reason,
    });
    Ok(())
}

fn last_outcome(ledger: &TransferLedger) -> TransferOutcome {
    ledger
        .last_outcome()
        .cloned()
        .unwrap_or(TransferOutcome::Skipped(SkipReason::Cancelled))
}

//! Run orchestration: spawn, drain, cancel, report.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{Error, PipelineError, Result};
use crate::inventory::InventorySource;
use crate::remote::{ContentFetcher, RemoteDeleter};
use crate::store::LocalStore;
use crate::types::{
    DescriptorReport, Event, PipelineResult, PipelineStatus, ResourceDescriptor, SkipReason,
};

use super::PipelineController;
use super::channel::transfer_channel;
use super::producer::run_producer;
use super::worker::{Collaborators, WorkerContext, WorkerMessage, run_worker};

/// Extra time past the workers' own grace period before tasks are aborted
const BACKSTOP_MARGIN: Duration = Duration::from_secs(1);

/// Bookkeeping the controller keeps while a run is in progress
#[derive(Default)]
struct RunLedger {
    reports: Vec<DescriptorReport>,
    in_flight: HashMap<usize, ResourceDescriptor>,
    /// Descriptors read from the inventory that never reached a worker
    unprocessed: Vec<ResourceDescriptor>,
    error: Option<PipelineError>,
    failed: bool,
}

impl RunLedger {
    /// Record a pipeline-level error; the first one wins
    fn record_error(&mut self, error: PipelineError) {
        if error.is_fatal() {
            self.failed = true;
        }
        match &self.error {
            // A fatal error replaces a soft inventory failure
            Some(existing) if existing.is_fatal() || !error.is_fatal() => {}
            _ => self.error = Some(error),
        }
    }

    fn handle_message(&mut self, message: WorkerMessage) -> Option<PipelineError> {
        match message {
            WorkerMessage::Started { worker, descriptor } => {
                self.in_flight.insert(worker, descriptor);
                None
            }
            WorkerMessage::Finished {
                worker,
                report,
                fault,
            } => {
                self.in_flight.remove(&worker);
                self.reports.push(report);
                fault
            }
            WorkerMessage::Exited { worker } => {
                tracing::debug!(worker, "Worker exited");
                None
            }
        }
    }
}

impl PipelineController {
    /// Run one harvesting pass to completion
    ///
    /// Spawns the producer and `parallelism` workers, waits for them to drain
    /// the channel (or to unwind after cancellation or a fatal failure), and
    /// returns one report per descriptor read from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] when this controller (or a clone of
    /// it) has already run. Failures during the run are reported through
    /// [`PipelineResult::status`] and [`PipelineResult::error`] instead.
    pub async fn run(
        &self,
        source: Box<dyn InventorySource>,
        fetcher: Arc<dyn ContentFetcher>,
        deleter: Arc<dyn RemoteDeleter>,
        store: Arc<dyn LocalStore>,
    ) -> Result<PipelineResult> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let started_at = Utc::now();
        let workers = self.config.parallelism;
        let cancel = self.cancel_token.clone();
        let (writer, reader) = transfer_channel(self.config.channel_capacity);

        tracing::info!(
            parallelism = workers,
            channel_capacity = self.config.channel_capacity,
            delete_after_transfer = self.config.delete_after_transfer,
            "Starting pipeline"
        );

        // The producer hands the writer back so closing stays with the controller.
        let mut producer = {
            let controller = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let report = run_producer(&controller, source, &writer, &cancel).await;
                (report, writer)
            })
        };

        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let collaborators = Collaborators {
            fetcher,
            deleter,
            store,
        };
        let mut pool = JoinSet::new();
        for index in 0..workers {
            pool.spawn(run_worker(WorkerContext {
                index,
                controller: self.clone(),
                reader: reader.clone(),
                collaborators: collaborators.clone(),
                cancel: cancel.clone(),
                outcome_tx: outcome_tx.clone(),
            }));
        }
        drop(outcome_tx);

        self.update_state(|state| {
            state.status = PipelineStatus::Running;
            state.active_workers = workers;
        });

        let mut run = RunLedger::default();
        let mut producer_done = false;
        let mut backstop: Option<Instant> = None;

        loop {
            if producer_done && pool.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(message) = outcome_rx.recv() => {
                    if let Some(fault) = run.handle_message(message) {
                        self.fail(&mut run, fault);
                    }
                }

                joined = &mut producer, if !producer_done => {
                    producer_done = true;
                    match joined {
                        Ok((report, writer)) => {
                            writer.close();
                            run.unprocessed.extend(report.unsent);
                            if let Some(error) = report.error {
                                if error.is_fatal() {
                                    self.fail(&mut run, error);
                                } else {
                                    run.record_error(error);
                                }
                            }
                        }
                        // The writer was dropped with the task, which closes the channel
                        Err(e) => self.fail(&mut run, PipelineError::TaskFailed(format!("producer: {e}"))),
                    }
                    self.update_state(|state| {
                        state.producer_done = true;
                        if state.status == PipelineStatus::Running {
                            state.status = PipelineStatus::Draining;
                        }
                    });
                    tracing::info!(enqueued = reader.enqueued(), "Inventory exhausted, draining");
                }

                Some(joined) = pool.join_next() => {
                    self.update_state(|state| state.active_workers = state.active_workers.saturating_sub(1));
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Transfer worker task failed");
                        self.fail(&mut run, PipelineError::TaskFailed(format!("worker: {e}")));
                    }
                }

                _ = cancel.cancelled(), if backstop.is_none() => {
                    let grace = self.config.shutdown_grace;
                    tracing::info!(grace_secs = grace.as_secs_f64(), "Cancellation observed, waiting for workers to unwind");
                    backstop = Some(Instant::now() + grace + BACKSTOP_MARGIN);
                }

                _ = tokio::time::sleep_until(backstop.unwrap_or_else(Instant::now)), if backstop.is_some() => {
                    tracing::warn!(
                        in_flight = run.in_flight.len(),
                        "Grace period expired, aborting remaining tasks"
                    );
                    pool.abort_all();
                    if !producer_done {
                        producer.abort();
                    }
                    break;
                }
            }
        }

        // Structured shutdown: nothing spawned above outlives this call.
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    self.fail(&mut run, PipelineError::TaskFailed(format!("worker: {e}")));
                }
            }
        }
        if !producer_done {
            if let Ok((report, writer)) = (&mut producer).await {
                writer.close();
                run.unprocessed.extend(report.unsent);
            }
        }
        while let Ok(message) = outcome_rx.try_recv() {
            if let Some(fault) = run.handle_message(message) {
                self.fail(&mut run, fault);
            }
        }

        let status = if run.failed {
            PipelineStatus::Failed
        } else if cancel.is_cancelled() {
            PipelineStatus::Cancelled
        } else {
            PipelineStatus::Completed
        };
        let reason = match status {
            PipelineStatus::Failed => SkipReason::PipelineFailed,
            _ => SkipReason::Cancelled,
        };

        // Everything read but not finished gets a report of its own
        let abandoned: Vec<ResourceDescriptor> = run.in_flight.drain().map(|(_, d)| d).collect();
        let leftover = reader.drain_remaining().await;
        for descriptor in abandoned
            .into_iter()
            .chain(run.unprocessed.drain(..))
            .chain(leftover)
        {
            tracing::debug!(descriptor = %descriptor.id(), reason = %reason, "Descriptor skipped");
            self.emit_event(Event::Skipped {
                id: descriptor.id().clone(),
                reason,
            });
            run.reports.push(DescriptorReport::skipped(descriptor, reason));
        }

        let result = PipelineResult {
            status,
            reports: run.reports,
            error: run.error,
            queue_high_water: reader.high_water(),
            started_at,
            finished_at: Utc::now(),
        };

        self.update_state(|state| {
            state.status = status;
            state.active_workers = 0;
            state.producer_done = true;
        });
        self.emit_event(Event::PipelineFinished {
            status,
            total: result.reports.len(),
            downloaded: result.downloaded_count(),
            deleted: result.deleted_count(),
        });
        tracing::info!(
            status = ?status,
            total = result.reports.len(),
            downloaded = result.downloaded_count(),
            deleted = result.deleted_count(),
            failed = result.failed_count(),
            queue_high_water = result.queue_high_water,
            "Pipeline finished"
        );

        Ok(result)
    }

    /// Escalate a pipeline-level fault: record it and stop all work
    fn fail(&self, run: &mut RunLedger, error: PipelineError) {
        if !run.failed {
            tracing::error!(error = %error, "Pipeline failed, cancelling in-flight work");
        }
        run.record_error(error);
        // Internal cancellation; `cancelled` in the state stays reserved for callers.
        self.cancel_token.cancel();
    }
}

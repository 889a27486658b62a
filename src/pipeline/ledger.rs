//! Per-descriptor transfer state machine.
//!
//! ```text
//! Pending ──► Downloaded ──► Deleted
//!    │             │
//!    │             └──────► DeleteFailed
//!    ├──► DownloadFailed
//!    └──► Skipped
//! ```
//!
//! Delete can only be entered from `Downloaded`; every other transition that
//! is not drawn above is rejected.

use std::path::PathBuf;

use chrono::Utc;

use crate::error::{FailureCause, PipelineError, TransferError};
use crate::types::{DescriptorReport, ResourceDescriptor, SkipReason, TransferOutcome};

/// Where a descriptor is in its transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransferPhase {
    Pending,
    Downloaded,
    DownloadFailed,
    Deleted,
    DeleteFailed,
    Skipped,
}

impl TransferPhase {
    fn is_final(self) -> bool {
        !matches!(self, TransferPhase::Pending | TransferPhase::Downloaded)
    }
}

/// Proof that a descriptor reached `Downloaded`; required to record a delete
#[derive(Debug)]
pub(crate) struct DeletePermit(());

/// Records outcomes for one descriptor and enforces legal transitions
#[derive(Debug)]
pub(crate) struct TransferLedger {
    descriptor: ResourceDescriptor,
    phase: TransferPhase,
    outcomes: Vec<TransferOutcome>,
    local_path: Option<PathBuf>,
}

impl TransferLedger {
    pub(crate) fn new(descriptor: ResourceDescriptor) -> Self {
        Self {
            descriptor,
            phase: TransferPhase::Pending,
            outcomes: Vec::with_capacity(2),
            local_path: None,
        }
    }

    pub(crate) fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub(crate) fn phase(&self) -> TransferPhase {
        self.phase
    }

    fn advance(
        &mut self,
        from: TransferPhase,
        to: TransferPhase,
        outcome: TransferOutcome,
    ) -> Result<(), PipelineError> {
        if self.phase != from {
            return Err(PipelineError::InvalidTransition(format!(
                "{}: {:?} -> {:?} (expected {:?})",
                self.descriptor.id(),
                self.phase,
                to,
                from
            )));
        }
        self.phase = to;
        self.outcomes.push(outcome);
        Ok(())
    }

    pub(crate) fn record_downloaded(&mut self, path: PathBuf) -> Result<(), PipelineError> {
        self.advance(
            TransferPhase::Pending,
            TransferPhase::Downloaded,
            TransferOutcome::Downloaded,
        )?;
        self.local_path = Some(path);
        Ok(())
    }

    pub(crate) fn record_download_failed(
        &mut self,
        error: &TransferError,
    ) -> Result<(), PipelineError> {
        self.advance(
            TransferPhase::Pending,
            TransferPhase::DownloadFailed,
            TransferOutcome::DownloadFailed(FailureCause::from(error)),
        )
    }

    /// Permission to issue the delete call; only granted after a completed download
    pub(crate) fn delete_permit(&self) -> Result<DeletePermit, PipelineError> {
        if self.phase == TransferPhase::Downloaded {
            Ok(DeletePermit(()))
        } else {
            Err(PipelineError::InvalidTransition(format!(
                "{}: delete requested in phase {:?}",
                self.descriptor.id(),
                self.phase
            )))
        }
    }

    pub(crate) fn record_deleted(&mut self, _permit: DeletePermit) -> Result<(), PipelineError> {
        self.advance(
            TransferPhase::Downloaded,
            TransferPhase::Deleted,
            TransferOutcome::Deleted,
        )
    }

    pub(crate) fn record_delete_failed(
        &mut self,
        _permit: DeletePermit,
        error: &TransferError,
    ) -> Result<(), PipelineError> {
        self.advance(
            TransferPhase::Downloaded,
            TransferPhase::DeleteFailed,
            TransferOutcome::DeleteFailed(FailureCause::from(error)),
        )
    }

    /// Skip whatever phase comes next
    ///
    /// From `Pending` the whole descriptor is skipped; from `Downloaded` only
    /// the delete is, and the download stays recorded.
    pub(crate) fn record_skipped(&mut self, reason: SkipReason) -> Result<(), PipelineError> {
        if self.phase.is_final() {
            return Err(PipelineError::InvalidTransition(format!(
                "{}: skip requested in final phase {:?}",
                self.descriptor.id(),
                self.phase
            )));
        }
        if self.phase == TransferPhase::Pending {
            self.phase = TransferPhase::Skipped;
        }
        self.outcomes.push(TransferOutcome::Skipped(reason));
        Ok(())
    }

    pub(crate) fn last_outcome(&self) -> Option<&TransferOutcome> {
        self.outcomes.last()
    }

    pub(crate) fn into_report(self) -> DescriptorReport {
        DescriptorReport {
            descriptor: self.descriptor,
            outcomes: self.outcomes,
            local_path: self.local_path,
            finished_at: Utc::now(),
        }
    }
}

//! Core types and events for repo-harvest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{FailureCause, PipelineError};
use crate::utils::sanitize_file_name;

/// Opaque identifier of a remote resource (e.g. `owner/repo`)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorId(pub String);

impl DescriptorId {
    /// Create a new DescriptorId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DescriptorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque handle passed to fetch and delete calls
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteRef(pub String);

impl RemoteRef {
    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable record identifying one remote resource to transfer
///
/// Fields are only readable; the local file name is sanitized at
/// construction so it is always safe to join onto the download directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    id: DescriptorId,
    display_name: String,
    local_file_name: String,
    remote_ref: RemoteRef,
}

impl ResourceDescriptor {
    /// Build a descriptor, sanitizing `local_file_name`
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        local_file_name: &str,
        remote_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: DescriptorId(id.into()),
            display_name: display_name.into(),
            local_file_name: sanitize_file_name(local_file_name),
            remote_ref: RemoteRef(remote_ref.into()),
        }
    }

    /// Remote locator
    pub fn id(&self) -> &DescriptorId {
        &self.id
    }

    /// Human-readable name used in logs and events
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Filesystem-safe name of the final local artifact
    pub fn local_file_name(&self) -> &str {
        &self.local_file_name
    }

    /// Handle used for fetch and delete calls
    pub fn remote_ref(&self) -> &RemoteRef {
        &self.remote_ref
    }

    /// Same descriptor stored under another (sanitized) local file name
    #[must_use]
    pub fn with_local_file_name(mut self, local_file_name: &str) -> Self {
        self.local_file_name = sanitize_file_name(local_file_name);
        self
    }
}

/// Why a descriptor (or one of its phases) was not attempted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The pipeline was cancelled before the work started
    Cancelled,
    /// The pipeline failed (e.g. authentication) before the work started
    PipelineFailed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Cancelled => f.write_str("cancelled"),
            SkipReason::PipelineFailed => f.write_str("pipeline failed"),
        }
    }
}

/// Result of one phase of a descriptor's transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Content is on disk under its final name
    Downloaded,
    /// Content could not be fetched or written; no delete was attempted
    DownloadFailed(FailureCause),
    /// The remote resource was deleted after a completed download
    Deleted,
    /// The delete call failed; the local download stands
    DeleteFailed(FailureCause),
    /// The phase never started
    Skipped(SkipReason),
}

impl TransferOutcome {
    /// Whether this outcome represents a failure or a skip
    pub fn is_failure(&self) -> bool {
        !matches!(self, TransferOutcome::Downloaded | TransferOutcome::Deleted)
    }
}

/// Everything recorded about one descriptor during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DescriptorReport {
    /// The descriptor this report is about
    pub descriptor: ResourceDescriptor,
    /// Outcomes in the order they happened (download first, then delete)
    pub outcomes: Vec<TransferOutcome>,
    /// Final local path, when the download completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// When processing of this descriptor finished
    pub finished_at: DateTime<Utc>,
}

impl DescriptorReport {
    /// Report for a descriptor that was never processed
    pub fn skipped(descriptor: ResourceDescriptor, reason: SkipReason) -> Self {
        Self {
            descriptor,
            outcomes: vec![TransferOutcome::Skipped(reason)],
            local_path: None,
            finished_at: Utc::now(),
        }
    }

    /// Whether the download phase completed
    pub fn downloaded(&self) -> bool {
        self.outcomes.contains(&TransferOutcome::Downloaded)
    }

    /// Whether the remote resource was deleted
    pub fn deleted(&self) -> bool {
        self.outcomes.contains(&TransferOutcome::Deleted)
    }
}

/// Lifecycle state of a pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Not started yet
    Idle,
    /// Producer and workers are running
    Running,
    /// Inventory exhausted; workers are draining the queue
    Draining,
    /// Every descriptor was processed
    Completed,
    /// Stopped early by cancellation
    Cancelled,
    /// Stopped by a pipeline-level failure
    Failed,
}

impl PipelineStatus {
    /// Whether the run has ended
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Cancelled | PipelineStatus::Failed
        )
    }
}

/// Snapshot of controller-owned run state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Lifecycle state
    pub status: PipelineStatus,
    /// The producer has returned and the channel is closed for writing
    pub producer_done: bool,
    /// Workers that have not exited yet
    pub active_workers: usize,
    /// Cancellation has been requested
    pub cancelled: bool,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            status: PipelineStatus::Idle,
            producer_done: false,
            active_workers: 0,
            cancelled: false,
        }
    }
}

/// Terminal result of a pipeline run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Terminal state (Completed, Cancelled or Failed)
    pub status: PipelineStatus,
    /// One report per descriptor read from the inventory
    pub reports: Vec<DescriptorReport>,
    /// Pipeline-level error, if any (inventory read failure, auth, fault)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
    /// Most descriptors that were ever waiting in the transfer channel at once
    pub queue_high_water: usize,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run ended
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    /// Find the report for a descriptor id
    pub fn report(&self, id: &str) -> Option<&DescriptorReport> {
        self.reports.iter().find(|r| r.descriptor.id().as_str() == id)
    }

    /// Number of descriptors whose download completed
    pub fn downloaded_count(&self) -> usize {
        self.reports.iter().filter(|r| r.downloaded()).count()
    }

    /// Number of descriptors deleted remotely
    pub fn deleted_count(&self) -> usize {
        self.reports.iter().filter(|r| r.deleted()).count()
    }

    /// Number of descriptors with at least one failed or skipped phase
    pub fn failed_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcomes.iter().any(TransferOutcome::is_failure))
            .count()
    }
}

/// Event emitted during a pipeline run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Controller state changed
    StateChanged {
        /// New lifecycle state
        status: PipelineStatus,
    },

    /// Descriptor handed to the transfer channel
    Queued {
        /// Descriptor id
        id: DescriptorId,
        /// Display name
        name: String,
    },

    /// A worker started downloading a descriptor
    DownloadStarted {
        /// Descriptor id
        id: DescriptorId,
        /// Worker index
        worker: usize,
    },

    /// A download finished (successfully or not)
    DownloadFinished {
        /// Descriptor id
        id: DescriptorId,
        /// Worker index
        worker: usize,
        /// Download outcome
        outcome: TransferOutcome,
    },

    /// A worker started deleting a descriptor's remote resource
    DeleteStarted {
        /// Descriptor id
        id: DescriptorId,
        /// Worker index
        worker: usize,
    },

    /// A delete finished (successfully or not)
    DeleteFinished {
        /// Descriptor id
        id: DescriptorId,
        /// Worker index
        worker: usize,
        /// Delete outcome
        outcome: TransferOutcome,
    },

    /// A descriptor was reported without being processed
    Skipped {
        /// Descriptor id
        id: DescriptorId,
        /// Why it was skipped
        reason: SkipReason,
    },

    /// The run ended
    PipelineFinished {
        /// Terminal state
        status: PipelineStatus,
        /// Number of descriptor reports
        total: usize,
        /// Number of completed downloads
        downloaded: usize,
        /// Number of remote deletes
        deleted: usize,
    },
}

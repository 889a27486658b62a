//! # repo-harvest
//!
//! Bounded-concurrency harvester that downloads every repository of an
//! account as an archive and optionally deletes the remote copy afterwards.
//!
//! ## Design Philosophy
//!
//! repo-harvest is designed to be:
//! - **Safe by construction** - a remote resource is only ever deleted after its
//!   archive is completely on disk under its final name
//! - **Bounded** - a fixed worker pool and a bounded queue keep memory flat no
//!   matter how large the inventory is
//! - **Cancellable** - one cancellation signal stops listing and transfers, and
//!   every descriptor still gets a reported outcome
//! - **Library-first** - no CLI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use repo_harvest::{Config, harvest_github};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_json_str(r#"{
//!         "download_dir": "archives",
//!         "github": { "login": "octocat", "token": "ghp_..." }
//!     }"#)?;
//!
//!     let result = harvest_github(config).await?;
//!     println!("{:?}: {} archived", result.status, result.downloaded_count());
//!     Ok(())
//! }
//! ```
//!
//! ## Custom remotes
//!
//! The pipeline only talks to traits: [`InventorySource`], [`ContentFetcher`],
//! [`RemoteDeleter`] and [`LocalStore`]. Implement them to harvest anything
//! else, and drive the run through a [`PipelineController`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use std::sync::Arc;

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// GitHub REST adapter
pub mod github;
/// Inventory sources (lazy, paged listings)
pub mod inventory;
/// Harvesting pipeline (producer, channel, workers, controller)
pub mod pipeline;
/// Remote capabilities: content fetch and delete
pub mod remote;
/// Retry logic with exponential backoff
pub mod retry;
/// Atomic local storage
pub mod store;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, GithubConfig, PipelineConfig, RetryConfig};
pub use error::{Error, FailureCause, FailureKind, PipelineError, Result, TransferError};
pub use github::GithubClient;
pub use inventory::{InventorySource, Page, PageCursor, PageFetcher, PagedInventory, VecInventory};
pub use pipeline::PipelineController;
pub use remote::{ByteStream, ContentFetcher, NoopDeleter, RemoteDeleter};
pub use store::{FsStore, LocalStore};
pub use types::{
    DescriptorId, DescriptorReport, Event, PipelineResult, PipelineState, PipelineStatus,
    ResourceDescriptor, SkipReason, TransferOutcome,
};

/// Archive every repository of the configured GitHub login
///
/// Builds a [`GithubClient`] and a [`PipelineController`] from `config` and
/// runs one pass into `config.download_dir`. Remote repositories are only
/// deleted when `delete_after_transfer` is set.
///
/// # Errors
///
/// Returns a configuration error when `config` does not validate. Failures
/// during the run are reported in the returned [`PipelineResult`].
pub async fn harvest_github(config: Config) -> Result<PipelineResult> {
    config.validate()?;
    let client = GithubClient::new(&config.github)?;
    let store = Arc::new(FsStore::new(config.download_dir().clone()));
    let deleter: Arc<dyn RemoteDeleter> = if config.pipeline.delete_after_transfer {
        Arc::new(client.clone())
    } else {
        Arc::new(NoopDeleter)
    };

    tracing::info!(
        login = %config.github.login,
        download_dir = %config.download_dir().display(),
        delete_after_transfer = config.pipeline.delete_after_transfer,
        "Harvesting GitHub repositories"
    );

    let controller = PipelineController::new(config.pipeline)?;
    controller
        .run(
            Box::new(client.inventory()),
            Arc::new(client),
            deleter,
            store,
        )
        .await
}

/// Run a pipeline, cancelling it gracefully on a termination signal.
///
/// The run keeps going after the signal until workers have unwound (bounded
/// by the configured grace period), so the returned result still lists every
/// descriptor.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use repo_harvest::{Config, FsStore, GithubClient, PipelineController, run_until_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_json_file("harvest.json").await?;
///     let client = GithubClient::new(&config.github)?;
///     let store = Arc::new(FsStore::new(config.download_dir().clone()));
///     let controller = PipelineController::new(config.pipeline)?;
///
///     let result = run_until_signal(
///         &controller,
///         Box::new(client.inventory()),
///         Arc::new(client.clone()),
///         Arc::new(client),
///         store,
///     )
///     .await?;
///     println!("{:?}", result.status);
///     Ok(())
/// }
/// ```
pub async fn run_until_signal(
    controller: &PipelineController,
    source: Box<dyn InventorySource>,
    fetcher: Arc<dyn ContentFetcher>,
    deleter: Arc<dyn RemoteDeleter>,
    store: Arc<dyn LocalStore>,
) -> Result<PipelineResult> {
    let run = controller.run(source, fetcher, deleter, store);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        _ = wait_for_signal() => controller.cancel(),
    }
    run.await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal, cancelling pipeline");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C), cancelling pipeline");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C), cancelling pipeline");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                ctrl_c_or_never().await;
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal, cancelling pipeline");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                ctrl_c_or_never().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c_or_never().await;
    tracing::info!("Received Ctrl+C signal, cancelling pipeline");
}

/// Wait for Ctrl+C; if it cannot be listened for, never resolve so the
/// pipeline is not cancelled by a registration failure
async fn ctrl_c_or_never() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        std::future::pending::<()>().await;
    }
}

//! Shared test helpers: descriptors, scripted remotes and inventories.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream;
use tokio_util::bytes::Bytes;

use crate::config::PipelineConfig;
use crate::error::TransferError;
use crate::inventory::{InventorySource, VecInventory};
use crate::pipeline::PipelineController;
use crate::remote::{ByteStream, ContentFetcher, RemoteDeleter};
use crate::store::FsStore;
use crate::types::{PipelineResult, ResourceDescriptor};

/// Descriptor `octo/{name}` stored as `{name}.zip`
pub(crate) fn descriptor(name: &str) -> ResourceDescriptor {
    let full_name = format!("octo/{name}");
    ResourceDescriptor::new(
        full_name.clone(),
        full_name.clone(),
        &format!("{name}.zip"),
        full_name,
    )
}

/// `count` descriptors named `repo-0`, `repo-1`, ...
pub(crate) fn descriptors(count: usize) -> Vec<ResourceDescriptor> {
    (0..count).map(|i| descriptor(&format!("repo-{i}"))).collect()
}

/// Pipeline config writing into `dir`, with a short grace period
pub(crate) fn test_config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        download_dir: dir.to_path_buf(),
        shutdown_grace: Duration::from_millis(200),
        ..Default::default()
    }
}

/// Body served for a descriptor
pub(crate) fn content_of(id: &str) -> String {
    format!("archive of {id}")
}

/// A remote call as observed by [`MockRemote`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Fetch(String),
    Delete(String),
}

/// Scripted remote implementing both fetch and delete
///
/// Every call is logged in order. Unless scripted otherwise, fetches serve
/// [`content_of`] and deletes succeed.
#[derive(Default)]
pub(crate) struct MockRemote {
    calls: Mutex<Vec<Call>>,
    fetch_failures: HashMap<String, fn() -> TransferError>,
    delete_failures: HashMap<String, fn() -> TransferError>,
    /// Fetches of these ids never complete
    hanging: HashSet<String>,
    /// Deletes of these ids never complete
    hanging_deletes: HashSet<String>,
    /// Fetch failing with a broken stream after the first chunk
    broken_streams: HashSet<String>,
    fetch_delay: Option<Duration>,
    /// Cancel this controller while serving the fetch of the given id
    cancel_on_fetch: Option<(String, PipelineController)>,
}

impl MockRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_fetch(mut self, name: &str, error: fn() -> TransferError) -> Self {
        self.fetch_failures.insert(format!("octo/{name}"), error);
        self
    }

    pub(crate) fn fail_delete(mut self, name: &str, error: fn() -> TransferError) -> Self {
        self.delete_failures.insert(format!("octo/{name}"), error);
        self
    }

    pub(crate) fn hang_fetch(mut self, name: &str) -> Self {
        self.hanging.insert(format!("octo/{name}"));
        self
    }

    pub(crate) fn hang_delete(mut self, name: &str) -> Self {
        self.hanging_deletes.insert(format!("octo/{name}"));
        self
    }

    pub(crate) fn break_stream(mut self, name: &str) -> Self {
        self.broken_streams.insert(format!("octo/{name}"));
        self
    }

    pub(crate) fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub(crate) fn cancel_on_fetch(mut self, name: &str, controller: &PipelineController) -> Self {
        self.cancel_on_fetch = Some((format!("octo/{name}"), controller.clone()));
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn fetches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Fetch(id) => Some(id),
                Call::Delete(_) => None,
            })
            .collect()
    }

    pub(crate) fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(id) => Some(id),
                Call::Fetch(_) => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ContentFetcher for MockRemote {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<ByteStream, TransferError> {
        let id = descriptor.id().as_str().to_string();
        self.calls.lock().unwrap().push(Call::Fetch(id.clone()));

        if let Some((target, controller)) = &self.cancel_on_fetch {
            if *target == id {
                controller.cancel();
            }
        }
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.hanging.contains(&id) {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self.fetch_failures.get(&id) {
            return Err(error());
        }

        let body = Bytes::from(content_of(&id));
        if self.broken_streams.contains(&id) {
            let chunks = vec![
                Ok(body),
                Err(TransferError::Transport("connection reset mid-stream".into())),
            ];
            return Ok(Box::pin(stream::iter(chunks)));
        }
        Ok(Box::pin(stream::iter(vec![Ok(body)])))
    }
}

#[async_trait::async_trait]
impl RemoteDeleter for MockRemote {
    async fn delete(&self, descriptor: &ResourceDescriptor) -> Result<(), TransferError> {
        let id = descriptor.id().as_str().to_string();
        self.calls.lock().unwrap().push(Call::Delete(id.clone()));
        if self.hanging_deletes.contains(&id) {
            std::future::pending::<()>().await;
        }
        match self.delete_failures.get(&id) {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }
}

/// Inventory that yields scripted items and errors in order
pub(crate) struct ScriptedInventory {
    script: VecDeque<Result<ResourceDescriptor, TransferError>>,
}

impl ScriptedInventory {
    pub(crate) fn new(script: Vec<Result<ResourceDescriptor, TransferError>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait::async_trait]
impl InventorySource for ScriptedInventory {
    async fn next_descriptor(&mut self) -> Result<Option<ResourceDescriptor>, TransferError> {
        self.script.pop_front().transpose()
    }
}

/// Run `controller` over `items` with `remote` serving fetch and delete
pub(crate) async fn run_with(
    controller: &PipelineController,
    items: Vec<ResourceDescriptor>,
    remote: &Arc<MockRemote>,
) -> PipelineResult {
    run_source(controller, Box::new(VecInventory::new(items)), remote).await
}

/// Like [`run_with`] for an arbitrary inventory
pub(crate) async fn run_source(
    controller: &PipelineController,
    source: Box<dyn InventorySource>,
    remote: &Arc<MockRemote>,
) -> PipelineResult {
    let store = Arc::new(FsStore::new(controller.config().download_dir.clone()));
    controller
        .run(source, remote.clone(), remote.clone(), store)
        .await
        .unwrap()
}

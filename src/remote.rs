//! Remote capabilities the pipeline drives: content fetch and delete.

use futures::stream::BoxStream;
use tokio_util::bytes::Bytes;

use crate::error::TransferError;
use crate::types::ResourceDescriptor;

/// Stream of content chunks for one resource
pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Opens a content stream for a descriptor
///
/// Errors before the first byte (`NotFound`, `RateLimited`, `Transport`) are
/// returned from `fetch`; errors while streaming come through the stream.
#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Request the content of `descriptor`
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<ByteStream, TransferError>;
}

/// Irreversibly deletes the remote resource behind a descriptor
#[async_trait::async_trait]
pub trait RemoteDeleter: Send + Sync {
    /// Delete the resource behind `descriptor`
    async fn delete(&self, descriptor: &ResourceDescriptor) -> Result<(), TransferError>;
}

/// Deleter used when deletion is disabled; refuses every call
///
/// Wiring this in makes an accidental delete fail loudly instead of
/// destroying data.
pub struct NoopDeleter;

#[async_trait::async_trait]
impl RemoteDeleter for NoopDeleter {
    async fn delete(&self, descriptor: &ResourceDescriptor) -> Result<(), TransferError> {
        Err(TransferError::Forbidden(format!(
            "deletion is disabled (refused to delete {})",
            descriptor.id()
        )))
    }
}

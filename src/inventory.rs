//! Inventory sources - lazy, finite sequences of resource descriptors.
//!
//! The pipeline pulls descriptors one at a time through [`InventorySource`].
//! Paginated remote listings plug in through [`PageFetcher`] and are adapted
//! by [`PagedInventory`], which only requests the next page once the buffered
//! one has been handed out.

use std::collections::VecDeque;

use crate::error::TransferError;
use crate::types::ResourceDescriptor;

/// Lazy sequence of descriptors
///
/// Implementations must be cancel-safe: the producer drops an in-flight
/// `next_descriptor` future when cancellation fires, and no descriptor may be
/// lost or half-read because of that. Once `Ok(None)` or an error has been
/// returned the sequence is finished; it is not restartable.
#[async_trait::async_trait]
pub trait InventorySource: Send {
    /// Next descriptor, `Ok(None)` when the inventory is exhausted
    async fn next_descriptor(&mut self) -> Result<Option<ResourceDescriptor>, TransferError>;
}

/// Opaque position in a paginated listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageCursor(pub String);

/// One page of a paginated listing
#[derive(Clone, Debug, Default)]
pub struct Page {
    /// Descriptors on this page
    pub items: Vec<ResourceDescriptor>,
    /// Cursor of the following page, `None` on the last page
    pub next: Option<PageCursor>,
}

/// Fetches pages of a remote listing
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page at `cursor` (`None` = first page)
    async fn fetch_page(&self, cursor: Option<&PageCursor>) -> Result<Page, TransferError>;
}

#[derive(Debug)]
enum PagingState {
    NotStarted,
    More(PageCursor),
    Exhausted,
}

/// Adapts a [`PageFetcher`] into an [`InventorySource`]
pub struct PagedInventory<F> {
    fetcher: F,
    buffer: VecDeque<ResourceDescriptor>,
    state: PagingState,
    pages_fetched: usize,
}

impl<F: PageFetcher> PagedInventory<F> {
    /// Wrap a page fetcher; nothing is requested until the first `next_descriptor`
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            buffer: VecDeque::new(),
            state: PagingState::NotStarted,
            pages_fetched: 0,
        }
    }

    /// Number of pages requested so far
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}

#[async_trait::async_trait]
impl<F: PageFetcher> InventorySource for PagedInventory<F> {
    async fn next_descriptor(&mut self) -> Result<Option<ResourceDescriptor>, TransferError> {
        loop {
            if let Some(descriptor) = self.buffer.pop_front() {
                return Ok(Some(descriptor));
            }

            let cursor = match &self.state {
                PagingState::Exhausted => return Ok(None),
                PagingState::NotStarted => None,
                PagingState::More(cursor) => Some(cursor.clone()),
            };

            // State only advances after the await completes, so dropping this
            // future mid-request leaves the same page to be requested again.
            let page = match self.fetcher.fetch_page(cursor.as_ref()).await {
                Ok(page) => page,
                Err(e) => {
                    self.state = PagingState::Exhausted;
                    return Err(e);
                }
            };

            self.pages_fetched += 1;
            tracing::debug!(
                page = self.pages_fetched,
                items = page.items.len(),
                has_next = page.next.is_some(),
                "Fetched inventory page"
            );

            self.state = match page.next {
                Some(next) => PagingState::More(next),
                None => PagingState::Exhausted,
            };
            self.buffer.extend(page.items);
        }
    }
}

/// In-memory inventory, mostly useful for tests and embedding
pub struct VecInventory {
    items: std::vec::IntoIter<ResourceDescriptor>,
}

impl VecInventory {
    /// Yield the given descriptors in order
    pub fn new(items: Vec<ResourceDescriptor>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

#[async_trait::async_trait]
impl InventorySource for VecInventory {
    async fn next_descriptor(&mut self) -> Result<Option<ResourceDescriptor>, TransferError> {
        Ok(self.items.next())
    }
}

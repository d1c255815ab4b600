//! Paginated delta listing capability.
//!
//! The catalog that records which deltas exist for a partition lives outside
//! this crate. Round planning only needs to enumerate a window of deltas and
//! fetch each delta's manifest, which is what [`DeltaStorage`] exposes.

use async_trait::async_trait;

use crate::{
    model::{Delta, DeltaLocator, DeltaManifest, ListResult, PartitionLocator, StreamPosition},
    store::StoreError,
};

/// In-process catalog backend.
pub mod memory;

pub use memory::InMemoryDeltaStorage;

/// Window of deltas to enumerate for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDeltasRequest {
    /// Partition whose change stream is listed.
    pub partition: PartitionLocator,
    /// Only deltas strictly after this position are returned.
    pub start_exclusive: Option<StreamPosition>,
    /// Only deltas at or before this position are returned.
    pub end_inclusive: Option<StreamPosition>,
}

impl ListDeltasRequest {
    /// List `(start_exclusive, end_inclusive]` of `partition`.
    pub fn new(
        partition: PartitionLocator,
        start_exclusive: Option<StreamPosition>,
        end_inclusive: Option<StreamPosition>,
    ) -> Self {
        Self {
            partition,
            start_exclusive,
            end_inclusive,
        }
    }

    /// Returns `true` if `position` falls inside the window.
    pub fn contains(&self, position: StreamPosition) -> bool {
        self.start_exclusive.map_or(true, |start| position > start)
            && self.end_inclusive.map_or(true, |end| position <= end)
    }
}

/// Catalog capability used by round planning.
#[async_trait]
pub trait DeltaStorage: Send + Sync + 'static {
    /// List one page of deltas in ascending stream position order.
    ///
    /// Pass the previous page's pagination key to continue; an absent key in
    /// the result means the listing is exhausted.
    async fn list_deltas(
        &self,
        request: &ListDeltasRequest,
        pagination_key: Option<String>,
    ) -> Result<ListResult<Delta>, StoreError>;

    /// Fetch the manifest of one delta.
    async fn get_delta_manifest(&self, locator: &DeltaLocator)
        -> Result<DeltaManifest, StoreError>;
}

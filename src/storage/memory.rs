use std::{
    collections::{BTreeMap, HashMap},
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;

use super::{DeltaStorage, ListDeltasRequest};
use crate::{
    model::{Delta, DeltaLocator, DeltaManifest, ListResult, PartitionLocator, StreamPosition},
    store::StoreError,
};

const DEFAULT_PAGE_SIZE: usize = 100;

type PartitionDeltas = BTreeMap<StreamPosition, DeltaManifest>;

/// Delta catalog held in memory, keyed by partition.
#[derive(Debug)]
pub struct InMemoryDeltaStorage {
    partitions: RwLock<HashMap<PartitionLocator, PartitionDeltas>>,
    page_size: usize,
}

impl Default for InMemoryDeltaStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDeltaStorage {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the number of deltas returned per listing page.
    pub fn with_page_size(self, page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..self
        }
    }

    /// Record a committed delta, replacing any delta at the same position.
    pub fn commit_delta(&self, delta: DeltaManifest) {
        let locator = delta.delta.locator.clone();
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(locator.partition)
            .or_default()
            .insert(locator.stream_position, delta);
    }

    /// Highest committed stream position of `partition`.
    pub fn latest_stream_position(&self, partition: &PartitionLocator) -> Option<StreamPosition> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(partition)
            .and_then(|deltas| deltas.keys().next_back().copied())
    }
}

fn parse_cursor(pagination_key: Option<&str>) -> Result<Option<StreamPosition>, StoreError> {
    pagination_key
        .map(|key| {
            key.parse::<StreamPosition>()
                .map_err(|err| StoreError::NonRetryable {
                    url: key.to_string(),
                    message: format!("invalid delta pagination key: {err}"),
                })
        })
        .transpose()
}

#[async_trait]
impl DeltaStorage for InMemoryDeltaStorage {
    async fn list_deltas(
        &self,
        request: &ListDeltasRequest,
        pagination_key: Option<String>,
    ) -> Result<ListResult<Delta>, StoreError> {
        let after = parse_cursor(pagination_key.as_deref())?;
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        let Some(deltas) = partitions.get(&request.partition) else {
            return Ok(ListResult::of(Vec::new(), None));
        };
        let mut items: Vec<Delta> = deltas
            .iter()
            .filter(|(position, _)| request.contains(**position))
            .filter(|(position, _)| after.map_or(true, |after| **position > after))
            .take(self.page_size + 1)
            .map(|(_, manifest)| manifest.delta.clone())
            .collect();
        let next = if items.len() > self.page_size {
            items.truncate(self.page_size);
            items.last().map(|delta| delta.stream_position().to_string())
        } else {
            None
        };
        Ok(ListResult::of(items, next))
    }

    async fn get_delta_manifest(
        &self,
        locator: &DeltaLocator,
    ) -> Result<DeltaManifest, StoreError> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&locator.partition)
            .and_then(|deltas| deltas.get(&locator.stream_position))
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "{}@{}",
                    locator.partition, locator.stream_position
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryDeltaStorage;
    use crate::{
        model::{
            list::all_list_results, Delta, DeltaLocator, DeltaManifest, DeltaType, Manifest,
            PartitionLocator,
        },
        storage::{DeltaStorage, ListDeltasRequest},
        store::StoreError,
    };

    fn partition() -> PartitionLocator {
        PartitionLocator::new("ns", "orders", 1, vec!["2024".into()], "p0")
    }

    fn delta(position: i64) -> DeltaManifest {
        DeltaManifest {
            delta: Delta {
                locator: DeltaLocator {
                    partition: partition(),
                    stream_position: position,
                },
                delta_type: DeltaType::Upsert,
            },
            manifest: Manifest::of(Vec::new()),
        }
    }

    #[tokio::test]
    async fn lists_window_across_pages() {
        let storage = InMemoryDeltaStorage::new().with_page_size(2);
        for position in [1, 2, 3, 4, 5, 6] {
            storage.commit_delta(delta(position));
        }
        assert_eq!(storage.latest_stream_position(&partition()), Some(6));

        let request = ListDeltasRequest::new(partition(), Some(1), Some(5));
        let positions: Vec<i64> =
            all_list_results(|cursor| storage.list_deltas(&request, cursor))
                .await
                .expect("list")
                .iter()
                .map(Delta::stream_position)
                .collect();
        assert_eq!(positions, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn missing_manifest_is_not_found() {
        let storage = InMemoryDeltaStorage::new();
        let locator = DeltaLocator {
            partition: partition(),
            stream_position: 9,
        };
        assert!(matches!(
            storage.get_delta_manifest(&locator).await,
            Err(StoreError::NotFound(_))
        ));
    }
}

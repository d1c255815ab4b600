use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        PoisonError, RwLock,
    },
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectMeta, ObjectStore, ObjectUrl, StoreError};
use crate::model::ListResult;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// In-memory object store.
///
/// Objects are keyed by `(bucket, key)`; the URL scheme is ignored. Useful for
/// tests and single-process rounds.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), Bytes>>,
    page_size: usize,
    failing_puts: AtomicUsize,
    failing_gets: AtomicUsize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            failing_puts: AtomicUsize::new(0),
            failing_gets: AtomicUsize::new(0),
        }
    }

    /// Override the number of keys returned per listing page.
    pub fn with_page_size(self, page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..self
        }
    }

    /// Make the next `count` puts fail with a retryable error.
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` gets fail with a retryable error.
    pub fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, url: &str) -> Result<Bytes, StoreError> {
        let parsed = ObjectUrl::parse(url)?;
        if Self::take_failure(&self.failing_gets) {
            return Err(StoreError::Retryable {
                url: url.to_string(),
                message: "injected get failure".into(),
            });
        }
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(parsed.bucket, parsed.key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(url.to_string()))
    }

    async fn put(&self, url: &str, data: Bytes) -> Result<(), StoreError> {
        let parsed = ObjectUrl::parse(url)?;
        if Self::take_failure(&self.failing_puts) {
            return Err(StoreError::Retryable {
                url: url.to_string(),
                message: "injected put failure".into(),
            });
        }
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((parsed.bucket, parsed.key), data);
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        pagination_key: Option<String>,
    ) -> Result<ListResult<ObjectMeta>, StoreError> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut items: Vec<ObjectMeta> = objects
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .filter(|((_, key), _)| {
                pagination_key
                    .as_deref()
                    .map_or(true, |after| key.as_str() > after)
            })
            .take(self.page_size + 1)
            .map(|((_, key), data)| ObjectMeta {
                key: key.clone(),
                size: data.len() as u64,
            })
            .collect();
        let next = if items.len() > self.page_size {
            items.truncate(self.page_size);
            items.last().map(|meta| meta.key.clone())
        } else {
            None
        };
        Ok(ListResult::of(items, next))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::InMemoryObjectStore;
    use crate::{
        model::list::all_list_results,
        store::{ObjectStore, StoreError},
    };

    #[tokio::test]
    async fn put_get_and_missing() {
        let store = InMemoryObjectStore::new();
        store
            .put("mem://bucket/a", Bytes::from_static(b"hello"))
            .await
            .expect("put");
        assert_eq!(
            store.get("mem://bucket/a").await.expect("get"),
            Bytes::from_static(b"hello")
        );
        assert!(matches!(
            store.get("mem://bucket/b").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store
            .get_if_exists("mem://bucket/b")
            .await
            .expect("get_if_exists")
            .is_none());
    }

    #[tokio::test]
    async fn list_paginates_in_key_order() {
        let store = InMemoryObjectStore::new().with_page_size(2);
        for key in ["p/3", "p/1", "q/9", "p/2", "p/4", "p/5"] {
            store
                .put(&format!("mem://bucket/{key}"), Bytes::new())
                .await
                .expect("put");
        }
        let keys: Vec<String> = all_list_results(|cursor| store.list("bucket", "p/", cursor))
            .await
            .expect("list")
            .into_iter()
            .map(|meta| meta.key)
            .collect();
        assert_eq!(keys, vec!["p/1", "p/2", "p/3", "p/4", "p/5"]);
    }

    #[tokio::test]
    async fn injected_failures_are_retryable_and_consumed() {
        let store = InMemoryObjectStore::new();
        store.fail_next_puts(1);
        let err = store
            .put("mem://bucket/a", Bytes::new())
            .await
            .expect_err("injected");
        assert!(err.is_retryable());
        store.put("mem://bucket/a", Bytes::new()).await.expect("put");
    }
}

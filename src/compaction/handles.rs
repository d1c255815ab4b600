//! Handle-based exchange of surviving record indices between tasks.
//!
//! A dedupe task puts each materialize bucket's surviving record indices into
//! an [`ObjectRefStore`] and hands out only the opaque [`ObjectRef`]. A later
//! materialize step fetches the records by handle, from any task.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use ulid::Ulid;

use super::dedupe::SurvivingRecords;
use crate::{id::FileIdGenerator, store::StoreError};

/// Opaque handle to a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(Ulid);

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "objref:{}", self.0)
    }
}

/// Store of surviving record sets addressed by handle.
#[async_trait]
pub trait ObjectRefStore: Send + Sync + 'static {
    /// Store `records` and return its handle.
    async fn put(&self, records: SurvivingRecords) -> Result<ObjectRef, StoreError>;

    /// Fetch the records behind `handle`.
    ///
    /// Returns [`StoreError::NotFound`] for unknown handles.
    async fn get(&self, handle: &ObjectRef) -> Result<Arc<SurvivingRecords>, StoreError>;

    /// Remove the records behind `handle` and return them.
    ///
    /// Consumers take each handle once they are done with it; the handle is
    /// unknown afterwards. Returns [`StoreError::NotFound`] for unknown handles.
    async fn take(&self, handle: &ObjectRef) -> Result<Arc<SurvivingRecords>, StoreError>;
}

/// Process-local [`ObjectRefStore`].
#[derive(Debug, Default)]
pub struct InMemoryObjectRefStore {
    ids: FileIdGenerator,
    objects: RwLock<HashMap<ObjectRef, Arc<SurvivingRecords>>>,
}

impl InMemoryObjectRefStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectRefStore for InMemoryObjectRefStore {
    async fn put(&self, records: SurvivingRecords) -> Result<ObjectRef, StoreError> {
        let handle = ObjectRef(self.ids.generate());
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, Arc::new(records));
        Ok(handle)
    }

    async fn get(&self, handle: &ObjectRef) -> Result<Arc<SurvivingRecords>, StoreError> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))
    }

    async fn take(&self, handle: &ObjectRef) -> Result<Arc<SurvivingRecords>, StoreError> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle)
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))
    }
}

impl InMemoryObjectRefStore {
    /// Number of record sets still held.
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when every record set has been taken.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

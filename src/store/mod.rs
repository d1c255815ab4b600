//! Object store capability used for index files, manifests and round records.
//!
//! Objects are addressed by URL (`scheme://bucket/key`). Backends classify
//! their failures as retryable (timeouts, throttling) or non-retryable so
//! callers can wrap transfers in [`retry::with_retry`].

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::model::ListResult;

#[cfg(feature = "tokio")]
/// Local filesystem backend.
pub mod local;
/// In-process backend.
pub mod memory;
/// Randomized exponential backoff for retryable store failures.
pub mod retry;

#[cfg(feature = "tokio")]
pub use local::LocalObjectStore;
pub use memory::InMemoryObjectStore;
pub use retry::{with_retry, RetryPolicy};

/// Errors surfaced by object store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object exists at the URL.
    #[error("object not found: {0}")]
    NotFound(String),
    /// Transient failure; the operation may succeed when retried.
    #[error("retryable store error at {url}: {message}")]
    Retryable {
        /// URL of the object being accessed.
        url: String,
        /// Backend failure description.
        message: String,
    },
    /// Permanent failure; the operation must not be retried.
    #[error("store error at {url}: {message}")]
    NonRetryable {
        /// URL of the object being accessed.
        url: String,
        /// Backend failure description.
        message: String,
    },
    /// The URL could not be parsed into a bucket and key.
    #[error("invalid object url: {0}")]
    InvalidUrl(String),
}

impl StoreError {
    /// Returns `true` for failures that [`with_retry`] should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// A parsed `scheme://bucket/key` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUrl {
    /// URL scheme (`s3`, `mem`, `file`, ...).
    pub scheme: String,
    /// Bucket name.
    pub bucket: String,
    /// Object key within the bucket. `?` and `#` are kept verbatim.
    pub key: String,
}

impl ObjectUrl {
    /// Parse a URL into scheme, bucket and key.
    pub fn parse(url: &str) -> Result<Self, StoreError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| StoreError::InvalidUrl(url.to_string()))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| StoreError::InvalidUrl(url.to_string()))?;
        let key = key.trim_start_matches('/');
        if scheme.is_empty() || bucket.is_empty() || key.is_empty() {
            return Err(StoreError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// Metadata about a listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object key within its bucket.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

/// Object store capability.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Read the full object.
    ///
    /// Returns [`StoreError::NotFound`] if the object doesn't exist.
    async fn get(&self, url: &str) -> Result<Bytes, StoreError>;

    /// Write the full object, replacing any existing content.
    async fn put(&self, url: &str, data: Bytes) -> Result<(), StoreError>;

    /// List one page of keys under `prefix` in `bucket`, in ascending key order.
    ///
    /// Pass the previous page's pagination key to continue.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        pagination_key: Option<String>,
    ) -> Result<ListResult<ObjectMeta>, StoreError>;

    /// Read the object if it exists.
    async fn get_if_exists(&self, url: &str) -> Result<Option<Bytes>, StoreError> {
        match self.get(url).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

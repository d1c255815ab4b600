use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectMeta, ObjectStore, ObjectUrl, StoreError};
use crate::model::ListResult;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Object store backed by a local directory.
///
/// `scheme://bucket/key` maps to `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    page_size: usize,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    fn object_path(&self, url: &ObjectUrl) -> PathBuf {
        self.root.join(&url.bucket).join(&url.key)
    }

    async fn collect_keys(base: &Path) -> io::Result<Vec<ObjectMeta>> {
        let mut keys = Vec::new();
        let mut pending = vec![base.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let size = entry.metadata().await?.len();
                keys.push(ObjectMeta { key, size });
            }
        }
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(keys)
    }
}

fn classify(url: &str, err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(url.to_string()),
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => {
            StoreError::Retryable {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
        _ => StoreError::NonRetryable {
            url: url.to_string(),
            message: err.to_string(),
        },
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, url: &str) -> Result<Bytes, StoreError> {
        let path = self.object_path(&ObjectUrl::parse(url)?);
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|err| classify(url, err))
    }

    async fn put(&self, url: &str, data: Bytes) -> Result<(), StoreError> {
        let path = self.object_path(&ObjectUrl::parse(url)?);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| classify(url, err))?;
        }
        // Write to a sibling then rename so readers never observe a partial object.
        let staging = path.with_extension(format!("{}.tmp", ulid::Ulid::new()));
        tokio::fs::write(&staging, &data)
            .await
            .map_err(|err| classify(url, err))?;
        if let Err(err) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(classify(url, err));
        }
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        pagination_key: Option<String>,
    ) -> Result<ListResult<ObjectMeta>, StoreError> {
        let base = self.root.join(bucket);
        let all = Self::collect_keys(&base)
            .await
            .map_err(|err| classify(&base.to_string_lossy(), err))?;
        let mut items: Vec<ObjectMeta> = all
            .into_iter()
            .filter(|meta| meta.key.starts_with(prefix))
            .filter(|meta| {
                pagination_key
                    .as_deref()
                    .map_or(true, |after| meta.key.as_str() > after)
            })
            .take(self.page_size + 1)
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

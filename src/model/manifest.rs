//! Manifest files describing the physical files of a delta or index shard.
//!
//! The JSON layout is an on-disk contract:
//!
//! ```json
//! {
//!   "entries": [
//!     {"url": "s3://bucket/key", "meta": {"content_length": 1, "record_count": 1,
//!      "content_type": "application/parquet", "content_encoding": "identity"}}
//!   ],
//!   "meta": {"content_length": 1, "record_count": 1}
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Media type of a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    /// Comma separated values with a header row.
    #[serde(rename = "text/csv")]
    Csv,
    /// Tab separated values with a header row.
    #[serde(rename = "text/tsv")]
    Tsv,
    /// Pipe separated values with a header row.
    #[serde(rename = "text/psv")]
    Psv,
    /// Newline delimited JSON objects.
    #[serde(rename = "application/json")]
    Json,
    /// Apache Parquet.
    #[serde(rename = "application/parquet")]
    Parquet,
    /// Apache ORC.
    #[serde(rename = "application/orc")]
    Orc,
}

impl ContentType {
    /// MIME-style string value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Tsv => "text/tsv",
            Self::Psv => "text/psv",
            Self::Json => "application/json",
            Self::Parquet => "application/parquet",
            Self::Orc => "application/orc",
        }
    }
}

/// Byte-level encoding applied on top of the content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// Raw bytes.
    Identity,
    /// Gzip compressed bytes.
    Gzip,
}

impl ContentEncoding {
    /// String value stored in manifests.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
        }
    }
}

/// Per-file metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMeta {
    /// Encoded size of the file in bytes.
    pub content_length: u64,
    /// Number of rows in the file.
    pub record_count: u64,
    /// Media type of the file.
    pub content_type: ContentType,
    /// Encoding applied to the file bytes.
    pub content_encoding: ContentEncoding,
}

impl ManifestMeta {
    /// Build file metadata.
    pub fn new(
        content_length: u64,
        record_count: u64,
        content_type: ContentType,
        content_encoding: ContentEncoding,
    ) -> Self {
        Self {
            content_length,
            record_count,
            content_type,
            content_encoding,
        }
    }
}

/// One physical file listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Object store URL of the file.
    pub url: String,
    /// File metadata.
    pub meta: ManifestMeta,
}

impl ManifestEntry {
    /// Build an entry.
    pub fn new(url: impl Into<String>, meta: ManifestMeta) -> Self {
        Self {
            url: url.into(),
            meta,
        }
    }
}

/// Totals across every entry of a manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestTotals {
    /// Sum of entry content lengths.
    pub content_length: u64,
    /// Sum of entry record counts.
    pub record_count: u64,
}

/// Ordered list of files plus aggregate totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Files in order.
    pub entries: Vec<ManifestEntry>,
    /// Aggregate totals over `entries`.
    #[serde(default)]
    pub meta: ManifestTotals,
}

impl Manifest {
    /// Build a manifest, computing totals from the entries.
    pub fn of(entries: Vec<ManifestEntry>) -> Self {
        let meta = entries
            .iter()
            .fold(ManifestTotals::default(), |mut totals, entry| {
                totals.content_length += entry.meta.content_length;
                totals.record_count += entry.meta.record_count;
                totals
            });
        Self { entries, meta }
    }

    /// Returns `true` if the manifest lists no files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

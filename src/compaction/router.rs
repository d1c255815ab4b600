//! Deterministic routing of source files to materialize buckets.
//!
//! Every task must route a given source file to the same bucket without
//! talking to its peers, so the hash and the byte form of its input are fixed:
//! the SHA-1 digest of `"{True|False}|{stream_position}|{file_index}"`, read
//! as a big-endian unsigned integer, modulo the bucket count.

use std::fmt;

use sha1::{Digest, Sha1};

use crate::model::StreamPosition;

/// Index of a materialize bucket, in `[0, num_materialize_buckets)`.
pub type MaterializeBucket = u32;

/// Identifies one physical input file's contribution to a round.
///
/// Orders by `is_source`, then `stream_position`, then `file_index`, which is
/// the global order output placement walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceFileId {
    /// `true` for rows read back from the prior primary-key index.
    pub is_source: bool,
    /// Stream position of the delta the rows came from.
    pub stream_position: StreamPosition,
    /// File ordinal within that delta.
    pub file_index: i32,
}

impl SourceFileId {
    /// Build an id.
    pub fn new(is_source: bool, stream_position: StreamPosition, file_index: i32) -> Self {
        Self {
            is_source,
            stream_position,
            file_index,
        }
    }

    /// Canonical byte form hashed by [`bucket_for`].
    pub fn canonical_string(&self) -> String {
        let flag = if self.is_source { "True" } else { "False" };
        format!("{flag}|{}|{}", self.stream_position, self.file_index)
    }
}

impl fmt::Display for SourceFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

/// Reduce a digest, read as a big-endian unsigned integer, modulo `modulus`.
///
/// Returns 0 for a zero modulus.
pub fn digest_mod(digest: &[u8], modulus: u32) -> u32 {
    if modulus == 0 {
        return 0;
    }
    let modulus = u64::from(modulus);
    let rem = digest
        .iter()
        .fold(0u64, |rem, byte| (rem * 256 + u64::from(*byte)) % modulus);
    rem as u32
}

/// Materialize bucket of `source_file_id` among `num_materialize_buckets`.
pub fn bucket_for(source_file_id: &SourceFileId, num_materialize_buckets: u32) -> MaterializeBucket {
    let digest = Sha1::digest(source_file_id.canonical_string().as_bytes());
    digest_mod(&digest, num_materialize_buckets)
}

#[cfg(test)]
mod tests {
    use sha1::{Digest, Sha1};

    use super::{bucket_for, digest_mod, SourceFileId};

    #[test]
    fn canonical_string_is_fixed() {
        assert_eq!(SourceFileId::new(true, 100, 0).canonical_string(), "True|100|0");
        assert_eq!(SourceFileId::new(false, -1, 3).to_string(), "False|-1|3");
    }

    #[test]
    fn routing_is_stable() {
        let id = SourceFileId::new(true, 100, 0);
        assert_eq!(bucket_for(&id, 4), 1);
        assert_eq!(bucket_for(&id, 4), bucket_for(&id, 4));
        assert_eq!(bucket_for(&SourceFileId::new(false, 1, 0), 4), 1);
        assert_eq!(bucket_for(&SourceFileId::new(false, 3, 0), 4), 0);
        assert_eq!(bucket_for(&SourceFileId::new(false, 1, 1), 4), 2);
        assert_eq!(bucket_for(&SourceFileId::new(true, 5, 0), 4), 2);
        assert_eq!(bucket_for(&SourceFileId::new(false, 9, 0), 4), 3);
        assert_eq!(bucket_for(&id, 1), 0);
    }

    #[test]
    fn digest_mod_matches_big_endian_reduction() {
        // sha1("1") = 356a192b...28ab, which is 3 mod 4.
        let digest = Sha1::digest(b"1");
        assert_eq!(digest_mod(&digest, 4), 3);
        assert_eq!(digest_mod(&[0x01, 0x00], 255), 1);
        assert_eq!(digest_mod(&[0xff; 20], 0), 0);
    }

    #[test]
    fn ids_order_prior_index_rows_last() {
        let mut ids = vec![
            SourceFileId::new(true, 1, 0),
            SourceFileId::new(false, 2, 1),
            SourceFileId::new(false, 2, 0),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                SourceFileId::new(false, 2, 0),
                SourceFileId::new(false, 2, 1),
                SourceFileId::new(true, 1, 0),
            ]
        );
    }
}

use std::sync::{Mutex, PoisonError};

use ulid::{Generator, Ulid};

/// Identifier used for uploaded index files and published object references.
pub type FileId = Ulid;

/// Thread-safe ULID generator.
pub struct FileIdGenerator {
    inner: Mutex<Generator>,
}

impl FileIdGenerator {
    /// Create a new generator seeded with the current time.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Produce the next [`FileId`] in a monotonic, time-ordered sequence.
    ///
    /// Falls back to a fresh random ULID if the monotonic sequence overflows
    /// within a single millisecond.
    pub fn generate(&self) -> FileId {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.generate().unwrap_or_else(|_| Ulid::new())
    }
}

impl Default for FileIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FileIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIdGenerator").finish_non_exhaustive()
    }
}

//! Storage engine traits.

use crate::error::StorageResult;
use std::ops::Bound;
use std::sync::Arc;

/// Bounds and direction of an ordered walk.
///
/// `from` and `to` are encoded keys; `None` means unbounded on that side.
/// `inclusive` applies to both bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkBounds<'a> {
    /// Smallest key to visit.
    pub from: Option<&'a [u8]>,
    /// Largest key to visit.
    pub to: Option<&'a [u8]>,
    /// Whether `from` and `to` themselves are visited.
    pub inclusive: bool,
    /// Visit keys in descending order.
    pub reverse: bool,
}

impl<'a> WalkBounds<'a> {
    /// Walks the whole keyspace in ascending order.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            from: None,
            to: None,
            inclusive: true,
            reverse: false,
        }
    }

    /// Returns the lower and upper bounds as a `RangeBounds` pair, or `None`
    /// if the range is empty.
    #[must_use]
    pub fn range(&self) -> Option<(Bound<&'a [u8]>, Bound<&'a [u8]>)> {
        let bound = |key: Option<&'a [u8]>| match key {
            None => Bound::Unbounded,
            Some(k) if self.inclusive => Bound::Included(k),
            Some(k) => Bound::Excluded(k),
        };
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to || (from == to && !self.inclusive) {
                return None;
            }
        }
        Some((bound(self.from), bound(self.to)))
    }
}

/// One ordered keyspace inside a storage engine.
///
/// Keys and values are opaque bytes ordered bytewise. The cache treats a
/// table as the durable source of truth for records not held in memory.
///
/// # Invariants
///
/// - `get` after `put` returns the last value put
/// - `get` after `remove` returns `None`
/// - `walk` visits keys in bytewise order (descending when `reverse`)
pub trait StorageTable: Send + Sync {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Inserts or replaces the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn remove(&self, key: &[u8]) -> StorageResult<()>;

    /// Visits keys within `bounds` in order until `handler` returns `false`.
    ///
    /// Returns `false` if the handler stopped the walk early.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyspace cannot be read.
    fn walk(&self, bounds: WalkBounds<'_>, handler: &mut dyn FnMut(&[u8]) -> bool)
        -> StorageResult<bool>;

    /// Returns the number of keys stored.
    fn len(&self) -> usize;

    /// Returns `true` if no keys are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A storage engine: a set of named tables sharing durability.
pub trait Storage: Send + Sync {
    /// Opens (or creates) the table with the given name.
    ///
    /// Opening the same name twice returns handles to the same keyspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be opened.
    fn open_table(&self, name: &str) -> StorageResult<Arc<dyn StorageTable>>;

    /// Pushes buffered writes of every table to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if any table fails to flush.
    fn flush(&self) -> StorageResult<()>;

    /// Syncs every table to durable media.
    ///
    /// # Errors
    ///
    /// Returns an error if any table fails to sync.
    fn sync(&self) -> StorageResult<()>;
}

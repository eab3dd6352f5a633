//! In-memory storage engine.

use crate::engine::{Storage, StorageTable, WalkBounds};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Ordered keyspace shared by the in-memory and file engines.
pub(crate) type Keyspace = BTreeMap<Vec<u8>, Vec<u8>>;

/// Collects the keys a walk visits, in visiting order.
///
/// Keys are copied out so the handler runs without the keyspace lock held;
/// handlers commonly call back into `get`.
pub(crate) fn collect_keys(map: &Keyspace, bounds: WalkBounds<'_>) -> Vec<Vec<u8>> {
    let Some(range) = bounds.range() else {
        return Vec::new();
    };
    let iter = map.range::<[u8], _>(range).map(|(k, _)| k.clone());
    if bounds.reverse {
        iter.rev().collect()
    } else {
        iter.collect()
    }
}

pub(crate) fn run_walk(keys: Vec<Vec<u8>>, handler: &mut dyn FnMut(&[u8]) -> bool) -> bool {
    keys.iter().all(|k| handler(k))
}

/// An in-memory ordered table.
///
/// Suitable for tests and for deployments where the cache's durability
/// is not required. Thread-safe.
#[derive(Debug, Default)]
pub struct MemoryTable {
    entries: RwLock<Keyspace>,
}

impl MemoryTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all entries, in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl StorageTable for MemoryTable {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn walk(
        &self,
        bounds: WalkBounds<'_>,
        handler: &mut dyn FnMut(&[u8]) -> bool,
    ) -> StorageResult<bool> {
        let keys = collect_keys(&self.entries.read(), bounds);
        Ok(run_walk(keys, handler))
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// An in-memory storage engine holding any number of named tables.
///
/// # Example
///
/// ```rust
/// use vellum_storage::{MemoryStorage, Storage};
///
/// let storage = MemoryStorage::new();
/// let table = storage.open_table("players").unwrap();
/// table.put(b"k", b"v").unwrap();
/// assert_eq!(table.get(b"k").unwrap(), Some(b"v".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<HashMap<String, Arc<MemoryTable>>>,
}

impl MemoryStorage {
    /// Creates an empty storage engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the concrete table with the given name, if opened.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<Arc<MemoryTable>> {
        self.tables.read().get(name).cloned()
    }
}

impl Storage for MemoryStorage {
    fn open_table(&self, name: &str) -> StorageResult<Arc<dyn StorageTable>> {
        let table = Arc::clone(
            self.tables
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryTable::new())),
        );
        Ok(table)
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}

//! Fault-injecting storage.
//!
//! Wraps [`MemoryStorage`] and fails writes on demand, to check that a
//! failed flush leaves records dirty for the next pass.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use vellum_storage::{
    MemoryStorage, Storage, StorageError, StorageResult, StorageTable, WalkBounds,
};

#[derive(Debug, Default)]
struct Switches {
    fail_writes: AtomicBool,
    failed_writes: AtomicUsize,
    writes: AtomicUsize,
}

impl Switches {
    fn check(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A storage engine whose `put` and `remove` can be switched to fail.
#[derive(Debug, Default)]
pub struct FaultyStorage {
    inner: MemoryStorage,
    switches: Arc<Switches>,
}

impl FaultyStorage {
    /// Creates an empty engine with writes succeeding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail (`true`) or succeed (`false`).
    pub fn fail_writes(&self, fail: bool) {
        self.switches.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of writes rejected so far.
    pub fn failed_writes(&self) -> usize {
        self.switches.failed_writes.load(Ordering::SeqCst)
    }

    /// Number of writes accepted so far.
    pub fn writes(&self) -> usize {
        self.switches.writes.load(Ordering::SeqCst)
    }

    /// Reads a key straight from the underlying table.
    pub fn raw_get(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.inner
            .table(table)
            .and_then(|t| t.get(key).ok().flatten())
    }
}

struct FaultyTable {
    inner: Arc<dyn StorageTable>,
    switches: Arc<Switches>,
}

impl StorageTable for FaultyTable {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.switches.check()?;
        self.inner.put(key, value)
    }

    fn remove(&self, key: &[u8]) -> StorageResult<()> {
        self.switches.check()?;
        self.inner.remove(key)
    }

    fn walk(
        &self,
        bounds: WalkBounds<'_>,
        handler: &mut dyn FnMut(&[u8]) -> bool,
    ) -> StorageResult<bool> {
        self.inner.walk(bounds, handler)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl Storage for FaultyStorage {
    fn open_table(&self, name: &str) -> StorageResult<Arc<dyn StorageTable>> {
        Ok(Arc::new(FaultyTable {
            inner: self.inner.open_table(name)?,
            switches: Arc::clone(&self.switches),
        }))
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&self) -> StorageResult<()> {
        self.inner.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_fail_while_switched_on() {
        let storage = FaultyStorage::new();
        let table = storage.open_table("t").unwrap();
        table.put(b"a", b"1").unwrap();

        storage.fail_writes(true);
        assert!(table.put(b"b", b"2").is_err());
        assert!(table.remove(b"a").is_err());
        assert_eq!(table.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(storage.failed_writes(), 2);
        assert_eq!(storage.writes(), 1);

        storage.fail_writes(false);
        table.put(b"b", b"2").unwrap();
        assert_eq!(storage.raw_get("t", b"b").as_deref(), Some(&b"2"[..]));
    }
}

//! Per-table record cache.
//!
//! A [`Table`] fronts one storage keyspace with two caches:
//!
//! - a bounded LRU **read cache**, best effort, holding recently used records
//! - an unbounded **write-back cache** mapping keys to dirty records or
//!   tombstones, drained by the commit driver
//!
//! Memory-only tables have no storage and no write-back cache; their read
//! cache is all there is.
//!
//! ## Lock discipline
//!
//! Every lookup and mutation takes the caller's [`LockSet`] and panics if it
//! does not cover the record's stripe. The `*_safe` variants take a
//! [`Procedure`](crate::Procedure) and return undo-tracked
//! [`Safe`](crate::Safe) wrappers.
//!
//! The read cache and write-back cache mutexes are never held at the same
//! time.

mod flush;
mod safe_ops;

pub use flush::{FlushCounts, Flushable};

use crate::error::{CacheError, CacheResult};
use crate::lock::{self, LockManager, LockSet};
use crate::record::Record;
use crate::stats::CacheStats;
use crate::types::{LockId, SaveState, TableId};
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vellum_codec::{decode_value, KeyCodec};
use vellum_storage::{StorageTable, WalkBounds};

/// Bounds required of table keys.
pub trait TableKey: KeyCodec + Ord + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> TableKey for T where T: KeyCodec + Ord + Hash + Clone + Debug + Send + Sync + 'static {}

/// Bounds required of record values.
pub trait TableValue: Clone + Debug + Send + Serialize + DeserializeOwned + 'static {}

impl<T> TableValue for T where T: Clone + Debug + Send + Serialize + DeserializeOwned + 'static {}

/// Parameters for opening a table.
#[derive(Debug, Clone)]
pub struct TableOptions {
    pub(crate) id: TableId,
    pub(crate) name: String,
    pub(crate) lock_name: String,
    pub(crate) cache_size: Option<usize>,
    pub(crate) persistent: bool,
}

impl TableOptions {
    /// Options for a persistent table locking under its own name.
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: TableId(id),
            lock_name: name.clone(),
            name,
            cache_size: None,
            persistent: true,
        }
    }

    /// Sets the lock name. Tables sharing a lock name share stripes for
    /// equal keys; an empty name locks by table id.
    #[must_use]
    pub fn lock_name(mut self, lock_name: impl Into<String>) -> Self {
        self.lock_name = lock_name.into();
        self
    }

    /// Sets the read cache capacity.
    #[must_use]
    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = Some(size);
        self
    }

    /// Keeps the table in memory only, without a storage keyspace.
    #[must_use]
    pub fn memory_only(mut self) -> Self {
        self.persistent = false;
        self
    }
}

/// An entry of the write-back cache.
pub(crate) enum Pending<V> {
    Present(Record<V>),
    Tombstoned,
}

impl<V> Pending<V> {
    pub(crate) fn into_record(self) -> Option<Record<V>> {
        match self {
            Self::Present(record) => Some(record),
            Self::Tombstoned => None,
        }
    }
}

impl<V> Clone for Pending<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Present(record) => Self::Present(record.clone()),
            Self::Tombstoned => Self::Tombstoned,
        }
    }
}

enum Lookup<V> {
    Hit(Record<V>),
    Deleted,
    Miss,
}

/// A cached table of records keyed by `K`.
pub struct Table<K, V> {
    id: TableId,
    name: Arc<str>,
    seed: u32,
    locks: Arc<LockManager>,
    stats: Arc<CacheStats>,
    mod_count: Arc<AtomicU64>,
    storage: Option<Arc<dyn StorageTable>>,
    cache: Mutex<LruCache<K, Record<V>>>,
    modified: Option<Mutex<HashMap<K, Pending<V>>>>,
}

impl<K: TableKey, V: TableValue> Table<K, V> {
    pub(crate) fn new(
        options: &TableOptions,
        storage: Option<Arc<dyn StorageTable>>,
        locks: Arc<LockManager>,
        stats: Arc<CacheStats>,
        mod_count: Arc<AtomicU64>,
        default_cache_size: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(options.cache_size.unwrap_or(default_cache_size))
            .unwrap_or(NonZeroUsize::MIN);
        let modified = storage.as_ref().map(|_| Mutex::new(HashMap::new()));
        Self {
            id: options.id,
            name: Arc::from(options.name.as_str()),
            seed: lock::lock_seed(&options.lock_name, options.id),
            locks,
            stats,
            mod_count,
            storage,
            cache: Mutex::new(LruCache::new(capacity)),
            modified,
        }
    }

    /// Table id.
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the table is backed by storage.
    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    /// Lock id of the stripe guarding `key`.
    pub fn lock_id(&self, key: &K) -> LockId {
        lock::lock_id(self.seed, &key.to_key_bytes())
    }

    pub(crate) fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Records waiting in the write-back cache.
    pub fn dirty_count(&self) -> usize {
        self.modified.as_ref().map_or(0, |m| m.lock().len())
    }

    /// Records resident in the read cache.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    fn check_lock(&self, locks: &LockSet<'_>, key: &K) -> LockId {
        let lock_id = self.lock_id(key);
        if !locks.belongs_to(&self.locks) || !locks.holds(lock_id) {
            panic!("access to unlocked record: table={},key={:?}", self.name, key);
        }
        lock_id
    }

    fn lookup_cached(&self, key: &K, populate: bool) -> Lookup<V> {
        if let Some(record) = self.cache.lock().get(key) {
            return Lookup::Hit(record.clone());
        }
        let Some(modified) = &self.modified else {
            return Lookup::Miss;
        };
        let pending = modified.lock().get(key).cloned();
        match pending {
            Some(Pending::Present(record)) => {
                if populate {
                    self.cache.lock().put(key.clone(), record.clone());
                }
                Lookup::Hit(record)
            }
            Some(Pending::Tombstoned) => Lookup::Deleted,
            None => Lookup::Miss,
        }
    }

    fn load(&self, key: &K) -> CacheResult<Option<Record<V>>> {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };
        self.stats.record_storage_read();
        let Some(bytes) = storage.get(&key.to_key_bytes())? else {
            return Ok(None);
        };
        let value: V = decode_value(&bytes)?;
        Ok(Some(Record::loaded(value, self.id)))
    }

    fn fetch(&self, locks: &LockSet<'_>, key: &K, populate: bool) -> CacheResult<Option<Record<V>>> {
        let lock_id = self.check_lock(locks, key);
        self.stats.record_read();
        let found = match self.lookup_cached(key, populate) {
            Lookup::Hit(record) => Some(record),
            Lookup::Deleted => None,
            Lookup::Miss => {
                let loaded = self.load(key)?;
                if populate {
                    if let Some(record) = &loaded {
                        self.cache.lock().put(key.clone(), record.clone());
                    }
                }
                loaded
            }
        };
        Ok(found.map(|record| self.stamped(record, lock_id)))
    }

    fn stamped(&self, record: Record<V>, lock_id: LockId) -> Record<V> {
        record.stamp(self.locks.epoch(lock_id));
        record
    }

    /// Looks up `key` through the read cache, the write-back cache, then
    /// storage. Records loaded from storage enter the read cache.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the stored value cannot be
    /// decoded.
    ///
    /// # Panics
    ///
    /// Panics if `locks` does not hold the key's stripe.
    pub fn get(&self, locks: &LockSet<'_>, key: &K) -> CacheResult<Option<Record<V>>> {
        self.fetch(locks, key, true)
    }

    /// Like [`get`](Self::get), but never adds to the read cache.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the stored value cannot be
    /// decoded.
    ///
    /// # Panics
    ///
    /// Panics if `locks` does not hold the key's stripe.
    pub fn get_no_cache(&self, locks: &LockSet<'_>, key: &K) -> CacheResult<Option<Record<V>>> {
        self.fetch(locks, key, false)
    }

    /// Looks up `key` in the read and write-back caches only.
    ///
    /// # Panics
    ///
    /// Panics if `locks` does not hold the key's stripe.
    pub fn get_cache(&self, locks: &LockSet<'_>, key: &K) -> Option<Record<V>> {
        let lock_id = self.check_lock(locks, key);
        self.stats.record_read();
        match self.lookup_cached(key, false) {
            Lookup::Hit(record) => Some(self.stamped(record, lock_id)),
            Lookup::Deleted | Lookup::Miss => None,
        }
    }

    /// Stores `record` under `key` and marks it dirty.
    ///
    /// If `record` is already the one cached under `key` this is
    /// [`modify`](Self::modify). Any other record previously held under
    /// `key` is detached and becomes `Unstored`.
    ///
    /// # Errors
    ///
    /// Returns `SharedRecord` if `record` is attached elsewhere.
    ///
    /// # Panics
    ///
    /// Panics if `locks` does not hold the key's stripe.
    pub fn put(&self, locks: &LockSet<'_>, key: K, record: Record<V>) -> CacheResult<()> {
        let lock_id = self.check_lock(locks, &key);
        if self.holds_record(&key, &record) {
            return self.modify(locks, &key, &record);
        }
        if record.is_stored() {
            return Err(CacheError::shared_record(&self.name, &key));
        }

        record.stamp(self.locks.epoch(lock_id));
        let displaced = self.cache.lock().put(key.clone(), record.clone());
        detach_displaced(displaced, &record);
        match &self.modified {
            Some(modified) => {
                let previous = modified
                    .lock()
                    .insert(key, Pending::Present(record.clone()));
                if previous.is_none() {
                    self.mod_count.fetch_add(1, Ordering::Relaxed);
                }
                record.attach(self.id, SaveState::StoredDirty);
                detach_displaced(previous.and_then(Pending::into_record), &record);
            }
            None => record.attach(self.id, SaveState::StoredClean),
        }

        self.stats.record_put();
        self.locks.increment_version(lock_id);
        Ok(())
    }

    fn holds_record(&self, key: &K, record: &Record<V>) -> bool {
        if self
            .cache
            .lock()
            .peek(key)
            .is_some_and(|cached| cached.ptr_eq(record))
        {
            return true;
        }
        self.modified.as_ref().is_some_and(|m| {
            matches!(m.lock().get(key), Some(Pending::Present(p)) if p.ptr_eq(record))
        })
    }

    /// Marks a record obtained from this table as modified, queueing it for
    /// the next flush.
    ///
    /// # Errors
    ///
    /// Returns `UnmatchedRecord` if `record` is not attached to this table,
    /// or if it is no longer the record current under `key`: the caches hold
    /// something else, or it left the read cache and the key has been written
    /// back since.
    ///
    /// # Panics
    ///
    /// Panics if `locks` does not hold the key's stripe.
    pub fn modify(&self, locks: &LockSet<'_>, key: &K, record: &Record<V>) -> CacheResult<()> {
        let lock_id = self.check_lock(locks, key);
        if !record.is_stored_in(self.id) {
            return Err(CacheError::unmatched_record(&self.name, key));
        }
        let resident = match self.cache.lock().peek(key).map(|cached| cached.ptr_eq(record)) {
            Some(true) => true,
            Some(false) => return Err(CacheError::unmatched_record(&self.name, key)),
            None => false,
        };

        match &self.modified {
            Some(modified) => {
                if !record.is_modified() {
                    let inserted = {
                        let mut pending = modified.lock();
                        let matched = match pending.get(key) {
                            Some(Pending::Present(current)) => Some(current.ptr_eq(record)),
                            Some(Pending::Tombstoned) => Some(false),
                            None => None,
                        };
                        match matched {
                            Some(true) => false,
                            Some(false) => return Err(CacheError::unmatched_record(&self.name, key)),
                            None if !resident && record.epoch() != self.locks.epoch(lock_id) => {
                                return Err(CacheError::unmatched_record(&self.name, key));
                            }
                            None => {
                                pending.insert(key.clone(), Pending::Present(record.clone()));
                                true
                            }
                        }
                    };
                    if inserted {
                        self.mod_count.fetch_add(1, Ordering::Relaxed);
                    }
                    record.set_state(SaveState::StoredDirty);
                }
            }
            None if !resident => {
                // Keep memory-only records resident; eviction would lose them.
                self.cache.lock().put(key.clone(), record.clone());
            }
            None => {}
        }

        self.stats.record_modify();
        self.locks.increment_version(lock_id);
        Ok(())
    }

    /// [`modify`](Self::modify) for a record a transaction kept hold of,
    /// which may have left the read cache while a clean copy was loaded in
    /// its place.
    pub(crate) fn modify_tracked(
        &self,
        locks: &LockSet<'_>,
        key: &K,
        record: &Record<V>,
    ) -> CacheResult<()> {
        let lock_id = self.check_lock(locks, key);
        if !self.reinstate(key, record, lock_id) {
            return Err(CacheError::unmatched_record(&self.name, key));
        }
        self.modify(locks, key, record)
    }

    /// Returns `true` if `record` is still current under `key`, putting it
    /// back in the read cache over any clean copy loaded after it left.
    fn reinstate(&self, key: &K, record: &Record<V>, lock_id: LockId) -> bool {
        if !record.is_stored_in(self.id) {
            return false;
        }
        if let Some(modified) = &self.modified {
            match modified.lock().get(key) {
                Some(Pending::Present(current)) => return current.ptr_eq(record),
                Some(Pending::Tombstoned) => return false,
                None => {}
            }
        }

        let fresh = record.epoch() == self.locks.epoch(lock_id);
        // Only storage reloads produce copies; a memory-only table holding
        // another record had it put there.
        let reloadable = fresh && self.storage.is_some();
        let displaced = {
            let mut cache = self.cache.lock();
            match cache.peek(key).map(|cached| cached.ptr_eq(record)) {
                Some(true) => return true,
                Some(false) if reloadable => cache.put(key.clone(), record.clone()),
                Some(false) => return false,
                None => return fresh,
            }
        };
        detach_displaced(displaced, record);
        true
    }

    /// Removes `key`: evicts it from the read cache and queues a tombstone.
    ///
    /// # Panics
    ///
    /// Panics if `locks` does not hold the key's stripe.
    pub fn remove(&self, locks: &LockSet<'_>, key: &K) {
        let lock_id = self.check_lock(locks, key);
        let evicted = self.cache.lock().pop(key);
        if let Some(record) = evicted {
            record.detach();
        }
        if let Some(modified) = &self.modified {
            let previous = modified.lock().insert(key.clone(), Pending::Tombstoned);
            match previous {
                None => {
                    self.mod_count.fetch_add(1, Ordering::Relaxed);
                }
                Some(Pending::Present(record)) => record.detach(),
                Some(Pending::Tombstoned) => {}
            }
        }

        self.stats.record_remove();
        self.locks.increment_version(lock_id);
    }

    /// Visits keys in order until `handler` returns `false`.
    ///
    /// Persistent tables walk storage, so records written since the last
    /// flush are not reflected; fetch through [`get`](Self::get) under the
    /// record's lock for the current state. Memory-only tables walk the
    /// read cache.
    ///
    /// Returns `false` if the handler stopped the walk.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or a stored key cannot be decoded.
    pub fn walk(
        &self,
        mut handler: impl FnMut(&K) -> bool,
        from: Option<&K>,
        to: Option<&K>,
        inclusive: bool,
        reverse: bool,
    ) -> CacheResult<bool> {
        let Some(storage) = &self.storage else {
            let mut keys: Vec<K> = self
                .cached_keys()
                .into_iter()
                .filter(|k| in_range(k, from, to, inclusive))
                .collect();
            keys.sort();
            if reverse {
                keys.reverse();
            }
            return Ok(keys.iter().all(|k| handler(k)));
        };

        let from = from.map(KeyCodec::to_key_bytes);
        let to = to.map(KeyCodec::to_key_bytes);
        let bounds = WalkBounds {
            from: from.as_deref(),
            to: to.as_deref(),
            inclusive,
            reverse,
        };
        let mut failure = None;
        let finished = storage.walk(bounds, &mut |bytes| match K::decode_key(bytes) {
            Ok(key) => handler(&key),
            Err(e) => {
                failure = Some(e);
                false
            }
        })?;
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(finished),
        }
    }

    /// Visits the keys resident in the read cache, in no particular order.
    pub fn walk_cache(&self, mut handler: impl FnMut(&K) -> bool) -> bool {
        self.cached_keys().iter().all(|k| handler(k))
    }

    fn cached_keys(&self) -> Vec<K> {
        self.cache.lock().iter().map(|(k, _)| k.clone()).collect()
    }
}

fn detach_displaced<V>(displaced: Option<Record<V>>, replacement: &Record<V>) {
    if let Some(old) = displaced {
        if !old.ptr_eq(replacement) {
            old.detach();
        }
    }
}

fn in_range<K: Ord>(key: &K, from: Option<&K>, to: Option<&K>, inclusive: bool) -> bool {
    let above = from.map_or(true, |f| if inclusive { key >= f } else { key > f });
    let below = to.map_or(true, |t| if inclusive { key <= t } else { key < t });
    above && below
}

impl<K, V> Debug for Table<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("persistent", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_codec::encode_value;
    use vellum_storage::{MemoryTable, StorageTable};

    struct Fixture {
        locks: Arc<LockManager>,
        stats: Arc<CacheStats>,
        mod_count: Arc<AtomicU64>,
        storage: Arc<MemoryTable>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                locks: Arc::new(LockManager::new(64)),
                stats: Arc::new(CacheStats::new()),
                mod_count: Arc::new(AtomicU64::new(0)),
                storage: Arc::new(MemoryTable::new()),
            }
        }

        fn table(&self, cache_size: usize) -> Table<u32, String> {
            let options = TableOptions::new(1, "t").cache_size(cache_size);
            Table::new(
                &options,
                Some(Arc::clone(&self.storage) as Arc<dyn StorageTable>),
                Arc::clone(&self.locks),
                Arc::clone(&self.stats),
                Arc::clone(&self.mod_count),
                16,
            )
        }

        fn memory_table(&self) -> Table<u32, String> {
            let options = TableOptions::new(2, "m").memory_only();
            Table::new(
                &options,
                None,
                Arc::clone(&self.locks),
                Arc::clone(&self.stats),
                Arc::clone(&self.mod_count),
                16,
            )
        }

        fn seed(&self, key: u32, value: &str) {
            self.storage
                .put(&key.to_key_bytes(), &encode_value(&value.to_string()).unwrap())
                .unwrap();
        }
    }

    #[test]
    fn get_loads_from_storage_as_clean() {
        let fx = Fixture::new();
        fx.seed(1, "v1");
        let table = fx.table(4);
        let locks = fx.locks.acquire(&[table.lock_id(&1)]);

        let record = table.get(&locks, &1).unwrap().unwrap();
        assert_eq!(record.get(), "v1");
        assert_eq!(record.state(), SaveState::StoredClean);
        assert_eq!(table.cache_len(), 1);

        let again = table.get(&locks, &1).unwrap().unwrap();
        assert!(again.ptr_eq(&record));
        assert_eq!(fx.stats.storage_reads(), 1);
        assert_eq!(fx.stats.reads(), 2);
    }

    #[test]
    fn get_no_cache_leaves_read_cache_alone() {
        let fx = Fixture::new();
        fx.seed(1, "v1");
        let table = fx.table(4);
        let locks = fx.locks.acquire(&[table.lock_id(&1)]);

        assert!(table.get_no_cache(&locks, &1).unwrap().is_some());
        assert_eq!(table.cache_len(), 0);
        assert!(table.get_cache(&locks, &1).is_none());
    }

    #[test]
    fn put_marks_dirty_and_counts_new_keys_once() {
        let fx = Fixture::new();
        let table = fx.table(4);
        let locks = fx.locks.acquire(&[table.lock_id(&1)]);

        let first = Record::new("a".to_string());
        table.put(&locks, 1, first.clone()).unwrap();
        assert!(first.is_modified());
        assert_eq!(table.dirty_count(), 1);

        let second = Record::new("b".to_string());
        table.put(&locks, 1, second.clone()).unwrap();
        assert_eq!(table.dirty_count(), 1);
        assert_eq!(fx.mod_count.load(Ordering::Relaxed), 1);
        assert_eq!(first.state(), SaveState::Unstored);
        assert_eq!(table.get(&locks, &1).unwrap().unwrap().get(), "b");
    }

    #[test]
    fn put_of_stored_record_is_rejected() {
        let fx = Fixture::new();
        let table = fx.table(4);
        let locks = fx.locks.acquire(&[table.lock_id(&1), table.lock_id(&2)]);

        let record = Record::new("a".to_string());
        table.put(&locks, 1, record.clone()).unwrap();
        let err = table.put(&locks, 2, record).unwrap_err();
        assert!(matches!(err, CacheError::SharedRecord { .. }));
        assert!(table.get(&locks, &2).unwrap().is_none());
    }

    #[test]
    fn put_same_record_again_is_modify() {
        let fx = Fixture::new();
        fx.seed(1, "v1");
        let table = fx.table(4);
        let locks = fx.locks.acquire(&[table.lock_id(&1)]);

        let record = table.get(&locks, &1).unwrap().unwrap();
        record.write(|v| v.push('!'));
        table.put(&locks, 1, record.clone()).unwrap();
        assert!(record.is_modified());
        assert_eq!(table.dirty_count(), 1);
    }

    #[test]
    fn modify_queues_clean_record() {
        let fx = Fixture::new();
        fx.seed(1, "v1");
        let table = fx.table(4);
        let locks = fx.locks.acquire(&[table.lock_id(&1)]);

        let record = table.get(&locks, &1).unwrap().unwrap();
        let version = fx.locks.version(table.lock_id(&1));
        table.modify(&locks, &1, &record).unwrap();
        table.modify(&locks, &1, &record).unwrap();
        assert_eq!(table.dirty_count(), 1);
        assert_eq!(fx.mod_count.load(Ordering::Relaxed), 1);
        assert!(fx.locks.version(table.lock_id(&1)) > version);
    }

    #[test]
    fn modify_rejects_unmatched_records() {
        let fx = Fixture::new();
        let table = fx.table(4);
        let locks = fx.locks.acquire(&[table.lock_id(&1)]);

        let fresh = Record::new("x".to_string());
        assert!(matches!(
            table.modify(&locks, &1, &fresh),
            Err(CacheError::UnmatchedRecord { .. })
        ));

        let current = Record::new("a".to_string());
        table.put(&locks, 1, current.clone()).unwrap();
        let stale = Record::loaded("b".to_string(), table.id());
        assert!(matches!(
            table.modify(&locks, &1, &stale),
            Err(CacheError::UnmatchedRecord { .. })
        ));
        assert!(table.get(&locks, &1).unwrap().unwrap().ptr_eq(&current));
    }

    #[test]
    fn modify_rejects_record_of_another_table() {
        let fx = Fixture::new();
        fx.seed(1, "v1");
        let a = fx.table(4);
        let b = Table::<u32, String>::new(
            &TableOptions::new(9, "b").lock_name("t"),
            Some(Arc::new(MemoryTable::new()) as Arc<dyn StorageTable>),
            Arc::clone(&fx.locks),
            Arc::clone(&fx.stats),
            Arc::clone(&fx.mod_count),
            16,
        );
        let locks = fx.locks.acquire(&[a.lock_id(&1), b.lock_id(&1)]);

        let foreign = a.get(&locks, &1).unwrap().unwrap();
        assert!(matches!(
            b.modify(&locks, &1, &foreign),
            Err(CacheError::UnmatchedRecord { .. })
        ));
        assert_eq!(b.dirty_count(), 0);
        assert_eq!(foreign.state(), SaveState::StoredClean);
    }

    #[test]
    fn evicted_handle_is_stale_once_its_key_is_written_back() {
        let fx = Fixture::new();
        fx.seed(1, "a");
        fx.seed(2, "x");
        let table = fx.table(1);
        let locks = fx.locks.acquire(&[table.lock_id(&1), table.lock_id(&2)]);

        let stale = table.get(&locks, &1).unwrap().unwrap();
        table.get(&locks, &2).unwrap();
        let current = table.get(&locks, &1).unwrap().unwrap();
        assert!(!current.ptr_eq(&stale));
        current.write(|v| *v = "b".to_string());
        table.modify(&locks, &1, &current).unwrap();
        drop(locks);
        assert_eq!(table.flush_all().flushed, 1);

        let locks = fx.locks.acquire(&[table.lock_id(&1), table.lock_id(&2)]);
        stale.write(|v| *v = "stale".to_string());
        assert!(matches!(
            table.modify(&locks, &1, &stale),
            Err(CacheError::UnmatchedRecord { .. })
        ));
        table.get(&locks, &2).unwrap();
        assert!(matches!(
            table.modify(&locks, &1, &stale),
            Err(CacheError::UnmatchedRecord { .. })
        ));
        drop(locks);
        table.flush_all();
        let stored: String = decode_value(&fx.storage.get(&1u32.to_key_bytes()).unwrap().unwrap()).unwrap();
        assert_eq!(stored, "b");
    }

    #[test]
    fn evicted_handle_stays_current_without_a_write_back() {
        let fx = Fixture::new();
        fx.seed(1, "a");
        fx.seed(2, "x");
        let table = fx.table(1);
        let locks = fx.locks.acquire(&[table.lock_id(&1), table.lock_id(&2)]);

        let record = table.get(&locks, &1).unwrap().unwrap();
        table.get(&locks, &2).unwrap();
        record.write(|v| v.push('!'));
        table.modify(&locks, &1, &record).unwrap();
        assert!(table.get(&locks, &1).unwrap().unwrap().ptr_eq(&record));
    }

    #[test]
    fn tracked_record_displaces_a_reloaded_copy() {
        let fx = Fixture::new();
        fx.seed(1, "a");
        fx.seed(2, "x");
        let table = fx.table(1);
        let locks = fx.locks.acquire(&[table.lock_id(&1), table.lock_id(&2)]);

        let tracked = table.get(&locks, &1).unwrap().unwrap();
        table.get(&locks, &2).unwrap();
        let copy = table.get(&locks, &1).unwrap().unwrap();
        tracked.write(|v| v.push('!'));
        assert!(matches!(
            table.modify(&locks, &1, &tracked),
            Err(CacheError::UnmatchedRecord { .. })
        ));
        table.modify_tracked(&locks, &1, &tracked).unwrap();
        assert_eq!(copy.state(), SaveState::Unstored);
        assert_eq!(table.get(&locks, &1).unwrap().unwrap().get(), "a!");
    }

    #[test]
    fn tombstone_hides_stored_value() {
        let fx = Fixture::new();
        fx.seed(1, "v1");
        let table = fx.table(4);
        let locks = fx.locks.acquire(&[table.lock_id(&1)]);

        let record = table.get(&locks, &1).unwrap().unwrap();
        table.remove(&locks, &1);
        assert!(table.get(&locks, &1).unwrap().is_none());
        assert!(table.get_no_cache(&locks, &1).unwrap().is_none());
        assert_eq!(record.state(), SaveState::Unstored);
        assert_eq!(table.dirty_count(), 1);
    }

    #[test]
    fn read_cache_is_bounded() {
        let fx = Fixture::new();
        for k in 0..4 {
            fx.seed(k, "v");
        }
        let table = fx.table(2);
        let ids: Vec<_> = (0..4).map(|k| table.lock_id(&k)).collect();
        let locks = fx.locks.acquire(&ids);
        for k in 0..4 {
            table.get(&locks, &k).unwrap();
        }
        assert_eq!(table.cache_len(), 2);
    }

    #[test]
    #[should_panic(expected = "access to unlocked record: table=t,key=7")]
    fn unlocked_access_panics() {
        let fx = Fixture::new();
        let table = fx.table(4);
        let locks = fx.locks.acquire(&[]);
        let _ = table.get(&locks, &7);
    }

    #[test]
    fn memory_only_records_are_clean() {
        let fx = Fixture::new();
        let table = fx.memory_table();
        let locks = fx.locks.acquire(&[table.lock_id(&1)]);

        let record = Record::new("m".to_string());
        table.put(&locks, 1, record.clone()).unwrap();
        assert_eq!(record.state(), SaveState::StoredClean);
        assert_eq!(table.dirty_count(), 0);
        table.modify(&locks, &1, &record).unwrap();
        assert_eq!(record.state(), SaveState::StoredClean);

        table.remove(&locks, &1);
        assert!(table.get(&locks, &1).unwrap().is_none());
    }

    #[test]
    fn walk_uses_storage_order_and_bounds() {
        let fx = Fixture::new();
        for k in [5, 1, 3, 9] {
            fx.seed(k, "v");
        }
        let table = fx.table(4);

        let mut seen = Vec::new();
        let finished = table
            .walk(
                |k| {
                    seen.push(*k);
                    true
                },
                Some(&1),
                Some(&9),
                false,
                true,
            )
            .unwrap();
        assert!(finished);
        assert_eq!(seen, vec![5, 3]);
    }

    #[test]
    fn memory_walk_filters_and_sorts_cache_keys() {
        let fx = Fixture::new();
        let table = fx.memory_table();
        let ids: Vec<_> = (0..5).map(|k| table.lock_id(&k)).collect();
        let locks = fx.locks.acquire(&ids);
        for k in [4, 0, 2, 1, 3] {
            table.put(&locks, k, Record::new(k.to_string())).unwrap();
        }

        let mut seen = Vec::new();
        table
            .walk(
                |k| {
                    seen.push(*k);
                    *k > 2
                },
                Some(&1),
                None,
                true,
                true,
            )
            .unwrap();
        assert_eq!(seen, vec![4, 3, 2]);

        let mut count = 0;
        assert!(table.walk_cache(|_| {
            count += 1;
            true
        }));
        assert_eq!(count, 5);
    }
}

//! Transaction-tracked table operations.
//!
//! Lookups return [`Safe`] wrappers registered with the procedure's context,
//! one per `(table, key)`. `put_safe` and `remove_safe` capture both cache
//! slots of the key and register an undo action that puts them back.

use super::{Pending, Table, TableKey, TableValue};
use crate::error::CacheResult;
use crate::record::{Attachment, Record};
use crate::txn::{Procedure, Safe};
use std::sync::Arc;

/// Both cache slots of one key, and how the records in them were attached.
struct Slot<V> {
    cached: Option<Record<V>>,
    pending: Option<Pending<V>>,
    states: Vec<(Record<V>, Attachment)>,
}

impl<V> Slot<V> {
    fn contains(&self, record: &Record<V>) -> bool {
        self.states.iter().any(|(r, _)| r.ptr_eq(record))
    }
}

impl<K: TableKey, V: TableValue> Table<K, V> {
    /// [`get`](Self::get), returning a tracked wrapper.
    ///
    /// A key already touched in this transaction returns the same wrapper.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the stored value cannot be
    /// decoded.
    ///
    /// # Panics
    ///
    /// Panics if the procedure does not hold the key's stripe.
    pub fn get_safe(self: &Arc<Self>, proc: &Procedure<'_>, key: &K) -> CacheResult<Option<Safe<V>>> {
        self.lookup_safe(proc, key, || self.get(proc.locks(), key))
    }

    /// [`get_no_cache`](Self::get_no_cache), returning a tracked wrapper.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the stored value cannot be
    /// decoded.
    ///
    /// # Panics
    ///
    /// Panics if the procedure does not hold the key's stripe.
    pub fn get_no_cache_safe(
        self: &Arc<Self>,
        proc: &Procedure<'_>,
        key: &K,
    ) -> CacheResult<Option<Safe<V>>> {
        self.lookup_safe(proc, key, || self.get_no_cache(proc.locks(), key))
    }

    /// [`get_cache`](Self::get_cache), returning a tracked wrapper.
    ///
    /// # Panics
    ///
    /// Panics if the procedure does not hold the key's stripe.
    pub fn get_cache_safe(self: &Arc<Self>, proc: &Procedure<'_>, key: &K) -> Option<Safe<V>> {
        self.lookup_safe(proc, key, || Ok(self.get_cache(proc.locks(), key)))
            .ok()
            .flatten()
    }

    fn lookup_safe(
        self: &Arc<Self>,
        proc: &Procedure<'_>,
        key: &K,
        fetch: impl FnOnce() -> CacheResult<Option<Record<V>>>,
    ) -> CacheResult<Option<Safe<V>>> {
        let lock_id = self.check_lock(proc.locks(), key);
        let ctx = proc.context();
        if let Some(safe) = ctx.find::<K, V>(self.id, key) {
            // Evicted from the read cache is still current; replaced is not.
            if self.reinstate(key, safe.raw(), lock_id) {
                return Ok(Some(safe));
            }
            ctx.detach::<K, V>(self.id, key);
        }
        let Some(record) = fetch()? else {
            return Ok(None);
        };
        Ok(Some(ctx.track(self, key.clone(), record)))
    }

    /// [`put`](Self::put)s a fresh record holding `value` and returns it
    /// tracked; rollback restores whatever the key held before.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`put`](Self::put).
    ///
    /// # Panics
    ///
    /// Panics if the procedure does not hold the key's stripe.
    pub fn put_safe(self: &Arc<Self>, proc: &Procedure<'_>, key: K, value: V) -> CacheResult<Safe<V>> {
        let locks = proc.locks();
        self.check_lock(locks, &key);
        let slot = self.capture(&key);
        let record = Record::new(value);
        self.put(locks, key.clone(), record.clone())?;
        self.register_undo(proc, key.clone(), slot);
        Ok(proc.context().track(self, key, record))
    }

    /// [`remove`](Self::remove)s `key` if it exists; rollback restores it.
    ///
    /// # Errors
    ///
    /// Returns an error if checking storage for the key fails.
    ///
    /// # Panics
    ///
    /// Panics if the procedure does not hold the key's stripe.
    pub fn remove_safe(self: &Arc<Self>, proc: &Procedure<'_>, key: &K) -> CacheResult<()> {
        let locks = proc.locks();
        if self.get_no_cache(locks, key)?.is_none() {
            return Ok(());
        }
        let slot = self.capture(key);
        self.remove(locks, key);
        self.register_undo(proc, key.clone(), slot);
        Ok(())
    }

    fn register_undo(self: &Arc<Self>, proc: &Procedure<'_>, key: K, slot: Slot<V>) {
        let ctx = proc.context();
        ctx.detach::<K, V>(self.id, &key);
        let table = Arc::clone(self);
        ctx.push_undo(move || table.restore_slot(&key, slot));
    }

    fn capture(&self, key: &K) -> Slot<V> {
        let cached = self.cache.lock().peek(key).cloned();
        let pending = self
            .modified
            .as_ref()
            .and_then(|m| m.lock().get(key).cloned());
        let states = cached
            .iter()
            .chain(pending.as_ref().and_then(|p| match p {
                Pending::Present(record) => Some(record),
                Pending::Tombstoned => None,
            }))
            .map(|record| (record.clone(), record.attachment()))
            .collect();
        Slot {
            cached,
            pending,
            states,
        }
    }

    fn restore_slot(&self, key: &K, slot: Slot<V>) {
        let lock_id = self.lock_id(key);
        assert!(
            self.locks.is_locked_by_current_thread(lock_id),
            "access to unlocked record: table={},key={:?}",
            self.name,
            key
        );

        let mut replaced = Vec::with_capacity(2);
        {
            let mut cache = self.cache.lock();
            let previous = match &slot.cached {
                Some(record) => cache.put(key.clone(), record.clone()),
                None => cache.pop(key),
            };
            replaced.extend(previous);
        }
        if let Some(modified) = &self.modified {
            let mut modified = modified.lock();
            let previous = match &slot.pending {
                Some(pending) => modified.insert(key.clone(), pending.clone()),
                None => modified.remove(key),
            };
            replaced.extend(previous.and_then(Pending::into_record));
        }

        for record in replaced {
            if !slot.contains(&record) {
                record.detach();
            }
        }
        for (record, attachment) in &slot.states {
            record.restore(*attachment);
        }
        self.locks.increment_version(lock_id);
    }
}

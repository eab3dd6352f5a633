//! Draining write-back caches into storage.

use super::{Pending, Table, TableKey, TableValue};
use crate::error::CacheResult;
use crate::types::{LockId, SaveState};
use std::ops::AddAssign;
use tracing::warn;
use vellum_codec::{encode_value, KeyCodec};
use vellum_storage::StorageTable;

/// Outcome of flushing one or more write-back caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushCounts {
    /// Dirty records when the flush started.
    pub dirty_before: usize,
    /// Dirty records when the flush finished.
    pub dirty_after: usize,
    /// Records written to storage.
    pub flushed: usize,
    /// Records whose write failed; they stay dirty.
    pub errors: usize,
}

impl AddAssign for FlushCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.dirty_before += rhs.dirty_before;
        self.dirty_after += rhs.dirty_after;
        self.flushed += rhs.flushed;
        self.errors += rhs.errors;
    }
}

/// A table whose write-back cache the commit driver can drain.
pub trait Flushable: Send + Sync {
    /// Table name, for logs.
    fn name(&self) -> &str;

    /// Records waiting in the write-back cache.
    fn dirty_count(&self) -> usize;

    /// Flushes every dirty record whose stripe is free right now, skipping
    /// the rest. Never blocks on a stripe.
    fn try_flush(&self) -> FlushCounts;

    /// Flushes every dirty record, waiting for stripes as needed. Meant for
    /// when transactions are quiesced.
    fn flush_all(&self) -> FlushCounts;
}

impl<K: TableKey, V: TableValue> Table<K, V> {
    fn write_back(
        &self,
        storage: &dyn StorageTable,
        key: &K,
        pending: &Pending<V>,
    ) -> CacheResult<()> {
        let key_bytes = key.to_key_bytes();
        match pending {
            Pending::Present(record) => {
                let bytes = record.read(|value| encode_value(value))?;
                storage.put(&key_bytes, &bytes)?;
            }
            Pending::Tombstoned => storage.remove(&key_bytes)?,
        }
        Ok(())
    }

    /// Writes each dirty key at most once, under its stripe as provided by
    /// `lock`. Keys `lock` declines are left for the next pass.
    fn flush_with<G>(&self, mut lock: impl FnMut(LockId) -> Option<G>) -> FlushCounts {
        let (Some(storage), Some(modified)) = (&self.storage, &self.modified) else {
            return FlushCounts::default();
        };
        let keys: Vec<K> = modified.lock().keys().cloned().collect();
        let mut counts = FlushCounts {
            dirty_before: keys.len(),
            ..FlushCounts::default()
        };

        for key in keys {
            let lock_id = self.lock_id(&key);
            let Some(_guard) = lock(lock_id) else {
                continue;
            };
            let Some(pending) = modified.lock().get(&key).cloned() else {
                continue;
            };
            match self.write_back(storage.as_ref(), &key, &pending) {
                Ok(()) => {
                    modified.lock().remove(&key);
                    // Handles that left the read cache before this write are stale now.
                    let epoch = self.locks.advance_epoch(lock_id);
                    if let Pending::Present(record) = pending {
                        record.stamp(epoch);
                        record.set_state(SaveState::StoredClean);
                    }
                    counts.flushed += 1;
                }
                Err(e) => {
                    counts.errors += 1;
                    warn!(table = %self.name, key = ?key, error = %e, "failed to flush record, keeping it dirty");
                }
            }
        }

        counts.dirty_after = modified.lock().len();
        counts
    }
}

impl<K: TableKey, V: TableValue> Flushable for Table<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn dirty_count(&self) -> usize {
        Table::dirty_count(self)
    }

    fn try_flush(&self) -> FlushCounts {
        self.flush_with(|lock_id| self.locks.try_acquire(lock_id))
    }

    fn flush_all(&self) -> FlushCounts {
        self.flush_with(|lock_id| Some(self.locks.acquire(&[lock_id])))
    }
}

//! Model-checking harness.
//!
//! Applies operation sequences to a table inside transactions and mirrors
//! them on a reference map, then checks the cache, and optionally storage,
//! against the model.

use crate::fixtures::Player;
use crate::generators::CacheOp;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use vellum_codec::{decode_value, KeyCodec};
use vellum_core::{CacheManager, CacheResult, LockId, Procedure, Table};
use vellum_storage::StorageTable;

/// Tracks the expected contents of one table.
#[derive(Debug, Default)]
pub struct ModelHarness {
    model: BTreeMap<u64, Player>,
}

impl ModelHarness {
    /// Creates a harness expecting an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The expected contents.
    pub fn expected(&self) -> &BTreeMap<u64, Player> {
        &self.model
    }

    /// Runs `ops` in one transaction, committing if `commit` is set and
    /// rolling back otherwise. The model changes only on commit.
    pub fn apply(
        &mut self,
        cache: &CacheManager,
        table: &Arc<Table<u64, Player>>,
        ops: &[CacheOp],
        commit: bool,
    ) -> CacheResult<()> {
        let keys: BTreeSet<u64> = ops.iter().map(CacheOp::key).collect();
        let lock_ids: Vec<LockId> = keys.iter().map(|k| table.lock_id(k)).collect();

        let proc = cache.begin(&lock_ids)?;
        let mut staged = self.model.clone();
        for op in ops {
            apply_op(&proc, table, op)?;
            apply_model(&mut staged, op);
        }
        if commit {
            proc.commit()?;
            self.model = staged;
        } else {
            proc.rollback();
        }
        Ok(())
    }

    /// Checks every key in `keys` through the cache.
    ///
    /// # Panics
    ///
    /// Panics on the first mismatch.
    pub fn verify_cache(
        &self,
        cache: &CacheManager,
        table: &Arc<Table<u64, Player>>,
        keys: impl IntoIterator<Item = u64>,
    ) {
        for key in keys {
            let actual = cache
                .run(&[table.lock_id(&key)], |proc| {
                    Ok(table.get(proc.locks(), &key)?.map(|r| r.get()))
                })
                .expect("Failed to read through cache");
            assert_eq!(actual.as_ref(), self.model.get(&key), "cache mismatch for key {key}");
        }
    }

    /// Checks that `storage` holds exactly the model.
    ///
    /// # Panics
    ///
    /// Panics on the first mismatch.
    pub fn verify_storage(&self, storage: &dyn StorageTable) {
        let mut stored = BTreeMap::new();
        let mut keys = Vec::new();
        storage
            .walk(vellum_storage::WalkBounds::all(), &mut |k| {
                keys.push(k.to_vec());
                true
            })
            .expect("Failed to walk storage");
        for key in keys {
            let value = storage
                .get(&key)
                .expect("Failed to read storage")
                .expect("Walked key vanished");
            stored.insert(
                u64::decode_key(&key).expect("Undecodable key"),
                decode_value::<Player>(&value).expect("Undecodable value"),
            );
        }
        assert_eq!(stored, self.model, "storage does not match model");
    }
}

fn apply_op(proc: &Procedure<'_>, table: &Arc<Table<u64, Player>>, op: &CacheOp) -> CacheResult<()> {
    match *op {
        CacheOp::Put(key, gold) => table.put_safe(proc, key, Player::new("p", gold)).map(drop),
        CacheOp::Credit(key, amount) => {
            if let Some(player) = table.get_safe(proc, &key)? {
                player.update(|p| p.gold += amount);
            }
            Ok(())
        }
        CacheOp::Remove(key) => table.remove_safe(proc, &key),
    }
}

fn apply_model(model: &mut BTreeMap<u64, Player>, op: &CacheOp) {
    match *op {
        CacheOp::Put(key, gold) => {
            model.insert(key, Player::new("p", gold));
        }
        CacheOp::Credit(key, amount) => {
            if let Some(player) = model.get_mut(&key) {
                player.gold += amount;
            }
        }
        CacheOp::Remove(key) => {
            model.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestCache;

    #[test]
    fn harness_tracks_commits_and_ignores_rollbacks() {
        let cache = TestCache::memory();
        let table = cache.players();
        let mut harness = ModelHarness::new();

        harness
            .apply(&cache, &table, &[CacheOp::Put(1, 5), CacheOp::Credit(1, 2)], true)
            .unwrap();
        harness
            .apply(&cache, &table, &[CacheOp::Remove(1), CacheOp::Put(2, 9)], false)
            .unwrap();

        assert_eq!(harness.expected().get(&1).map(|p| p.gold), Some(7));
        assert!(!harness.expected().contains_key(&2));
        harness.verify_cache(&cache, &table, 0..4);

        cache.checkpoint().unwrap();
        let storage = cache.memory_storage().unwrap().table("players").unwrap();
        harness.verify_storage(storage.as_ref());
    }
}

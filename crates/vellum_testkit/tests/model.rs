//! Property tests: random transaction sequences against a reference model.

use proptest::prelude::*;
use vellum_core::{Config, TableOptions};
use vellum_testkit::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cache_and_storage_follow_the_model(
        txns in prop::collection::vec(txn_strategy(), 1..20),
        flush_after in prop::collection::vec(any::<bool>(), 20),
    ) {
        let cache = TestCache::memory();
        let table = cache.players();
        let mut harness = ModelHarness::new();

        for (i, (ops, commit)) in txns.iter().enumerate() {
            harness.apply(&cache, &table, ops, *commit).unwrap();
            if flush_after[i] {
                cache.flush_pass();
            }
        }

        harness.verify_cache(&cache, &table, 0..8);
        let counts = cache.checkpoint().unwrap();
        prop_assert_eq!(counts.dirty_after, 0);
        let storage = cache.memory_storage().unwrap().table("players").unwrap();
        harness.verify_storage(storage.as_ref());
    }

    #[test]
    fn rolled_back_transactions_leave_no_trace(
        setup in prop::collection::vec(op_strategy(), 1..10),
        aborted in prop::collection::vec(op_strategy(), 1..10),
    ) {
        let cache = TestCache::memory();
        let table = cache.players();
        let mut harness = ModelHarness::new();
        harness.apply(&cache, &table, &setup, true).unwrap();
        let dirty = cache.dirty_count();
        let puts = cache.stats().puts;

        harness.apply(&cache, &table, &aborted, false).unwrap();
        prop_assert_eq!(cache.dirty_count(), dirty);
        harness.verify_cache(&cache, &table, 0..8);
        prop_assert!(cache.stats().puts >= puts);
    }

    #[test]
    fn players_survive_a_file_round_trip(player in player_strategy(), key in key_strategy()) {
        let cache = TestCache::file();
        let table = cache.players();
        let stored = player.clone();
        cache
            .run(&[table.lock_id(&key)], |proc| table.put_safe(proc, key, stored.clone()))
            .unwrap();
        drop(table);

        let cache = cache.reopen();
        let table = cache.players();
        let loaded = cache
            .run(&[table.lock_id(&key)], |proc| Ok(table.get(proc.locks(), &key)?.map(|r| r.get())))
            .unwrap();
        prop_assert_eq!(loaded, Some(player));
    }
}

#[test]
fn lock_names_share_stripes_across_tables() {
    let cache = TestCache::memory_with(Config::manual());
    let a = cache
        .open_table::<u64, Player>(TableOptions::new(10, "bags").lock_name("owner"))
        .unwrap();
    let b = cache
        .open_table::<u64, Player>(TableOptions::new(11, "wallets").lock_name("owner"))
        .unwrap();
    let c = cache
        .open_table::<u64, Player>(TableOptions::new(12, "mail"))
        .unwrap();

    for key in 0..32u64 {
        assert_eq!(a.lock_id(&key), b.lock_id(&key));
    }
    assert!((0..32u64).any(|key| a.lock_id(&key) != c.lock_id(&key)));

    cache
        .run(&[a.lock_id(&1)], |proc| {
            a.put_safe(proc, 1, Player::new("bag", 0))?;
            b.put_safe(proc, 1, Player::new("wallet", 5))
        })
        .unwrap();
    assert_eq!(cache.dirty_count(), 2);
}

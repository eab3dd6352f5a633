//! Benchmark utilities.

use rand::Rng;
use std::sync::Arc;
use vellum_core::{CacheManager, Config, Table, TableOptions};

/// Generate random payload bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` random keys below `range`.
pub fn random_keys(count: usize, range: u64) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..range)).collect()
}

/// An in-memory cache with manual commit and a single table of `cache_size`
/// read-cache slots.
pub fn bench_cache(cache_size: usize) -> (CacheManager, Arc<Table<u64, Vec<u8>>>) {
    let cache = CacheManager::in_memory(Config::manual().lock_stripes(1024))
        .expect("Failed to open cache");
    let table = cache
        .open_table::<u64, Vec<u8>>(TableOptions::new(1, "bench").cache_size(cache_size))
        .expect("Failed to open table");
    (cache, table)
}

/// Writes `count` records of `size` bytes under keys `0..count`.
pub fn populate(cache: &CacheManager, table: &Arc<Table<u64, Vec<u8>>>, count: u64, size: usize) {
    let data = random_data(size);
    for key in 0..count {
        cache
            .run(&[table.lock_id(&key)], |proc| table.put_safe(proc, key, data.clone()))
            .expect("Failed to populate");
    }
}

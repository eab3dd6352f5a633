//! Test fixtures and cache helpers.
//!
//! Provides caches over in-memory or temporary file storage, and a small
//! record type to store in them.

use crate::faults::FaultyStorage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;
use vellum_core::{CacheManager, Config, Table, TableOptions};
use vellum_storage::{FileStorage, MemoryStorage, Storage};

/// Table id used by [`TestCache::players`].
pub const PLAYERS_TABLE: u32 = 1;

/// A sample game record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Display name.
    pub name: String,
    /// Currency balance.
    pub gold: u64,
    /// Inventory item ids.
    pub items: Vec<u32>,
}

impl Player {
    /// Creates a player with an empty inventory.
    pub fn new(name: &str, gold: u64) -> Self {
        Self {
            name: name.to_string(),
            gold,
            items: Vec::new(),
        }
    }
}

/// Projects a player's balance, for [`Safe::field`](vellum_core::Safe::field).
pub fn gold(player: &mut Player) -> &mut u64 {
    &mut player.gold
}

/// A cache with automatic cleanup of its storage.
pub struct TestCache {
    /// The cache instance.
    pub cache: CacheManager,
    memory: Option<Arc<MemoryStorage>>,
    faulty: Option<Arc<FaultyStorage>>,
    _temp_dir: Option<TempDir>,
}

impl TestCache {
    /// A cache over in-memory storage with background passes disabled.
    pub fn memory() -> Self {
        Self::memory_with(Config::manual())
    }

    /// A cache over in-memory storage.
    pub fn memory_with(config: Config) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let cache = CacheManager::open(config, Arc::clone(&storage) as Arc<dyn Storage>)
            .expect("Failed to open memory cache");
        Self {
            cache,
            memory: Some(storage),
            faulty: None,
            _temp_dir: None,
        }
    }

    /// A cache over storage whose writes can be made to fail.
    pub fn faulty() -> Self {
        let storage = Arc::new(FaultyStorage::new());
        let cache = CacheManager::open(Config::manual(), Arc::clone(&storage) as Arc<dyn Storage>)
            .expect("Failed to open faulty cache");
        Self {
            cache,
            memory: None,
            faulty: Some(storage),
            _temp_dir: None,
        }
    }

    /// A cache over file storage in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = FileStorage::open(temp_dir.path()).expect("Failed to open file storage");
        let cache = CacheManager::open(Config::manual(), Arc::new(storage))
            .expect("Failed to open file cache");
        Self {
            cache,
            memory: None,
            faulty: None,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Shuts the cache down and reopens it over the same directory.
    ///
    /// # Panics
    ///
    /// Panics if this is not a file-backed cache.
    pub fn reopen(self) -> Self {
        let Self {
            cache, _temp_dir, ..
        } = self;
        let temp_dir = _temp_dir.expect("Only file caches can be reopened");
        cache.shutdown().expect("Failed to shut down cache");
        drop(cache);
        let storage = FileStorage::open(temp_dir.path()).expect("Failed to reopen file storage");
        let cache = CacheManager::open(Config::manual(), Arc::new(storage))
            .expect("Failed to reopen file cache");
        Self {
            cache,
            memory: None,
            faulty: None,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Opens the `players` table (id [`PLAYERS_TABLE`], cache size 2).
    pub fn players(&self) -> Arc<Table<u64, Player>> {
        self.cache
            .open_table(TableOptions::new(PLAYERS_TABLE, "players").cache_size(2))
            .expect("Failed to open players table")
    }

    /// The in-memory storage, if this cache uses one.
    pub fn memory_storage(&self) -> Option<&Arc<MemoryStorage>> {
        self.memory.as_ref()
    }

    /// The fault-injecting storage, if this cache uses one.
    pub fn faulty_storage(&self) -> Option<&Arc<FaultyStorage>> {
        self.faulty.as_ref()
    }
}

impl std::ops::Deref for TestCache {
    type Target = CacheManager;

    fn deref(&self) -> &Self::Target {
        &self.cache
    }
}

/// Runs a test with a temporary in-memory cache.
pub fn with_test_cache<F, R>(f: F) -> R
where
    F: FnOnce(&TestCache) -> R,
{
    let cache = TestCache::memory();
    f(&cache)
}

/// Runs a test with a temporary file-backed cache.
pub fn with_file_cache<F, R>(f: F) -> R
where
    F: FnOnce(&TestCache) -> R,
{
    let cache = TestCache::file();
    f(&cache)
}

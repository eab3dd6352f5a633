//! # Vellum Core
//!
//! Transactional write-back record cache for game-server persistence.
//!
//! This crate provides:
//! - A stripe [`LockManager`] with per-stripe version counters
//! - Per-table caches: a bounded read cache in front of an unbounded
//!   write-back cache of dirty records and tombstones
//! - Transactions ([`Procedure`]) with undo-tracked [`Safe`] wrappers,
//!   commit callbacks, and rollback actions
//! - A background commit driver draining write-back caches into storage
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vellum_core::{CacheManager, Config, TableOptions};
//! use vellum_storage::MemoryStorage;
//!
//! let cache = CacheManager::open(Config::manual(), Arc::new(MemoryStorage::new())).unwrap();
//! let gold = cache.open_table::<u64, u64>(TableOptions::new(1, "gold")).unwrap();
//!
//! let player = 42;
//! cache
//!     .run(&[gold.lock_id(&player)], |proc| {
//!         match gold.get_safe(proc, &player)? {
//!             Some(balance) => balance.update(|g| *g += 10),
//!             None => {
//!                 gold.put_safe(proc, player, 10)?;
//!             }
//!         }
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let pass = cache.flush_pass();
//! assert_eq!(pass.flushed, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commit;
mod config;
mod error;
mod lock;
mod manager;
mod record;
mod stats;
mod table;
mod txn;
mod types;

pub use config::Config;
pub use error::{CacheError, CacheResult};
pub use lock::{lock_id, lock_seed, LockManager, LockSet, StripeGuard};
pub use manager::CacheManager;
pub use record::Record;
pub use stats::{CacheStats, StatsSnapshot};
pub use table::{FlushCounts, Flushable, Table, TableKey, TableOptions, TableValue};
pub use txn::{in_procedure, Procedure, Safe, SafeField, TxnContext, TxnState};
pub use types::{LockId, SaveState, TableId};

// Re-export for convenience
pub use vellum_codec::KeyCodec;
pub use vellum_storage::{FileStorage, MemoryStorage, Storage};

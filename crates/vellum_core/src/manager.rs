//! The cache manager: table registry, transaction entry points, and
//! lifecycle.

use crate::commit::{CommitDriver, FlushSet};
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use crate::lock::LockManager;
use crate::stats::{CacheStats, StatsSnapshot};
use crate::table::{FlushCounts, Flushable, Table, TableKey, TableOptions, TableValue};
use crate::txn::{in_procedure, Procedure, TxnContext};
use crate::types::{LockId, TableId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vellum_storage::Storage;

#[derive(Default)]
struct Registry {
    ids: HashSet<TableId>,
    names: HashSet<String>,
}

/// Owns the lock manager, the tables, and the commit driver.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use vellum_core::{CacheManager, Config, TableOptions};
/// use vellum_storage::MemoryStorage;
///
/// let cache = CacheManager::open(Config::manual(), Arc::new(MemoryStorage::new())).unwrap();
/// let scores = cache.open_table::<u64, i64>(TableOptions::new(1, "scores")).unwrap();
///
/// let key = 7;
/// cache
///     .run(&[scores.lock_id(&key)], |proc| {
///         scores.put_safe(proc, key, 100)?;
///         Ok(())
///     })
///     .unwrap();
///
/// let flushed = cache.checkpoint().unwrap();
/// assert_eq!(flushed.flushed, 1);
/// ```
pub struct CacheManager {
    config: Config,
    locks: Arc<LockManager>,
    storage: Option<Arc<dyn Storage>>,
    flush: Arc<FlushSet>,
    stats: Arc<CacheStats>,
    mod_count: Arc<AtomicU64>,
    registry: Mutex<Registry>,
    gate: RwLock<()>,
    closed: AtomicBool,
    driver: Mutex<Option<CommitDriver>>,
}

impl CacheManager {
    /// Opens a cache over `storage` and starts the commit driver.
    ///
    /// The driver is not started if `config` disables both periodic and
    /// threshold-triggered passes.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver thread cannot be spawned.
    pub fn open(config: Config, storage: Arc<dyn Storage>) -> CacheResult<Self> {
        let manager = Self::build(config, Some(storage));
        let wants_driver =
            !manager.config.commit_period.is_zero() || manager.config.commit_mod_threshold > 0;
        if wants_driver {
            let driver = CommitDriver::spawn(Arc::clone(&manager.flush), manager.config.commit_period)?;
            *manager.driver.lock() = Some(driver);
        }
        info!(
            stripes = manager.locks.stripe_count(),
            period_ms = manager.config.commit_period.as_millis() as u64,
            "cache opened"
        );
        Ok(manager)
    }

    /// Opens a cache without storage. Only memory-only tables can be opened.
    ///
    /// # Errors
    ///
    /// Currently infallible; returns `Result` to match [`open`](Self::open).
    pub fn in_memory(config: Config) -> CacheResult<Self> {
        Ok(Self::build(config, None))
    }

    fn build(config: Config, storage: Option<Arc<dyn Storage>>) -> Self {
        let stats = Arc::new(CacheStats::new());
        let mod_count = Arc::new(AtomicU64::new(0));
        let flush = Arc::new(FlushSet::new(
            storage.clone(),
            Arc::clone(&stats),
            Arc::clone(&mod_count),
        ));
        Self {
            locks: Arc::new(LockManager::new(config.lock_stripes)),
            config,
            storage,
            flush,
            stats,
            mod_count,
            registry: Mutex::new(Registry::default()),
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
            driver: Mutex::new(None),
        }
    }

    /// Opens a table.
    ///
    /// # Errors
    ///
    /// - `TableExists` if the id or name is taken
    /// - `InvalidOperation` if a persistent table is requested without storage
    /// - `Closed` after shutdown
    /// - storage errors from opening the keyspace
    pub fn open_table<K: TableKey, V: TableValue>(
        &self,
        options: TableOptions,
    ) -> CacheResult<Arc<Table<K, V>>> {
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        let mut registry = self.registry.lock();
        if registry.ids.contains(&options.id) {
            return Err(CacheError::TableExists {
                name: options.id.to_string(),
            });
        }
        if registry.names.contains(&options.name) {
            return Err(CacheError::TableExists { name: options.name });
        }

        let storage = if options.persistent {
            let Some(storage) = &self.storage else {
                return Err(CacheError::invalid_operation(format!(
                    "persistent table {} needs a storage engine",
                    options.name
                )));
            };
            Some(storage.open_table(&options.name)?)
        } else {
            None
        };

        let table = Arc::new(Table::new(
            &options,
            storage,
            Arc::clone(&self.locks),
            Arc::clone(&self.stats),
            Arc::clone(&self.mod_count),
            self.config.default_cache_size,
        ));
        if table.is_persistent() {
            self.flush.register(Arc::clone(&table) as Arc<dyn Flushable>);
        }
        registry.ids.insert(options.id);
        registry.names.insert(options.name.clone());

        info!(
            table = %options.name,
            id = %options.id,
            persistent = options.persistent,
            "opened table"
        );
        Ok(table)
    }

    /// Starts a procedure on the calling thread holding the stripes of
    /// `lock_ids`, blocking until they are free (or until
    /// [`Config::lock_timeout`] elapses, if set).
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the thread already runs a procedure
    /// - `Closed` after shutdown
    /// - `LockTimeout` if a stripe stays busy past the timeout
    pub fn begin(&self, lock_ids: &[LockId]) -> CacheResult<Procedure<'_>> {
        if in_procedure() {
            return Err(CacheError::invalid_operation(
                "a procedure is already running on this thread",
            ));
        }
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        let gate = self.gate.read();
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        let locks = match self.config.lock_timeout {
            Some(timeout) => self.locks.try_acquire_for(lock_ids, timeout)?,
            None => self.locks.acquire(lock_ids),
        };
        self.stats.record_transaction_start();
        Ok(Procedure::new(
            self,
            gate,
            locks,
            TxnContext::new(Arc::clone(&self.stats)),
        ))
    }

    /// Runs `f` as a transaction holding the stripes of `lock_ids`.
    ///
    /// `Ok` commits. `Err(Redo)` rolls back and runs `f` again from the
    /// start, up to [`Config::redo_limit`] times. Any other error rolls back
    /// and is returned. A panic in `f` rolls back and resumes unwinding.
    ///
    /// # Errors
    ///
    /// Returns errors from [`begin`](Self::begin), from `f`, from commit,
    /// or `RedoLimitExceeded`.
    pub fn run<T>(
        &self,
        lock_ids: &[LockId],
        mut f: impl FnMut(&mut Procedure<'_>) -> CacheResult<T>,
    ) -> CacheResult<T> {
        let mut attempts = 0;
        loop {
            let mut proc = self.begin(lock_ids)?;
            match panic::catch_unwind(AssertUnwindSafe(|| f(&mut proc))) {
                Ok(Ok(value)) => {
                    proc.commit()?;
                    return Ok(value);
                }
                Ok(Err(e)) if e.is_redo() => {
                    proc.rollback();
                    self.stats.record_redo();
                    attempts += 1;
                    if attempts > self.config.redo_limit {
                        warn!(attempts, "giving up on transaction after repeated redos");
                        return Err(CacheError::RedoLimitExceeded { attempts });
                    }
                    debug!(attempts, error = %e, "redoing transaction");
                }
                Ok(Err(e)) => {
                    proc.rollback();
                    return Err(e);
                }
                Err(payload) => {
                    proc.rollback();
                    panic::resume_unwind(payload);
                }
            }
        }
    }

    pub(crate) fn after_commit(&self) {
        let threshold = self.config.commit_mod_threshold;
        if threshold == 0 || self.mod_count.load(Ordering::Relaxed) < threshold {
            return;
        }
        if let Some(driver) = self.driver.lock().as_ref() {
            driver.trigger();
        }
    }

    /// Runs one concurrent commit pass on the calling thread.
    pub fn flush_pass(&self) -> FlushCounts {
        self.flush.concurrent_pass()
    }

    /// Waits for running procedures to finish, flushes every dirty record,
    /// and syncs storage. New procedures wait until it returns.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` when called from inside a procedure
    /// - `FlushIncomplete` if some records failed to flush
    /// - storage errors from the sync
    pub fn checkpoint(&self) -> CacheResult<FlushCounts> {
        if in_procedure() {
            return Err(CacheError::invalid_operation(
                "checkpoint cannot run inside a procedure",
            ));
        }
        let _quiesced = self.gate.write();
        let counts = self.flush.full_flush();
        self.flush.sync()?;
        if counts.dirty_after > 0 {
            return Err(CacheError::FlushIncomplete {
                remaining: counts.dirty_after,
            });
        }
        Ok(counts)
    }

    /// Stops the commit driver, waits for running procedures, flushes
    /// everything, and refuses further procedures with `Closed`.
    ///
    /// Calling it again does nothing.
    ///
    /// # Errors
    ///
    /// Same as [`checkpoint`](Self::checkpoint). The manager is closed
    /// even if the final flush is incomplete.
    pub fn shutdown(&self) -> CacheResult<FlushCounts> {
        if in_procedure() {
            return Err(CacheError::invalid_operation(
                "shutdown cannot run inside a procedure",
            ));
        }
        let driver = self.driver.lock().take();
        if let Some(mut driver) = driver {
            driver.stop();
        }

        let _quiesced = self.gate.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(FlushCounts::default());
        }
        let counts = self.flush.full_flush();
        self.flush.sync()?;
        if counts.dirty_after > 0 {
            error!(remaining = counts.dirty_after, "records still dirty at shutdown");
            return Err(CacheError::FlushIncomplete {
                remaining: counts.dirty_after,
            });
        }
        info!(flushed = counts.flushed, "cache shut down");
        Ok(counts)
    }

    /// Returns `true` after [`shutdown`](Self::shutdown).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A snapshot of the cache counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The stripe lock manager.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// The configuration the cache was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dirty records across every persistent table.
    pub fn dirty_count(&self) -> usize {
        self.flush.dirty_count()
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "shutdown on drop failed");
        }
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("locks", &self.locks)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

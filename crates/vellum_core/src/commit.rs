//! Background commit driver.
//!
//! A dedicated thread wakes every [`Config::commit_period`](crate::Config)
//! (or when triggered early) and runs a *concurrent pass*: every persistent
//! table flushes the dirty records whose stripes are free, skipping the
//! rest. A *full flush* waits for every stripe instead and is only run with
//! transactions quiesced, at checkpoint and shutdown.

use crate::stats::CacheStats;
use crate::table::{FlushCounts, Flushable};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vellum_storage::Storage;

/// Every flushable table, plus the storage they flush into.
pub(crate) struct FlushSet {
    tables: RwLock<Vec<Arc<dyn Flushable>>>,
    storage: Option<Arc<dyn Storage>>,
    stats: Arc<CacheStats>,
    mod_count: Arc<AtomicU64>,
    pass: Mutex<()>,
}

impl FlushSet {
    pub(crate) fn new(
        storage: Option<Arc<dyn Storage>>,
        stats: Arc<CacheStats>,
        mod_count: Arc<AtomicU64>,
    ) -> Self {
        Self {
            tables: RwLock::new(Vec::new()),
            storage,
            stats,
            mod_count,
            pass: Mutex::new(()),
        }
    }

    pub(crate) fn register(&self, table: Arc<dyn Flushable>) {
        self.tables.write().push(table);
    }

    pub(crate) fn dirty_count(&self) -> usize {
        self.tables.read().iter().map(|t| t.dirty_count()).sum()
    }

    /// Flushes what can be flushed without waiting on any stripe.
    pub(crate) fn concurrent_pass(&self) -> FlushCounts {
        self.run("concurrent", |table| table.try_flush())
    }

    /// Flushes everything, waiting on stripes as needed.
    pub(crate) fn full_flush(&self) -> FlushCounts {
        self.run("full", |table| table.flush_all())
    }

    fn run(&self, mode: &'static str, flush: impl Fn(&dyn Flushable) -> FlushCounts) -> FlushCounts {
        let _pass = self.pass.lock();
        self.mod_count.store(0, Ordering::Relaxed);
        let tables = self.tables.read().clone();

        let mut total = FlushCounts::default();
        for table in &tables {
            let counts = flush(table.as_ref());
            if counts.dirty_before > 0 {
                debug!(
                    table = table.name(),
                    flushed = counts.flushed,
                    remaining = counts.dirty_after,
                    errors = counts.errors,
                    "flushed table"
                );
            }
            total += counts;
        }

        if total.flushed > 0 {
            if let Some(storage) = &self.storage {
                if let Err(e) = storage.flush() {
                    total.errors += 1;
                    warn!(error = %e, "storage flush failed after commit pass");
                }
            }
        }

        // Records left behind still count toward the next early pass.
        self.mod_count
            .fetch_add(total.dirty_after as u64, Ordering::Relaxed);
        self.stats.record_flush_pass(&total);
        if total.dirty_before > 0 {
            info!(
                mode,
                dirty_before = total.dirty_before,
                flushed = total.flushed,
                dirty_after = total.dirty_after,
                errors = total.errors,
                "commit pass finished"
            );
        }
        total
    }

    /// Makes flushed data durable.
    pub(crate) fn sync(&self) -> crate::error::CacheResult<()> {
        if let Some(storage) = &self.storage {
            storage.sync()?;
        }
        Ok(())
    }
}

enum DriverMsg {
    Flush,
    Stop,
}

/// The thread running periodic concurrent passes.
pub(crate) struct CommitDriver {
    tx: Sender<DriverMsg>,
    triggered: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CommitDriver {
    /// Starts the driver. A zero `period` runs passes only when triggered.
    pub(crate) fn spawn(flush: Arc<FlushSet>, period: Duration) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let triggered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&triggered);

        let handle = thread::Builder::new()
            .name("vellum-commit".into())
            .spawn(move || {
                debug!(period_ms = period.as_millis() as u64, "commit driver started");
                loop {
                    let msg = if period.is_zero() {
                        rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
                    } else {
                        rx.recv_timeout(period)
                    };
                    match msg {
                        Ok(DriverMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Ok(DriverMsg::Flush) | Err(RecvTimeoutError::Timeout) => {}
                    }
                    flag.store(false, Ordering::Release);
                    if panic::catch_unwind(AssertUnwindSafe(|| flush.concurrent_pass())).is_err() {
                        error!("commit pass panicked; will retry next period");
                    }
                }
                debug!("commit driver stopped");
            })?;

        Ok(Self {
            tx,
            triggered,
            handle: Some(handle),
        })
    }

    /// Requests an early pass. Requests made before the pass starts
    /// coalesce into one.
    pub(crate) fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(DriverMsg::Flush);
        }
    }

    /// Stops the thread and waits for the current pass to finish.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(DriverMsg::Stop);
        if handle.join().is_err() {
            error!("commit driver thread panicked");
        }
    }
}

impl Drop for CommitDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

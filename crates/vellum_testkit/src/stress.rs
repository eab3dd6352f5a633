//! Stress helpers.
//!
//! Runs random gold transfers between players from several threads while
//! another thread keeps running concurrent commit passes. Transfers conserve
//! the total, which makes lost or doubled updates easy to detect.

use crate::fixtures::Player;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use vellum_core::{CacheError, CacheManager, CacheResult, Table};

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Worker threads.
    pub threads: usize,
    /// Transfers attempted per thread.
    pub transfers_per_thread: usize,
    /// Number of player records.
    pub accounts: u64,
    /// Starting balance of each player.
    pub initial_gold: u64,
    /// Base seed; each thread adds its index.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transfers_per_thread: 500,
            accounts: 16,
            initial_gold: 100,
            seed: 0x5eed,
        }
    }
}

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Transfers committed.
    pub committed: usize,
    /// Transfers rolled back for lack of funds.
    pub aborted: usize,
    /// Transfers that failed for any other reason.
    pub failed: usize,
    /// Concurrent commit passes run alongside.
    pub flush_passes: usize,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl StressResult {
    /// Committed transfers per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.committed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Creates `config.accounts` players holding `config.initial_gold` each.
pub fn seed_accounts(
    cache: &CacheManager,
    table: &Arc<Table<u64, Player>>,
    config: &StressConfig,
) -> CacheResult<()> {
    for id in 0..config.accounts {
        cache.run(&[table.lock_id(&id)], |proc| {
            table.put_safe(proc, id, Player::new(&format!("p{id}"), config.initial_gold))
        })?;
    }
    Ok(())
}

/// Sums every player's balance.
pub fn total_gold(
    cache: &CacheManager,
    table: &Arc<Table<u64, Player>>,
    accounts: u64,
) -> CacheResult<u64> {
    let ids: Vec<_> = (0..accounts).map(|id| table.lock_id(&id)).collect();
    cache.run(&ids, |proc| {
        let mut total = 0;
        for id in 0..accounts {
            if let Some(player) = table.get(proc.locks(), &id)? {
                total += player.read(|p| p.gold);
            }
        }
        Ok(total)
    })
}

fn transfer(
    cache: &CacheManager,
    table: &Arc<Table<u64, Player>>,
    from: u64,
    to: u64,
    amount: u64,
) -> CacheResult<()> {
    cache.run(&[table.lock_id(&from), table.lock_id(&to)], |proc| {
        let (Some(payer), Some(payee)) = (table.get_safe(proc, &from)?, table.get_safe(proc, &to)?)
        else {
            return Err(CacheError::aborted("missing account"));
        };
        if payer.read(|p| p.gold) < amount {
            return Err(CacheError::aborted("insufficient gold"));
        }
        payer.update(|p| p.gold -= amount);
        payee.update(|p| p.gold += amount);
        Ok(())
    })
}

/// Runs random transfers from `config.threads` threads with concurrent
/// commit passes in the background.
pub fn stress_transfers(
    cache: &CacheManager,
    table: &Arc<Table<u64, Player>>,
    config: &StressConfig,
) -> StressResult {
    let committed = AtomicUsize::new(0);
    let aborted = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let passes = AtomicUsize::new(0);
    let done = AtomicBool::new(false);

    let start = Instant::now();
    thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                cache.flush_pass();
                passes.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(1));
            }
        });

        let workers: Vec<_> = (0..config.threads)
            .map(|index| {
                let (committed, aborted, failed) = (&committed, &aborted, &failed);
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(config.seed + index as u64);
                    for _ in 0..config.transfers_per_thread {
                        let from = rng.gen_range(0..config.accounts);
                        let to = (from + rng.gen_range(1..config.accounts)) % config.accounts;
                        let amount = rng.gen_range(1..=config.initial_gold / 2);
                        match transfer(cache, table, from, to, amount) {
                            Ok(()) => committed.fetch_add(1, Ordering::Relaxed),
                            Err(CacheError::Aborted { .. }) => aborted.fetch_add(1, Ordering::Relaxed),
                            Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                        };
                    }
                })
            })
            .collect();
        for worker in workers {
            let _ = worker.join();
        }
        done.store(true, Ordering::Release);
    });

    let result = StressResult {
        committed: committed.into_inner(),
        aborted: aborted.into_inner(),
        failed: failed.into_inner(),
        flush_passes: passes.into_inner(),
        duration: start.elapsed(),
    };
    info!(
        committed = result.committed,
        aborted = result.aborted,
        failed = result.failed,
        passes = result.flush_passes,
        elapsed = ?result.duration,
        "stress run finished"
    );
    result
}

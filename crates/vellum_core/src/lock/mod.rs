//! Stripe lock manager.
//!
//! Every record maps to one of a fixed pool of stripe locks through its
//! [`LockId`]. A transaction declares the lock ids it needs up front and
//! acquires them together with [`LockManager::acquire`]; stripes are taken in
//! ascending index order, so two transactions locking overlapping sets can
//! never deadlock.
//!
//! Possession of the resulting [`LockSet`] is what allows table operations
//! on the covered records. The background commit driver uses
//! [`LockManager::try_acquire`] instead and never waits.
//!
//! Each stripe also carries a version counter, bumped on every mutation made
//! under it, which [`LockManager::relock`] uses to detect that a stripe
//! changed while it was released.

mod pool;

use crate::error::{CacheError, CacheResult};
use crate::types::{LockId, TableId};
use parking_lot::MutexGuard;
use pool::Stripe;
use std::collections::BTreeSet;
use std::time::Duration;
use xxhash_rust::xxh3::xxh3_64;

/// Multiplier spreading the lock seed (32-bit golden ratio).
const GOLDEN_RATIO: u32 = 0x9E37_79B1;

/// Computes a table's lock seed from its lock name.
///
/// Tables sharing a lock name share stripes for equal keys. An empty name
/// falls back to the table id.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn lock_seed(lock_name: &str, table: TableId) -> u32 {
    let base = if lock_name.is_empty() {
        table.0
    } else {
        xxh3_64(lock_name.as_bytes()) as u32
    };
    base.wrapping_mul(GOLDEN_RATIO)
}

/// Combines a lock seed with an encoded key.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn lock_id(seed: u32, key: &[u8]) -> LockId {
    LockId(seed ^ xxh3_64(key) as u32)
}

/// A fixed pool of stripe locks with per-stripe versions.
pub struct LockManager {
    stripes: Box<[Stripe]>,
    mask: usize,
}

/// One held stripe. Releases the stripe when dropped.
pub struct StripeGuard<'a> {
    stripe: &'a Stripe,
    index: usize,
    _guard: MutexGuard<'a, ()>,
}

impl StripeGuard<'_> {
    /// Index of the held stripe.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for StripeGuard<'_> {
    fn drop(&mut self) {
        // `_guard` unlocks after this body returns.
        self.stripe.release_owner();
    }
}

/// A set of stripes held by the current thread, in ascending index order.
///
/// Table operations take a `&LockSet` and verify that it covers the record
/// they touch. The set is not `Send`: stripes are released on the thread
/// that acquired them.
pub struct LockSet<'a> {
    manager: &'a LockManager,
    guards: Vec<StripeGuard<'a>>,
}

impl<'a> LockSet<'a> {
    /// Returns `true` if this set holds the stripe guarding `lock_id`.
    #[must_use]
    pub fn holds(&self, lock_id: LockId) -> bool {
        let index = self.manager.stripe_index(lock_id);
        self.guards
            .binary_search_by_key(&index, StripeGuard::index)
            .is_ok()
    }

    /// Returns `true` if the set was acquired from `manager`.
    #[must_use]
    pub fn belongs_to(&self, manager: &LockManager) -> bool {
        std::ptr::eq(self.manager, manager)
    }

    /// Indices of the held stripes, ascending.
    pub fn stripes(&self) -> impl Iterator<Item = usize> + '_ {
        self.guards.iter().map(StripeGuard::index)
    }

    /// Number of stripes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Returns `true` if no stripe is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub(crate) fn manager(&self) -> &'a LockManager {
        self.manager
    }
}

impl std::fmt::Debug for LockSet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stripes()).finish()
    }
}

impl LockManager {
    /// Creates a manager with `stripes` locks, rounded up to a power of two.
    #[must_use]
    pub fn new(stripes: usize) -> Self {
        let stripes = pool::allocate(stripes);
        let mask = stripes.len() - 1;
        Self { stripes, mask }
    }

    /// Number of stripes.
    #[must_use]
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Maps a lock id to its stripe index.
    #[must_use]
    pub fn stripe_index(&self, lock_id: LockId) -> usize {
        lock_id.0 as usize & self.mask
    }

    fn sorted_indices(&self, lock_ids: &[LockId]) -> BTreeSet<usize> {
        let indices: BTreeSet<usize> = lock_ids.iter().map(|&id| self.stripe_index(id)).collect();
        for &index in &indices {
            assert!(
                !self.stripes[index].is_owned_by_current_thread(),
                "stripe {index} is already held by the current thread"
            );
        }
        indices
    }

    /// Returns an empty lock set.
    #[must_use]
    pub fn empty(&self) -> LockSet<'_> {
        LockSet {
            manager: self,
            guards: Vec::new(),
        }
    }

    /// Acquires the stripes of all `lock_ids`, blocking until every one is
    /// free.
    ///
    /// # Panics
    ///
    /// Panics if the current thread already holds one of the stripes.
    pub fn acquire(&self, lock_ids: &[LockId]) -> LockSet<'_> {
        let guards = self
            .sorted_indices(lock_ids)
            .into_iter()
            .map(|index| {
                let stripe = &self.stripes[index];
                StripeGuard {
                    _guard: stripe.lock(),
                    stripe,
                    index,
                }
            })
            .collect();
        LockSet {
            manager: self,
            guards,
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout` per
    /// stripe.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if a stripe stays busy; stripes already taken
    /// are released.
    ///
    /// # Panics
    ///
    /// Panics if the current thread already holds one of the stripes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn try_acquire_for(
        &self,
        lock_ids: &[LockId],
        timeout: Duration,
    ) -> CacheResult<LockSet<'_>> {
        let indices = self.sorted_indices(lock_ids);
        let mut guards = Vec::with_capacity(indices.len());
        for index in indices {
            let stripe = &self.stripes[index];
            match stripe.try_lock_for(timeout) {
                Some(guard) => guards.push(StripeGuard {
                    _guard: guard,
                    stripe,
                    index,
                }),
                None => {
                    return Err(CacheError::LockTimeout {
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }
        Ok(LockSet {
            manager: self,
            guards,
        })
    }

    /// Takes the stripe guarding `lock_id` if it is free right now.
    ///
    /// Never blocks. Returns `None` if any thread, including the current
    /// one, holds the stripe.
    pub fn try_acquire(&self, lock_id: LockId) -> Option<StripeGuard<'_>> {
        let index = self.stripe_index(lock_id);
        let stripe = &self.stripes[index];
        let guard = stripe.try_lock()?;
        Some(StripeGuard {
            stripe,
            index,
            _guard: guard,
        })
    }

    /// Releases `held` and acquires the stripes of `lock_ids`.
    ///
    /// Returns the new set and, if a stripe held both before and after
    /// changed version while released, that stripe's index.
    ///
    /// # Panics
    ///
    /// Panics if the current thread holds one of the stripes through
    /// another set.
    pub fn relock<'a>(
        &'a self,
        held: LockSet<'a>,
        lock_ids: &[LockId],
    ) -> (LockSet<'a>, Option<usize>) {
        let before = self.versions(&held);
        drop(held);
        let locks = self.acquire(lock_ids);
        let changed = self.first_changed(&before, &locks);
        (locks, changed)
    }

    fn versions(&self, held: &LockSet<'_>) -> Vec<(usize, u64)> {
        held.stripes()
            .map(|index| (index, self.stripes[index].version()))
            .collect()
    }

    fn first_changed(&self, before: &[(usize, u64)], now: &LockSet<'_>) -> Option<usize> {
        before
            .iter()
            .find(|&&(index, version)| {
                now.guards
                    .binary_search_by_key(&index, StripeGuard::index)
                    .is_ok()
                    && self.stripes[index].version() != version
            })
            .map(|&(index, _)| index)
    }

    /// Returns `true` if the calling thread holds the stripe of `lock_id`.
    #[must_use]
    pub fn is_locked_by_current_thread(&self, lock_id: LockId) -> bool {
        self.stripes[self.stripe_index(lock_id)].is_owned_by_current_thread()
    }

    /// Bumps the version of the stripe guarding `lock_id`, returning the
    /// new version.
    pub fn increment_version(&self, lock_id: LockId) -> u64 {
        self.stripes[self.stripe_index(lock_id)].increment_version()
    }

    /// Current version of the stripe guarding `lock_id`.
    #[must_use]
    pub fn version(&self, lock_id: LockId) -> u64 {
        self.stripes[self.stripe_index(lock_id)].version()
    }

    /// Write-back epoch of the stripe guarding `lock_id`.
    ///
    /// It moves only when a record under the stripe is flushed, which needs
    /// the stripe, so it is constant for as long as a caller holds it.
    #[must_use]
    pub fn epoch(&self, lock_id: LockId) -> u64 {
        self.stripes[self.stripe_index(lock_id)].epoch()
    }

    pub(crate) fn advance_epoch(&self, lock_id: LockId) -> u64 {
        self.stripes[self.stripe_index(lock_id)].advance_epoch()
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

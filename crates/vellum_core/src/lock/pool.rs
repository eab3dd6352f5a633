//! Stripe storage and thread identity.

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Returns a process-unique, non-zero token for the calling thread.
pub(crate) fn thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

const NO_OWNER: u64 = 0;

/// One stripe: a mutex, the token of the thread holding it, a version
/// counter bumped on every mutation made under it, and a write-back epoch
/// bumped whenever a record under it reaches storage.
#[derive(Debug, Default)]
pub(crate) struct Stripe {
    mutex: Mutex<()>,
    owner: AtomicU64,
    version: AtomicU64,
    epoch: AtomicU64,
}

impl Stripe {
    pub(crate) fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == thread_token()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        let guard = self.mutex.lock();
        self.owner.store(thread_token(), Ordering::Release);
        guard
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.mutex.try_lock()?;
        self.owner.store(thread_token(), Ordering::Release);
        Some(guard)
    }

    pub(crate) fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, ()>> {
        let guard = self.mutex.try_lock_for(timeout)?;
        self.owner.store(thread_token(), Ordering::Release);
        Some(guard)
    }

    /// Clears ownership. Must be called while the mutex is still held.
    pub(crate) fn release_owner(&self) {
        self.owner.store(NO_OWNER, Ordering::Release);
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn increment_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Allocates `count` stripes, rounded up to a power of two.
pub(crate) fn allocate(count: usize) -> Box<[Stripe]> {
    let count = count.max(1).next_power_of_two();
    (0..count).map(|_| Stripe::default()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_tokens_differ_across_threads() {
        let here = thread_token();
        assert_ne!(here, NO_OWNER);
        assert_eq!(here, thread_token());
        let there = std::thread::spawn(thread_token).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn allocation_rounds_to_power_of_two() {
        assert_eq!(allocate(0).len(), 1);
        assert_eq!(allocate(5).len(), 8);
        assert_eq!(allocate(64).len(), 64);
    }

    #[test]
    fn ownership_follows_lock() {
        let stripe = Stripe::default();
        assert!(!stripe.is_owned_by_current_thread());
        let guard = stripe.lock();
        assert!(stripe.is_owned_by_current_thread());
        assert!(stripe.try_lock().is_none());
        stripe.release_owner();
        drop(guard);
        assert!(!stripe.is_owned_by_current_thread());
    }
}

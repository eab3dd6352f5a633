//! A running transaction: its context, its stripe locks, and the gate that
//! keeps checkpoints out while it runs.

use super::context::TxnContext;
use crate::error::{CacheError, CacheResult};
use crate::lock::LockSet;
use crate::manager::CacheManager;
use crate::types::LockId;
use parking_lot::RwLockReadGuard;
use std::cell::Cell;
use std::mem;

thread_local! {
    static IN_PROCEDURE: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` if the calling thread is running a procedure.
#[must_use]
pub fn in_procedure() -> bool {
    IN_PROCEDURE.with(Cell::get)
}

/// A transaction bound to the calling thread.
///
/// Created by [`CacheManager::begin`] or driven by [`CacheManager::run`].
/// Holds the declared stripe locks until it is committed, rolled back, or
/// dropped; dropping an unfinished procedure rolls it back.
pub struct Procedure<'m> {
    // Field order is drop order: locks go before the gate.
    ctx: TxnContext,
    locks: LockSet<'m>,
    manager: &'m CacheManager,
    _gate: RwLockReadGuard<'m, ()>,
}

impl<'m> Procedure<'m> {
    pub(crate) fn new(
        manager: &'m CacheManager,
        gate: RwLockReadGuard<'m, ()>,
        locks: LockSet<'m>,
        ctx: TxnContext,
    ) -> Self {
        IN_PROCEDURE.with(|flag| flag.set(true));
        Self {
            ctx,
            locks,
            manager,
            _gate: gate,
        }
    }

    /// The stripes this procedure holds.
    pub fn locks(&self) -> &LockSet<'m> {
        &self.locks
    }

    /// The transaction context.
    pub fn context(&self) -> &TxnContext {
        &self.ctx
    }

    /// Releases every held stripe and acquires the stripes of `lock_ids`.
    ///
    /// # Errors
    ///
    /// Returns `Redo` if a stripe held both before and after changed while
    /// it was released; the new stripes are held either way. Returns
    /// `InvalidOperation` if the transaction already mutated anything, since
    /// its undo actions need the original stripes.
    pub fn relock(&mut self, lock_ids: &[LockId]) -> CacheResult<()> {
        if self.ctx.has_mutations() {
            return Err(CacheError::invalid_operation(
                "cannot relock after the transaction has mutated records",
            ));
        }
        let manager = self.locks.manager();
        let held = mem::replace(&mut self.locks, manager.empty());
        let (locks, changed) = manager.relock(held, lock_ids);
        self.locks = locks;
        match changed {
            Some(stripe) => Err(CacheError::Redo { stripe }),
            None => Ok(()),
        }
    }

    /// Registers `f` to run after a successful commit.
    pub fn on_commit(&self, f: impl FnOnce() + 'static) {
        self.ctx.on_commit(f);
    }

    /// Registers `f` to run on rollback.
    pub fn on_rollback(&self, f: impl FnOnce() + 'static) {
        self.ctx.on_rollback(f);
    }

    /// Returns `true` if anything in this transaction changed a record.
    pub fn has_dirty(&self) -> bool {
        self.ctx.has_dirty()
    }

    /// Commits and releases the locks.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while pushing dirty records into
    /// their tables. Commit callbacks still run.
    pub fn commit(mut self) -> CacheResult<()> {
        let result = self.ctx.commit(&self.locks);
        // Release the stripes first so a triggered pass can take them.
        let empty = self.locks.manager().empty();
        drop(mem::replace(&mut self.locks, empty));
        self.manager.after_commit();
        result
    }

    /// Rolls back and releases the locks.
    pub fn rollback(self) {
        self.ctx.rollback();
    }
}

impl Drop for Procedure<'_> {
    fn drop(&mut self) {
        if self.ctx.is_active() {
            self.ctx.rollback();
        }
        IN_PROCEDURE.with(|flag| flag.set(false));
    }
}

impl std::fmt::Debug for Procedure<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure")
            .field("ctx", &self.ctx)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

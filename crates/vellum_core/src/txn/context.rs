//! Per-transaction tracking of records, undo actions, and commit callbacks.

use super::safe::Safe;
use crate::error::{CacheError, CacheResult};
use crate::lock::LockSet;
use crate::record::Record;
use crate::stats::CacheStats;
use crate::table::{Table, TableKey, TableValue};
use crate::types::TableId;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use tracing::error;

/// Lifecycle of a transaction context.
///
/// `Active → Committing | RollingBack → Done`; there is no way back to
/// `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting reads, writes, and callback registrations.
    Active,
    /// Pushing dirty records to their tables and running commit callbacks.
    Committing,
    /// Running undo actions.
    RollingBack,
    /// Finished.
    Done,
}

pub(crate) type Action = Box<dyn FnOnce()>;

/// A record wrapped and registered with a context.
pub(crate) trait TrackedRecord {
    fn table_id(&self) -> TableId;
    fn is_dirty(&self) -> bool;
    fn detach(&self);
    fn commit(&self, locks: &LockSet<'_>) -> CacheResult<()>;
    fn as_any(&self) -> &dyn Any;
}

struct RecordEntry<K, V> {
    table: Arc<Table<K, V>>,
    key: K,
    safe: Safe<V>,
}

impl<K: TableKey, V: TableValue> TrackedRecord for RecordEntry<K, V> {
    fn table_id(&self) -> TableId {
        self.table.id()
    }

    fn is_dirty(&self) -> bool {
        self.safe.is_dirty()
    }

    fn detach(&self) {
        self.safe.take_dirty();
    }

    fn commit(&self, locks: &LockSet<'_>) -> CacheResult<()> {
        if self.safe.take_dirty() {
            self.table.modify_tracked(locks, &self.key, self.safe.raw())?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct ContextInner {
    state: Cell<TxnState>,
    stats: Arc<CacheStats>,
    records: RefCell<Vec<Box<dyn TrackedRecord>>>,
    rollbacks: RefCell<Vec<Action>>,
    commits: RefCell<Vec<Action>>,
    has_dirty: Cell<bool>,
}

impl ContextInner {
    pub(crate) fn is_active(&self) -> bool {
        self.state.get() == TxnState::Active
    }

    pub(crate) fn push_rollback(&self, action: Action) {
        assert!(self.is_active(), "transaction is no longer active");
        self.rollbacks.borrow_mut().push(action);
    }
}

/// The undo log and record set of one running transaction.
///
/// A context is confined to the thread running its transaction. Records
/// touched through `*_safe` table operations are wrapped and registered
/// here once per `(table, key)`; on commit, wrappers marked dirty are pushed
/// into their tables' write-back caches and commit callbacks run in
/// registration order. On rollback, undo actions run in reverse
/// registration order.
///
/// Callback panics are caught, logged, and counted; they never stop the
/// remaining callbacks.
#[derive(Clone)]
pub struct TxnContext {
    inner: Rc<ContextInner>,
}

impl TxnContext {
    pub(crate) fn new(stats: Arc<CacheStats>) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                state: Cell::new(TxnState::Active),
                stats,
                records: RefCell::new(Vec::new()),
                rollbacks: RefCell::new(Vec::new()),
                commits: RefCell::new(Vec::new()),
                has_dirty: Cell::new(false),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.inner.state.get()
    }

    /// Returns `true` while the transaction accepts work.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Returns `true` if anything in this transaction changed a record.
    pub fn has_dirty(&self) -> bool {
        self.inner.has_dirty.get() || self.inner.records.borrow().iter().any(|r| r.is_dirty())
    }

    pub(crate) fn has_mutations(&self) -> bool {
        self.has_dirty() || !self.inner.rollbacks.borrow().is_empty()
    }

    /// Registers `f` to run after a successful commit.
    ///
    /// # Panics
    ///
    /// Panics if the transaction is no longer active.
    pub fn on_commit(&self, f: impl FnOnce() + 'static) {
        assert!(self.is_active(), "transaction is no longer active");
        self.inner.commits.borrow_mut().push(Box::new(f));
    }

    /// Registers `f` to run if the transaction rolls back.
    ///
    /// # Panics
    ///
    /// Panics if the transaction is no longer active.
    pub fn on_rollback(&self, f: impl FnOnce() + 'static) {
        self.inner.push_rollback(Box::new(f));
    }

    /// Registers an undo action for a table-level mutation.
    pub(crate) fn push_undo(&self, f: impl FnOnce() + 'static) {
        self.inner.push_rollback(Box::new(f));
        self.inner.has_dirty.set(true);
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Rc::downgrade(&self.inner)
    }

    fn entry_index<K: TableKey, V: TableValue>(&self, table: TableId, key: &K) -> Option<usize> {
        self.inner.records.borrow().iter().position(|r| {
            r.table_id() == table
                && r.as_any()
                    .downcast_ref::<RecordEntry<K, V>>()
                    .is_some_and(|entry| entry.key == *key)
        })
    }

    /// Returns the wrapper already registered for `(table, key)`.
    pub(crate) fn find<K: TableKey, V: TableValue>(&self, table: TableId, key: &K) -> Option<Safe<V>> {
        let index = self.entry_index::<K, V>(table, key)?;
        let records = self.inner.records.borrow();
        records[index]
            .as_any()
            .downcast_ref::<RecordEntry<K, V>>()
            .map(|entry| entry.safe.clone())
    }

    /// Wraps `record` and registers it under `(table, key)`.
    pub(crate) fn track<K: TableKey, V: TableValue>(
        &self,
        table: &Arc<Table<K, V>>,
        key: K,
        record: Record<V>,
    ) -> Safe<V> {
        assert!(self.is_active(), "transaction is no longer active");
        let safe = Safe::new(
            record,
            table.lock_id(&key),
            format!("table={},key={:?}", table.name(), key).into(),
            Arc::clone(table.lock_manager()),
            self.downgrade(),
        );
        self.inner.records.borrow_mut().push(Box::new(RecordEntry {
            table: Arc::clone(table),
            key,
            safe: safe.clone(),
        }));
        safe
    }

    /// Stops tracking `(table, key)`; its wrapper will not be committed.
    pub(crate) fn detach<K: TableKey, V: TableValue>(&self, table: TableId, key: &K) {
        let Some(index) = self.entry_index::<K, V>(table, key) else {
            return;
        };
        let entry = self.inner.records.borrow_mut().remove(index);
        entry.detach();
    }

    /// Pushes dirty records into their tables, then runs commit callbacks.
    ///
    /// Undo actions are discarded first. Every dirty record is applied even
    /// if one fails; the first failure is returned.
    pub(crate) fn commit(&self, locks: &LockSet<'_>) -> CacheResult<()> {
        if !self.is_active() {
            return Err(CacheError::invalid_operation("transaction is not active"));
        }
        self.inner.state.set(TxnState::Committing);
        drop(self.inner.rollbacks.take());

        let records = self.inner.records.take();
        let mut result = Ok(());
        for entry in &records {
            if let Err(e) = entry.commit(locks) {
                error!(error = %e, "failed to apply record on commit");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        drop(records);

        for callback in self.inner.commits.take() {
            self.run_guarded(callback, "commit");
        }
        self.finish();
        self.inner.stats.record_transaction_commit();
        result
    }

    /// Discards tracked records and runs undo actions in reverse order.
    ///
    /// Does nothing if the transaction already finished.
    pub(crate) fn rollback(&self) {
        if !self.is_active() {
            return;
        }
        self.inner.state.set(TxnState::RollingBack);
        drop(self.inner.records.take());
        drop(self.inner.commits.take());

        let actions = self.inner.rollbacks.take();
        for action in actions.into_iter().rev() {
            self.run_guarded(action, "rollback");
        }
        self.finish();
        self.inner.stats.record_transaction_rollback();
    }

    fn finish(&self) {
        self.inner.has_dirty.set(false);
        self.inner.state.set(TxnState::Done);
    }

    fn run_guarded(&self, action: Action, phase: &'static str) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(action)) {
            self.inner.stats.record_callback_error();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            error!(phase, panic = %message, "transaction callback panicked");
        }
    }
}

impl std::fmt::Debug for TxnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnContext")
            .field("state", &self.state())
            .field("records", &self.inner.records.borrow().len())
            .field("rollbacks", &self.inner.rollbacks.borrow().len())
            .field("commits", &self.inner.commits.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;

    fn context() -> (TxnContext, Arc<CacheStats>) {
        let stats = Arc::new(CacheStats::new());
        (TxnContext::new(Arc::clone(&stats)), stats)
    }

    #[test]
    fn rollback_runs_actions_in_reverse() {
        let (ctx, stats) = context();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            ctx.on_rollback(move || log.borrow_mut().push(i));
        }
        let log_commit = Rc::clone(&log);
        ctx.on_commit(move || log_commit.borrow_mut().push(99));

        ctx.rollback();
        assert_eq!(*log.borrow(), vec![2, 1, 0]);
        assert_eq!(ctx.state(), TxnState::Done);
        assert_eq!(stats.snapshot().transactions_rolled_back, 1);
    }

    #[test]
    fn commit_runs_callbacks_in_order_and_drops_undo() {
        let (ctx, _) = context();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            ctx.on_commit(move || log.borrow_mut().push(i));
        }
        let undo = Rc::clone(&log);
        ctx.on_rollback(move || undo.borrow_mut().push(-1));

        let lm = LockManager::new(4);
        ctx.commit(&lm.empty()).unwrap();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);

        ctx.rollback();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_callback_does_not_stop_the_rest() {
        let (ctx, stats) = context();
        let ran = Rc::new(Cell::new(0));
        let first = Rc::clone(&ran);
        ctx.on_commit(move || first.set(first.get() + 1));
        ctx.on_commit(|| panic!("callback failure"));
        let third = Rc::clone(&ran);
        ctx.on_commit(move || third.set(third.get() + 1));

        let lm = LockManager::new(4);
        ctx.commit(&lm.empty()).unwrap();
        assert_eq!(ran.get(), 2);
        assert_eq!(stats.snapshot().callback_errors, 1);
    }

    #[test]
    fn cannot_commit_twice() {
        let (ctx, _) = context();
        let lm = LockManager::new(4);
        ctx.commit(&lm.empty()).unwrap();
        assert!(matches!(
            ctx.commit(&lm.empty()),
            Err(CacheError::InvalidOperation { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "no longer active")]
    fn registration_after_finish_panics() {
        let (ctx, _) = context();
        ctx.rollback();
        ctx.on_commit(|| {});
    }

    #[test]
    fn undo_marks_dirty() {
        let (ctx, _) = context();
        assert!(!ctx.has_dirty());
        ctx.push_undo(|| {});
        assert!(ctx.has_dirty());
        assert!(ctx.has_mutations());
    }
}

//! Mutation-tracking record wrappers.

use super::context::ContextInner;
use crate::lock::LockManager;
use crate::record::Record;
use crate::types::LockId;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

type OnDirty = Box<dyn FnOnce()>;

struct SafeCore<V> {
    record: Record<V>,
    lock_id: LockId,
    label: Rc<str>,
    locks: Arc<LockManager>,
    ctx: Weak<ContextInner>,
    dirty: Cell<bool>,
    full_undo: Cell<bool>,
    on_dirty: RefCell<Option<OnDirty>>,
}

impl<V> SafeCore<V> {
    fn check_lock(&self) {
        if !self.locks.is_locked_by_current_thread(self.lock_id) {
            panic!("access to unlocked record: {}", self.label);
        }
    }

    fn context(&self) -> Rc<ContextInner> {
        match self.ctx.upgrade() {
            Some(ctx) if ctx.is_active() => ctx,
            _ => panic!("record used outside its transaction: {}", self.label),
        }
    }

    fn mark_dirty(&self) {
        self.context();
        self.dirty.set(true);
        let callback = self.on_dirty.borrow_mut().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// A record touched inside a transaction.
///
/// Mutations through [`update`](Self::update) snapshot the whole value the
/// first time, register an undo action restoring that snapshot, and mark the
/// wrapper dirty. On commit, dirty wrappers are pushed into their table's
/// write-back cache once each.
///
/// Wrappers are confined to the transaction's thread and must not outlive
/// it; using one after commit or rollback panics.
pub struct Safe<V> {
    core: Rc<SafeCore<V>>,
}

impl<V: Clone + 'static> Safe<V> {
    pub(crate) fn new(
        record: Record<V>,
        lock_id: LockId,
        label: Rc<str>,
        locks: Arc<LockManager>,
        ctx: Weak<ContextInner>,
    ) -> Self {
        Self {
            core: Rc::new(SafeCore {
                record,
                lock_id,
                label,
                locks,
                ctx,
                dirty: Cell::new(false),
                full_undo: Cell::new(false),
                on_dirty: RefCell::new(None),
            }),
        }
    }

    /// Runs `f` with a shared view of the value.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the record's stripe.
    pub fn read<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        self.core.check_lock();
        self.core.record.read(f)
    }

    /// Returns a copy of the value.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the record's stripe.
    pub fn get(&self) -> V {
        self.read(V::clone)
    }

    /// Mutates the value and marks the wrapper dirty.
    ///
    /// The first mutation in a transaction snapshots the value for rollback.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the record's stripe, or
    /// if the transaction has ended.
    pub fn update<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        self.core.check_lock();
        self.full_undo();
        let result = self.core.record.write(f);
        self.dirty();
        result
    }

    /// Replaces the value.
    ///
    /// # Panics
    ///
    /// Same as [`update`](Self::update).
    pub fn assign(&self, value: V) {
        self.update(|v| *v = value);
    }

    /// Replaces the value with `V::default()`.
    ///
    /// # Panics
    ///
    /// Same as [`update`](Self::update).
    pub fn reset(&self)
    where
        V: Default,
    {
        self.assign(V::default());
    }

    fn full_undo(&self) {
        if self.core.full_undo.get() {
            return;
        }
        let ctx = self.core.context();
        let snapshot = self.core.record.get();
        let record = self.core.record.clone();
        let locks = Arc::clone(&self.core.locks);
        let lock_id = self.core.lock_id;
        ctx.push_rollback(Box::new(move || {
            record.write(|v| *v = snapshot);
            locks.increment_version(lock_id);
        }));
        self.core.full_undo.set(true);
    }

    /// Returns `true` if the wrapper was marked dirty.
    pub fn is_dirty(&self) -> bool {
        self.core.dirty.get()
    }

    /// Marks the wrapper dirty without snapshotting, and fires the pending
    /// [`on_dirty`](Self::on_dirty) callback.
    ///
    /// # Panics
    ///
    /// Panics if the transaction has ended.
    pub fn dirty(&self) {
        self.core.mark_dirty();
    }

    /// Registers a callback for the next time the wrapper is marked dirty.
    /// It fires once, then is cleared.
    pub fn on_dirty(&self, f: impl FnOnce() + 'static) {
        *self.core.on_dirty.borrow_mut() = Some(Box::new(f));
    }

    /// The wrapped record. Writes through it bypass undo tracking.
    pub fn raw(&self) -> &Record<V> {
        &self.core.record
    }

    /// A wrapper over one field of the value, selected by `project`.
    pub fn field<F: Clone + 'static>(&self, project: fn(&mut V) -> &mut F) -> SafeField<V, F> {
        SafeField {
            root: self.clone(),
            project,
            snapshotted: Cell::new(false),
        }
    }

    pub(crate) fn take_dirty(&self) -> bool {
        self.core.dirty.replace(false)
    }
}

impl<V> Clone for Safe<V> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Safe<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Safe")
            .field("record", &self.core.label)
            .field("dirty", &self.core.dirty.get())
            .finish_non_exhaustive()
    }
}

/// A nested wrapper over one field of a [`Safe`] record.
///
/// Mutations snapshot only the field unless the whole record was already
/// snapshotted, and mark the owning record dirty.
pub struct SafeField<V, F> {
    root: Safe<V>,
    project: fn(&mut V) -> &mut F,
    snapshotted: Cell<bool>,
}

impl<V: Clone + 'static, F: Clone + 'static> SafeField<V, F> {
    /// Returns a copy of the field.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the record's stripe.
    pub fn get(&self) -> F {
        let project = self.project;
        self.root.core.check_lock();
        self.root.core.record.write(|v| project(v).clone())
    }

    /// Mutates the field and marks the owning record dirty.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the record's stripe, or
    /// if the transaction has ended.
    pub fn update<R>(&self, f: impl FnOnce(&mut F) -> R) -> R {
        let core = &self.root.core;
        core.check_lock();
        let project = self.project;
        if !core.full_undo.get() && !self.snapshotted.get() {
            let ctx = core.context();
            let snapshot = core.record.write(|v| project(v).clone());
            let record = core.record.clone();
            ctx.push_rollback(Box::new(move || {
                record.write(|v| *project(v) = snapshot);
            }));
            self.snapshotted.set(true);
        }
        let result = core.record.write(|v| f(project(v)));
        self.dirty();
        result
    }

    /// Replaces the field.
    ///
    /// # Panics
    ///
    /// Same as [`update`](Self::update).
    pub fn assign(&self, value: F) {
        self.update(|field| *field = value);
    }

    /// Marks the owning record dirty.
    pub fn dirty(&self) {
        self.root.dirty();
    }
}

impl<V, F> fmt::Debug for SafeField<V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeField")
            .field("record", &self.root.core.label)
            .finish_non_exhaustive()
    }
}

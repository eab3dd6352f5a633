//! Shared record handles.

use crate::types::{SaveState, TableId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const STATE_MASK: u64 = 0xff;
const OWNER_SHIFT: u32 = 8;

/// Save-state and owning table, packed so both change together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attachment(u64);

impl Attachment {
    const UNSTORED: Self = Self(SaveState::Unstored as u64);

    fn new(table: Option<TableId>, state: SaveState) -> Self {
        let owner = table.map_or(0, |t| u64::from(t.0) + 1);
        Self((owner << OWNER_SHIFT) | state as u64)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn state(self) -> SaveState {
        SaveState::from_u8((self.0 & STATE_MASK) as u8)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn table(self) -> Option<TableId> {
        match self.0 >> OWNER_SHIFT {
            0 => None,
            owner => Some(TableId((owner - 1) as u32)),
        }
    }
}

struct RecordInner<V> {
    value: Mutex<V>,
    attachment: AtomicU64,
    epoch: AtomicU64,
}

/// A handle to one record value and its save-state.
///
/// Cloning the handle shares the record: the read cache, the write-back
/// cache, and transaction wrappers all point at the same value. Identity
/// (not equality) is what [`Table::modify`](crate::Table::modify) checks,
/// together with the table the record was attached to.
///
/// The handle itself is thread-safe, but callers must hold the record's
/// stripe lock while reading or writing it through a table.
pub struct Record<V> {
    inner: Arc<RecordInner<V>>,
}

impl<V> Record<V> {
    /// Wraps a fresh value, not yet attached to any table.
    pub fn new(value: V) -> Self {
        Self::with_attachment(value, Attachment::UNSTORED)
    }

    /// A record just read from `table`'s storage.
    pub(crate) fn loaded(value: V, table: TableId) -> Self {
        Self::with_attachment(value, Attachment::new(Some(table), SaveState::StoredClean))
    }

    fn with_attachment(value: V, attachment: Attachment) -> Self {
        Self {
            inner: Arc::new(RecordInner {
                value: Mutex::new(value),
                attachment: AtomicU64::new(attachment.0),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn attachment(&self) -> Attachment {
        Attachment(self.inner.attachment.load(Ordering::Acquire))
    }

    pub(crate) fn restore(&self, attachment: Attachment) {
        self.inner.attachment.store(attachment.0, Ordering::Release);
    }

    /// Current save-state.
    pub fn state(&self) -> SaveState {
        self.attachment().state()
    }

    /// The table this record is attached to; `None` once it is replaced or
    /// removed, and for records never stored.
    pub fn table(&self) -> Option<TableId> {
        self.attachment().table()
    }

    /// Stripe write-back epoch the record was last known current at.
    pub(crate) fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn stamp(&self, epoch: u64) {
        self.inner.epoch.store(epoch, Ordering::Release);
    }

    /// Changes the save-state, keeping the owning table.
    pub(crate) fn set_state(&self, state: SaveState) {
        let _ = self
            .inner
            .attachment
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((bits & !STATE_MASK) | state as u64)
            });
    }

    /// Attaches the record to `table` in `state`.
    pub(crate) fn attach(&self, table: TableId, state: SaveState) {
        self.restore(Attachment::new(Some(table), state));
    }

    /// Cuts the record loose from its table.
    pub(crate) fn detach(&self) {
        self.restore(Attachment::UNSTORED);
    }

    /// Returns `true` if the record is attached to a table.
    pub fn is_stored(&self) -> bool {
        self.state().is_stored()
    }

    /// Returns `true` if the record is attached to `table`.
    pub fn is_stored_in(&self, table: TableId) -> bool {
        let attachment = self.attachment();
        attachment.state().is_stored() && attachment.table() == Some(table)
    }

    /// Returns `true` if the record is waiting in a write-back cache.
    pub fn is_modified(&self) -> bool {
        self.state() == SaveState::StoredDirty
    }

    /// Runs `f` with a shared view of the value.
    pub fn read<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.inner.value.lock())
    }

    /// Runs `f` with a mutable view of the value.
    ///
    /// This does not mark the record modified; follow it with
    /// [`Table::modify`](crate::Table::modify), or mutate through a
    /// [`Safe`](crate::Safe) wrapper instead.
    pub fn write<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        f(&mut self.inner.value.lock())
    }

    /// Returns `true` if both handles point at the same record.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V: Clone> Record<V> {
    /// Returns a copy of the value.
    pub fn get(&self) -> V {
        self.inner.value.lock().clone()
    }
}

impl<V> Clone for Record<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Record<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("state", &self.state())
            .field("table", &self.table())
            .field("value", &*self.inner.value.lock())
            .finish()
    }
}

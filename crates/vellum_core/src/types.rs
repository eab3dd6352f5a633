//! Core identifier and state types.

use std::fmt;

/// Identifier of a table registered with a cache manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

/// Identifier of the stripe lock guarding a record.
///
/// Derived from the table's lock name and the encoded key; two records
/// with the same `LockId` are always guarded by the same stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(pub u32);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{:08x}", self.0)
    }
}

/// Persistence state of a record.
///
/// A record is `StoredDirty` exactly while it sits in its table's
/// write-back cache waiting for a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SaveState {
    /// Not attached to any table.
    Unstored = 0,
    /// Attached and identical to what storage holds.
    StoredClean = 1,
    /// Attached and pending a flush.
    StoredDirty = 2,
}

impl SaveState {
    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::StoredClean,
            2 => Self::StoredDirty,
            _ => Self::Unstored,
        }
    }

    /// Returns `true` if the record is attached to a table.
    #[must_use]
    pub const fn is_stored(self) -> bool {
        !matches!(self, Self::Unstored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_state_round_trips_through_u8() {
        for state in [SaveState::Unstored, SaveState::StoredClean, SaveState::StoredDirty] {
            assert_eq!(SaveState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn lock_id_display() {
        assert_eq!(LockId(0xab).to_string(), "lock#000000ab");
        assert_eq!(TableId(7).to_string(), "table#7");
    }
}

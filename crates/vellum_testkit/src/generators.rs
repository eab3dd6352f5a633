//! Property-based test generators using proptest.
//!
//! Provides strategies for operation sequences against a single table,
//! with keys drawn from a small range so operations collide.

use crate::fixtures::Player;
use proptest::prelude::*;

/// One table operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// Stores a fresh record.
    Put(u64, u64),
    /// Adds to an existing record's balance, if present.
    Credit(u64, u64),
    /// Removes the key.
    Remove(u64),
}

impl CacheOp {
    /// The key the operation touches.
    pub fn key(&self) -> u64 {
        match self {
            Self::Put(key, _) | Self::Credit(key, _) | Self::Remove(key) => *key,
        }
    }
}

/// Strategy for keys in `0..8`.
pub fn key_strategy() -> impl Strategy<Value = u64> {
    0u64..8
}

/// Strategy for a single operation.
pub fn op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => (key_strategy(), 0u64..1_000).prop_map(|(k, g)| CacheOp::Put(k, g)),
        3 => (key_strategy(), 1u64..100).prop_map(|(k, g)| CacheOp::Credit(k, g)),
        2 => key_strategy().prop_map(CacheOp::Remove),
    ]
}

/// Strategy for one transaction: its operations and whether it commits.
pub fn txn_strategy() -> impl Strategy<Value = (Vec<CacheOp>, bool)> {
    (prop::collection::vec(op_strategy(), 1..8), any::<bool>())
}

/// Strategy for players with short names and small inventories.
pub fn player_strategy() -> impl Strategy<Value = Player> {
    (
        "[a-z]{1,8}",
        any::<u32>(),
        prop::collection::vec(any::<u32>(), 0..4),
    )
        .prop_map(|(name, gold, items)| Player {
            name,
            gold: u64::from(gold),
            items,
        })
}

//! Transactions.
//!
//! A [`Procedure`] binds a [`TxnContext`] and a [`LockSet`](crate::LockSet)
//! to the calling thread. Table `*_safe` operations register their records
//! and undo actions with the context; commit pushes dirty [`Safe`] wrappers
//! into the write-back caches, rollback replays undo actions newest first.

mod context;
mod procedure;
mod safe;

pub use context::{TxnContext, TxnState};
pub use procedure::{in_procedure, Procedure};
pub use safe::{Safe, SafeField};

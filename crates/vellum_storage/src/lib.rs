//! # Vellum Storage
//!
//! Ordered key/value storage engines sitting underneath the vellum record
//! cache.
//!
//! Engines store **opaque bytes**. Keys arrive already encoded so that
//! bytewise order matches the key type's natural order; values are
//! encoded records. The cache decides when to read and write; engines only
//! have to be ordered, thread-safe, and honest about errors.
//!
//! ## Available Engines
//!
//! - [`MemoryStorage`] - For tests and ephemeral deployments
//! - [`FileStorage`] - One append-only, checksummed log per table
//!
//! ## Example
//!
//! ```rust
//! use vellum_storage::{MemoryStorage, Storage, WalkBounds};
//!
//! let storage = MemoryStorage::new();
//! let table = storage.open_table("scores").unwrap();
//! table.put(b"alice", b"10").unwrap();
//! table.put(b"bob", b"7").unwrap();
//!
//! let mut keys = Vec::new();
//! table
//!     .walk(WalkBounds::all(), &mut |k| {
//!         keys.push(k.to_vec());
//!         true
//!     })
//!     .unwrap();
//! assert_eq!(keys, vec![b"alice".to_vec(), b"bob".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod file;
mod memory;
mod record;

pub use engine::{Storage, StorageTable, WalkBounds};
pub use error::{StorageError, StorageResult};
pub use file::{FileStorage, LogTable};
pub use memory::{MemoryStorage, MemoryTable};

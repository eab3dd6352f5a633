//! # Vellum Testkit
//!
//! Test utilities for the vellum record cache.
//!
//! This crate provides:
//! - Test fixtures: caches over in-memory or temporary file storage
//! - A fault-injecting storage engine for flush failure tests
//! - Property-based generators for cache operation sequences
//! - A model harness checking cache contents against a reference map
//! - Concurrent stress helpers
//!
//! ## Usage
//!
//! ```rust
//! use vellum_testkit::prelude::*;
//!
//! let cache = TestCache::memory();
//! let players = cache.players();
//! cache
//!     .run(&[players.lock_id(&1)], |proc| {
//!         players.put_safe(proc, 1, Player::new("ann", 10))
//!     })
//!     .unwrap();
//! assert_eq!(cache.flush_pass().flushed, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use crate::init_tracing;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;

/// Installs a `tracing` subscriber honoring `RUST_LOG`, once per process.
///
/// Output goes through the test writer so it is captured per test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

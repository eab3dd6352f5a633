//! # Vellum Codec
//!
//! Encoding for the vellum record cache.
//!
//! This crate provides:
//! - [`KeyCodec`]: order-preserving key encoding, so a bytewise-ordered
//!   storage engine walks keys in their natural order
//! - [`encode_value`] / [`decode_value`]: CBOR encoding of record values
//!   through their serde representation
//!
//! ## Usage
//!
//! ```
//! use vellum_codec::{decode_value, encode_value, KeyCodec};
//!
//! let key = (-3i64).to_key_bytes();
//! assert!(key < 0i64.to_key_bytes());
//!
//! let bytes = encode_value(&vec![1u32, 2, 3]).unwrap();
//! let back: Vec<u32> = decode_value(&bytes).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;
mod value;

pub use error::{CodecError, CodecResult};
pub use key::KeyCodec;
pub use value::{decode_value, encode_value};

//! Record value encoding.
//!
//! Values are persisted as CBOR produced by `ciborium` from their serde
//! representation. The cache never inspects the encoded bytes; they are
//! handed to the storage engine as-is.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a record value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    ciborium::into_writer(value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decodes a record value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not a valid encoding of `T`.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

//! Order-preserving key encoding.
//!
//! Storage engines order keys bytewise. `KeyCodec` maps a key type to bytes
//! such that `a < b` if and only if `encode(a) < encode(b)`, so ordered walks
//! over the storage engine visit keys in their natural order.
//!
//! - Unsigned integers: big-endian.
//! - Signed integers: big-endian with the sign bit flipped.
//! - Strings and byte vectors: raw bytes (UTF-8 preserves code point order).

use crate::error::{CodecError, CodecResult};

/// A key type that can be stored in an ordered keyspace.
pub trait KeyCodec: Sized {
    /// Appends the order-preserving encoding of this key to `out`.
    fn encode_key(&self, out: &mut Vec<u8>);

    /// Decodes a key previously produced by [`KeyCodec::encode_key`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding for this type.
    fn decode_key(bytes: &[u8]) -> CodecResult<Self>;

    /// Returns the encoded key as a fresh buffer.
    fn to_key_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_key(&mut out);
        out
    }
}

fn fixed<const N: usize>(type_name: &'static str, bytes: &[u8]) -> CodecResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| CodecError::invalid_key_length(type_name, N, bytes.len()))
}

macro_rules! unsigned_key {
    ($($t:ty),*) => {$(
        impl KeyCodec for $t {
            fn encode_key(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_be_bytes());
            }

            fn decode_key(bytes: &[u8]) -> CodecResult<Self> {
                Ok(<$t>::from_be_bytes(fixed(stringify!($t), bytes)?))
            }
        }
    )*};
}

macro_rules! signed_key {
    ($($t:ty => $u:ty),*) => {$(
        impl KeyCodec for $t {
            #[allow(clippy::cast_sign_loss)]
            fn encode_key(&self, out: &mut Vec<u8>) {
                let flipped = (*self as $u) ^ (1 << (<$u>::BITS - 1));
                out.extend_from_slice(&flipped.to_be_bytes());
            }

            #[allow(clippy::cast_possible_wrap)]
            fn decode_key(bytes: &[u8]) -> CodecResult<Self> {
                let raw = <$u>::from_be_bytes(fixed(stringify!($t), bytes)?);
                Ok((raw ^ (1 << (<$u>::BITS - 1))) as $t)
            }
        }
    )*};
}

unsigned_key!(u16, u32, u64);
signed_key!(i16 => u16, i32 => u32, i64 => u64);

impl KeyCodec for String {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn decode_key(bytes: &[u8]) -> CodecResult<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl KeyCodec for Vec<u8> {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn decode_key(bytes: &[u8]) -> CodecResult<Self> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn signed_keys_sort_negative_first() {
        let a = (-5i64).to_key_bytes();
        let b = 0i64.to_key_bytes();
        let c = 7i64.to_key_bytes();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = u32::decode_key(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, CodecError::invalid_key_length("u32", 4, 3));
    }

    #[test]
    fn decode_rejects_bad_utf8() {
        assert_eq!(String::decode_key(&[0xff, 0xfe]), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn extreme_values_decode() {
        assert_eq!(i64::decode_key(&i64::MIN.to_key_bytes()).unwrap(), i64::MIN);
        assert_eq!(i32::decode_key(&i32::MAX.to_key_bytes()).unwrap(), i32::MAX);
        assert_eq!(u64::decode_key(&u64::MAX.to_key_bytes()).unwrap(), u64::MAX);
    }

    proptest! {
        #[test]
        fn i64_encoding_preserves_order(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(a.cmp(&b), a.to_key_bytes().cmp(&b.to_key_bytes()));
        }

        #[test]
        fn i32_encoding_preserves_order(a in any::<i32>(), b in any::<i32>()) {
            prop_assert_eq!(a.cmp(&b), a.to_key_bytes().cmp(&b.to_key_bytes()));
        }

        #[test]
        fn u64_encoding_preserves_order(a in any::<u64>(), b in any::<u64>()) {
            prop_assert_eq!(a.cmp(&b), a.to_key_bytes().cmp(&b.to_key_bytes()));
        }

        #[test]
        fn string_encoding_preserves_order(a in ".{0,16}", b in ".{0,16}") {
            prop_assert_eq!(a.cmp(&b), a.to_key_bytes().cmp(&b.to_key_bytes()));
        }
    }
}

//! Table log record framing.
//!
//! Each record is laid out as:
//!
//! ```text
//! | op (1) | key_len (4, LE) | value_len (4, LE) | key | value | crc32 (4, LE) |
//! ```
//!
//! The CRC covers every byte before it. Replay stops at the first record
//! that is short or fails its checksum; everything after it is a torn tail.

/// Bytes of fixed framing around the key and value.
pub(crate) const FRAME_OVERHEAD: usize = 1 + 4 + 4 + 4;

/// Operation stored in a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum LogOp {
    Put = 1,
    Remove = 2,
}

impl LogOp {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// A decoded log record borrowing from the log buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct LogEntry<'a> {
    pub op: LogOp,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn encode(op: LogOp, key: &[u8], value: &[u8], out: &mut Vec<u8>) {
    let start = out.len();
    out.push(op as u8);
    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    let crc = crc32(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Decodes the record starting at `offset`.
///
/// Returns the entry and the offset of the next record, or `None` if the
/// bytes at `offset` are not a complete, valid record.
pub(crate) fn decode(buf: &[u8], offset: usize) -> Option<(LogEntry<'_>, usize)> {
    let op = LogOp::from_byte(*buf.get(offset)?)?;
    let key_len = read_u32(buf, offset + 1)? as usize;
    let value_len = read_u32(buf, offset + 5)? as usize;
    let body = offset + 9;
    let crc_at = body.checked_add(key_len)?.checked_add(value_len)?;
    let stored = read_u32(buf, crc_at)?;
    if crc32(&buf[offset..crc_at]) != stored {
        return None;
    }
    let entry = LogEntry {
        op,
        key: &buf[body..body + key_len],
        value: &buf[body + key_len..crc_at],
    };
    Some((entry, crc_at + 4))
}

/// CRC-32 (IEEE polynomial).
pub(crate) fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut bit = 0;
            while bit < 8 {
                c = if c & 1 != 0 { (c >> 1) ^ 0xEDB8_8320 } else { c >> 1 };
                bit += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &b| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(b)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn decode_sequence() {
        let mut buf = Vec::new();
        encode(LogOp::Put, b"k1", b"v1", &mut buf);
        encode(LogOp::Remove, b"k1", b"", &mut buf);

        let (first, next) = decode(&buf, 0).unwrap();
        assert_eq!(first.op, LogOp::Put);
        assert_eq!(first.key, b"k1");
        assert_eq!(first.value, b"v1");
        assert_eq!(next, FRAME_OVERHEAD + 4);

        let (second, end) = decode(&buf, next).unwrap();
        assert_eq!(second.op, LogOp::Remove);
        assert_eq!(end, buf.len());
        assert!(decode(&buf, end).is_none());
    }

    #[test]
    fn torn_record_is_rejected() {
        let mut buf = Vec::new();
        encode(LogOp::Put, b"key", b"value", &mut buf);
        buf.truncate(buf.len() - 2);
        assert!(decode(&buf, 0).is_none());
    }

    #[test]
    fn corrupted_record_is_rejected() {
        let mut buf = Vec::new();
        encode(LogOp::Put, b"key", b"value", &mut buf);
        buf[10] ^= 0xff;
        assert!(decode(&buf, 0).is_none());
    }
}

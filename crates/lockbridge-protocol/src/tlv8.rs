//! TLV8 tag-length-value codec.
//!
//! Each item is one tag byte, one length byte and `length` value bytes.
//! Values longer than 255 bytes are split into consecutive fragments that
//! share the tag; every fragment but the last is exactly 255 bytes long, and
//! the decoder joins them back together.
//!
//! ```text
//! ┌─────┬─────┬──────────────┐┌─────┬─────┬────────┐
//! │ tag │ 255 │ 255 bytes... ││ tag │ n   │ rest   │  -> one item
//! └─────┴─────┴──────────────┘└─────┴─────┴────────┘
//! ```
//!
//! Two items with the same tag that must stay separate (for example a list
//! of records) are divided by a zero-length separator item (`00 00`).
//!
//! # Examples
//!
//! ```
//! use lockbridge_protocol::tlv8::{Tlv8Writer, decode};
//!
//! let bytes = Tlv8Writer::new()
//!     .put_u8(0x01, 0x03)
//!     .put(0x02, b"1234")
//!     .finish();
//!
//! assert_eq!(&bytes[..], &[0x01, 0x01, 0x03, 0x02, 0x04, b'1', b'2', b'3', b'4']);
//!
//! let items = decode(&bytes).unwrap();
//! assert_eq!(items.len(), 2);
//! assert_eq!(items[1].value, b"1234");
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use lockbridge_core::{Error, Result};

/// Largest value a single fragment can carry.
pub const MAX_FRAGMENT_LEN: usize = 255;

/// Tag reserved for the zero-length separator item.
pub const SEPARATOR_TAG: u8 = 0x00;

/// Largest buffer the decoder accepts.
pub const MAX_BUFFER_LEN: usize = 64 * 1024;

/// One decoded TLV8 item with fragments already joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvItem {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl TlvItem {
    pub fn new(tag: u8, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// The value as a single byte.
    ///
    /// # Errors
    /// Returns `Error::ProtocolDecode` if the value is not exactly one byte.
    pub fn as_u8(&self) -> Result<u8> {
        match self.value.as_slice() {
            [b] => Ok(*b),
            other => Err(Error::protocol(format!(
                "tag {:02x}: expected 1-byte value, got {} bytes",
                self.tag,
                other.len()
            ))),
        }
    }
}

/// Incremental TLV8 encoder.
#[derive(Debug, Default)]
pub struct Tlv8Writer {
    buf: BytesMut,
}

impl Tlv8Writer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    /// Append an item, fragmenting values longer than 255 bytes.
    pub fn put(mut self, tag: u8, value: &[u8]) -> Self {
        self.write(tag, value);
        self
    }

    pub fn put_u8(self, tag: u8, value: u8) -> Self {
        self.put(tag, &[value])
    }

    /// Append a `00 00` separator.
    pub fn separator(self) -> Self {
        self.put(SEPARATOR_TAG, &[])
    }

    /// Append an item in place.
    pub fn write(&mut self, tag: u8, value: &[u8]) {
        if value.is_empty() {
            self.buf.put_u8(tag);
            self.buf.put_u8(0);
            return;
        }
        for chunk in value.chunks(MAX_FRAGMENT_LEN) {
            self.buf.reserve(2 + chunk.len());
            self.buf.put_u8(tag);
            self.buf.put_u8(chunk.len() as u8);
            self.buf.put_slice(chunk);
        }
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Decode a buffer into items, joining fragmented values.
///
/// # Errors
/// Returns `Error::ProtocolDecode` if the buffer is larger than
/// [`MAX_BUFFER_LEN`] or an item's declared length runs past the end.
pub fn decode(bytes: &[u8]) -> Result<Vec<TlvItem>> {
    if bytes.len() > MAX_BUFFER_LEN {
        return Err(Error::protocol(format!(
            "TLV8 buffer of {} bytes exceeds {MAX_BUFFER_LEN}",
            bytes.len()
        )));
    }

    let mut items: Vec<TlvItem> = Vec::new();
    // Length of the previous fragment, used to decide whether to join.
    let mut last_fragment_len = 0usize;
    let mut pos = 0usize;

    while pos < bytes.len() {
        let (Some(&tag), Some(&len)) = (bytes.get(pos), bytes.get(pos + 1)) else {
            return Err(Error::protocol(format!("truncated TLV8 header at offset {pos}")));
        };
        let len = len as usize;
        let start = pos + 2;
        let value = bytes.get(start..start + len).ok_or_else(|| {
            Error::protocol(format!(
                "TLV8 item {tag:02x} at offset {pos} declares {len} bytes, {} available",
                bytes.len() - start
            ))
        })?;

        match items.last_mut() {
            Some(prev) if prev.tag == tag && last_fragment_len == MAX_FRAGMENT_LEN => {
                prev.value.extend_from_slice(value);
            }
            _ => items.push(TlvItem::new(tag, value)),
        }

        last_fragment_len = len;
        pos = start + len;
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty_value() {
        let bytes = Tlv8Writer::new().put(0x03, &[]).finish();
        assert_eq!(&bytes[..], &[0x03, 0x00]);
    }

    #[test]
    fn test_separator_keeps_records_apart() {
        let bytes = Tlv8Writer::new()
            .put(0x03, b"a")
            .separator()
            .put(0x03, b"b")
            .finish();
        let items = decode(&bytes).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1], TlvItem::new(SEPARATOR_TAG, Vec::new()));
        assert_eq!(items[0].value, b"a");
        assert_eq!(items[2].value, b"b");
    }

    #[test]
    fn test_long_value_fragments_and_joins() {
        let value: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let bytes = Tlv8Writer::new().put(0x02, &value).finish();

        // 255 + 255 + 90 bytes, each with a 2 byte header
        assert_eq!(bytes.len(), 600 + 3 * 2);
        assert_eq!(bytes[1], 255);
        assert_eq!(bytes[257 + 1], 255);
        assert_eq!(bytes[514 + 1], 90);

        let items = decode(&bytes).unwrap();
        assert_eq!(items, vec![TlvItem::new(0x02, value)]);
    }

    #[test]
    fn test_short_same_tag_items_not_joined() {
        let items = decode(&[0x03, 0x01, 0xAA, 0x03, 0x01, 0xBB]).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(decode(&[0x01]), Err(Error::ProtocolDecode(_))));
    }

    #[test]
    fn test_truncated_value() {
        assert!(matches!(
            decode(&[0x01, 0x05, 0x00]),
            Err(Error::ProtocolDecode(_))
        ));
    }

    #[test]
    fn test_empty_buffer_decodes_to_nothing() {
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_as_u8() {
        assert_eq!(TlvItem::new(1, vec![7]).as_u8().unwrap(), 7);
        assert!(TlvItem::new(1, vec![7, 8]).as_u8().is_err());
        assert!(TlvItem::new(1, Vec::new()).as_u8().is_err());
    }
}

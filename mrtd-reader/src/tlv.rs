//! BER-TLV encoding as used by Secure Messaging data objects and the LDS data groups.
//!
//! Tags may span multiple bytes: if the lower five bits of the first byte are all set, the tag
//! continues with further bytes as long as their top bit is set. Lengths use the definite form;
//! short form lengths are a single byte below 0x80, long form lengths are `0x80 | n` followed by
//! `n` big-endian length bytes.


use std::fmt;


/// The longest long-form length we accept, in bytes.
const MAX_LENGTH_BYTES: usize = 4;

/// The longest tag we accept, in bytes.
const MAX_TAG_BYTES: usize = 3;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, thiserror::Error)]
pub enum TlvError {
    #[error("unexpected end of data while decoding a tag at offset {offset}")]
    TruncatedTag { offset: usize },

    #[error("tag at offset {offset} is longer than three bytes")]
    TagTooLong { offset: usize },

    #[error("unexpected end of data while decoding a length at offset {offset}")]
    TruncatedLength { offset: usize },

    #[error("unsupported length encoding 0x{first_byte:02X} at offset {offset}")]
    UnsupportedLength { offset: usize, first_byte: u8 },

    #[error("value of {length} bytes at offset {offset} runs past the end of the {available} available bytes")]
    ValueOverrun { offset: usize, length: usize, available: usize },
}


/// A tag, with all its bytes packed big-endian into an integer.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tag(pub u32);
impl Tag {
    /// Whether the tag denotes a constructed (nested) value.
    pub const fn is_constructed(&self) -> bool {
        let first_byte = if self.0 > 0xFFFF {
            self.0 >> 16
        } else if self.0 > 0xFF {
            self.0 >> 8
        } else {
            self.0
        };
        first_byte & 0x20 != 0
    }

    /// The encoded bytes of the tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let bytes = self.0.to_be_bytes();
        let first_nonzero = bytes.iter().position(|b| *b != 0x00).unwrap_or(bytes.len() - 1);
        bytes[first_nonzero..].to_vec()
    }
}
impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag(0x{:02X})", self.0)
    }
}
impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}


/// A decoded data object borrowing its value from the input buffer.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tlv<'d> {
    pub tag: Tag,

    /// The raw tag and length bytes as they appeared in the input.
    pub header: &'d [u8],

    pub value: &'d [u8],
}
impl<'d> Tlv<'d> {
    /// Iterates over the data objects nested in this one's value.
    pub fn children(&self) -> TlvReader<'d> {
        TlvReader::new(self.value)
    }

    /// The total encoded size of this data object.
    pub fn encoded_len(&self) -> usize {
        self.header.len() + self.value.len()
    }
}


/// Encode a BER length.
pub fn encode_length(output: &mut Vec<u8>, length: usize) {
    if length < 128 {
        // single-byte encoding
        output.push(length as u8);
    } else {
        // 0b1nnn_nnnn and then n additional bytes that actually specify the length
        // (big-endian)
        let length_bytes = length.to_be_bytes();
        let first_nonzero = length_bytes.iter().position(|b| *b != 0x00).unwrap_or(length_bytes.len() - 1);
        let trimmed_length_slice = &length_bytes[first_nonzero..];
        output.push(0b1000_0000 | trimmed_length_slice.len() as u8);
        output.extend(trimmed_length_slice);
    }
}

/// Encode a full data object.
pub fn write_tlv(output: &mut Vec<u8>, tag: Tag, value: &[u8]) {
    output.extend(tag.to_bytes());
    encode_length(output, value.len());
    output.extend(value);
}

/// Decode a BER tag at the beginning of `input`.
///
/// Returns the tag and the number of bytes it occupied. `offset` is only used for error
/// reporting.
pub fn decode_tag(input: &[u8], offset: usize) -> Result<(Tag, usize), TlvError> {
    let first = *input.first().ok_or(TlvError::TruncatedTag { offset })?;
    let mut tag = u32::from(first);
    let mut consumed = 1;
    if first & 0b0001_1111 == 0b0001_1111 {
        // subsequent bytes follow while their top bit is set
        loop {
            let next = *input.get(consumed).ok_or(TlvError::TruncatedTag { offset })?;
            consumed += 1;
            if consumed > MAX_TAG_BYTES {
                return Err(TlvError::TagTooLong { offset });
            }
            tag = (tag << 8) | u32::from(next);
            if next & 0b1000_0000 == 0 {
                break;
            }
        }
    }
    Ok((Tag(tag), consumed))
}

/// Decode a BER definite length at the beginning of `input`.
///
/// Returns the length and the number of bytes it occupied. `offset` is only used for error
/// reporting.
pub fn decode_length(input: &[u8], offset: usize) -> Result<(usize, usize), TlvError> {
    let start_byte = *input.first().ok_or(TlvError::TruncatedLength { offset })?;
    if start_byte & 0b1000_0000 == 0 {
        return Ok((usize::from(start_byte), 1));
    }

    // multiple bytes; zero of them would be the indefinite form, which DER forbids
    let length_byte_count = usize::from(start_byte & 0b0111_1111);
    if length_byte_count == 0 || length_byte_count > MAX_LENGTH_BYTES {
        return Err(TlvError::UnsupportedLength { offset, first_byte: start_byte });
    }
    let length_bytes = input.get(1..1 + length_byte_count)
        .ok_or(TlvError::TruncatedLength { offset })?;
    let length = length_bytes.iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    Ok((length, 1 + length_byte_count))
}


/// Iterates over consecutive data objects in a buffer.
///
/// After the first error, the iterator is exhausted.
#[derive(Clone, Debug)]
pub struct TlvReader<'d> {
    buf: &'d [u8],
    position: usize,
    failed: bool,
}
impl<'d> TlvReader<'d> {
    pub const fn new(buf: &'d [u8]) -> Self {
        Self { buf, position: 0, failed: false }
    }

    /// The current offset into the buffer.
    pub const fn position(&self) -> usize {
        self.position
    }

    fn read_next(&mut self) -> Result<Tlv<'d>, TlvError> {
        let buf = self.buf;
        let start = self.position;
        let rest = &buf[start..];
        let (tag, tag_len) = decode_tag(rest, start)?;
        let (length, length_len) = decode_length(&rest[tag_len..], start + tag_len)?;
        let header_len = tag_len + length_len;
        let available = rest.len() - header_len;
        if length > available {
            return Err(TlvError::ValueOverrun { offset: start, length, available });
        }
        self.position = start + header_len + length;
        Ok(Tlv {
            tag,
            header: &rest[..header_len],
            value: &rest[header_len..header_len + length],
        })
    }

    /// Returns the first data object with the given tag, skipping others by length.
    pub fn find(&mut self, tag: Tag) -> Result<Option<Tlv<'d>>, TlvError> {
        for tlv in self.by_ref() {
            let tlv = tlv?;
            if tlv.tag == tag {
                return Ok(Some(tlv));
            }
        }
        Ok(None)
    }
}
impl<'d> Iterator for TlvReader<'d> {
    type Item = Result<Tlv<'d>, TlvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.buf.len() {
            return None;
        }
        let result = self.read_next();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Decodes the single data object at the beginning of `buf`, ignoring anything after it.
pub fn read_first(buf: &[u8]) -> Result<Tlv<'_>, TlvError> {
    TlvReader::new(buf).next()
        .unwrap_or(Err(TlvError::TruncatedTag { offset: 0 }))
}

/// Decodes only the tag and length at the beginning of `buf`.
///
/// Returns `(tag, header length, value length)`; the value itself need not be present yet.
pub fn decode_header(buf: &[u8]) -> Result<(Tag, usize, usize), TlvError> {
    let (tag, tag_len) = decode_tag(buf, 0)?;
    let (length, length_len) = decode_length(&buf[tag_len..], tag_len)?;
    Ok((tag, tag_len + length_len, length))
}

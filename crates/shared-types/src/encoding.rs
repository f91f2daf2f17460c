//! # Consensus Encoding
//!
//! Little-endian integers, CompactSize length prefixes and length-prefixed
//! vectors. Encoding is infallible and appends to a `Vec<u8>`; decoding reads
//! from a borrowed [`Reader`] and never consumes past the end of its input.

use crate::errors::EncodingError;

/// A value with a bit-exact wire representation.
pub trait Encodable {
    fn encode(&self, out: &mut Vec<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// A value that can be read back from its wire representation.
pub trait Decodable: Sized {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError>;

    /// Decode from the start of `bytes`. Trailing bytes are ignored, matching
    /// how peers treat payload extensions they do not understand.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut reader = Reader::new(bytes);
        Self::decode(&mut reader)
    }
}

/// Cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], EncodingError> {
        if self.remaining() < n {
            return Err(EncodingError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], EncodingError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, EncodingError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, EncodingError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, EncodingError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Ports in network addresses are big-endian.
    pub fn read_u16_be(&mut self) -> Result<u16, EncodingError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, EncodingError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, EncodingError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, EncodingError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64_le(&mut self) -> Result<i64, EncodingError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Read a CompactSize, rejecting non-minimal encodings.
    pub fn read_compact_size(&mut self) -> Result<u64, EncodingError> {
        let first = self.read_u8()?;
        let (value, min) = match first {
            0xfd => (u64::from(self.read_u16_le()?), 0xfd),
            0xfe => (u64::from(self.read_u32_le()?), 0x1_0000),
            0xff => (self.read_u64_le()?, 0x1_0000_0000),
            n => return Ok(u64::from(n)),
        };
        if value < min {
            return Err(EncodingError::NonCanonicalCompactSize(value));
        }
        Ok(value)
    }

    /// Read a CompactSize that will be used as an element count or index.
    pub fn read_compact_usize(&mut self) -> Result<usize, EncodingError> {
        let value = self.read_compact_size()?;
        usize::try_from(value).map_err(|_| EncodingError::Oversized {
            field: "compact size",
            len: value,
            max: usize::MAX as u64,
        })
    }

    /// Read a CompactSize-prefixed byte string of at most `max` bytes.
    pub fn read_var_bytes(&mut self, field: &'static str, max: usize) -> Result<Vec<u8>, EncodingError> {
        let len = self.read_compact_size()?;
        if len > max as u64 {
            return Err(EncodingError::Oversized {
                field,
                len,
                max: max as u64,
            });
        }
        Ok(self.read_bytes(len as usize)?.to_vec())
    }

    /// Read a CompactSize-prefixed string. Invalid UTF-8 is replaced rather
    /// than rejected; peers are free to send arbitrary bytes here.
    pub fn read_var_str(&mut self, field: &'static str, max: usize) -> Result<String, EncodingError> {
        let raw = self.read_var_bytes(field, max)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Read a CompactSize-prefixed vector of `T`.
    pub fn read_vec<T: Decodable>(&mut self) -> Result<Vec<T>, EncodingError> {
        let count = self.read_compact_usize()?;
        // Every element takes at least one byte, so a count beyond the
        // remaining input is a truncated payload, not an allocation request.
        if count > self.remaining() {
            return Err(EncodingError::UnexpectedEof {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }
}

pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub fn write_var_str(out: &mut Vec<u8>, s: &str) {
    write_var_bytes(out, s.as_bytes());
}

pub fn write_vec<T: Encodable>(out: &mut Vec<u8>, items: &[T]) {
    write_compact_size(out, items.len() as u64);
    for item in items {
        item.encode(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn compact(n: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_compact_size(&mut out, n);
        out
    }

    #[test]
    fn test_compact_size_boundaries() {
        assert_eq!(compact(0xfc), vec![0xfc]);
        assert_eq!(compact(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(compact(0x1_0000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(compact(0x1_0000_0000).len(), 9);
    }

    #[test]
    fn test_non_canonical_compact_size_rejected() {
        let mut reader = Reader::new(&[0xfd, 0x10, 0x00]);
        assert_eq!(
            reader.read_compact_size(),
            Err(EncodingError::NonCanonicalCompactSize(0x10))
        );
    }

    #[test]
    fn test_read_past_end_fails_without_consuming() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert!(reader.read_u32_le().is_err());
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_u16_le().unwrap(), 0x0201);
    }

    #[test]
    fn test_var_bytes_limit() {
        let mut data = Vec::new();
        write_var_bytes(&mut data, &[7u8; 20]);
        let mut reader = Reader::new(&data);
        assert!(matches!(
            reader.read_var_bytes("script", 10),
            Err(EncodingError::Oversized { len: 20, .. })
        ));
    }

    #[test]
    fn test_vec_count_larger_than_input() {
        // Claims 1000 elements with only two bytes following.
        let data = [0xfd, 0xe8, 0x03, 0x00, 0x00];
        let mut reader = Reader::new(&data);
        assert!(reader.read_vec::<crate::Hash256>().is_err());
    }

    proptest! {
        #[test]
        fn prop_compact_size_decodes_to_input(n in any::<u64>()) {
            let bytes = compact(n);
            let mut reader = Reader::new(&bytes);
            prop_assert_eq!(reader.read_compact_size().unwrap(), n);
            prop_assert!(reader.is_empty());
        }
    }
}

#![forbid(unsafe_code)]
//! Encoding, varint, and buffer utilities shared across storage layers.

pub mod ord {
    //! Order-preserving encoders for fixed-width keys.

    const U64_LEN: usize = core::mem::size_of::<u64>();

    /// Decodes a u64 from big-endian byte order, or `None` if `src` is short.
    pub fn get_u64_be(src: &[u8]) -> Option<u64> {
        let head: [u8; U64_LEN] = src.get(..U64_LEN)?.try_into().ok()?;
        Some(u64::from_be_bytes(head))
    }

    /// Smallest key strictly greater than every key starting with `prefix`.
    ///
    /// Returns `None` when the prefix is all `0xff` (no upper bound exists).
    pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
        let mut succ = prefix.to_vec();
        while let Some(last) = succ.pop() {
            if last < u8::MAX {
                succ.push(last + 1);
                return Some(succ);
            }
        }
        None
    }
}

pub mod var {
    //! Unsigned varints.

    use crate::types::{Result, TdbError};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(TdbError::Corruption("varint truncated"))?;
            *off += 1;
            let payload = u64::from(byte & 0x7f);
            if i == 9 && payload > 1 {
                return Err(TdbError::Corruption("varint overflows 64 bits"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(TdbError::Corruption("varint longer than 10 bytes"))
    }
}

pub mod buf {
    //! A slice-backed cursor for parsing untrusted bytes.

    use core::fmt;

    use crate::types::{Result, TdbError};

    use super::var;

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes, failing if fewer remain.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .filter(|end| *end <= self.buf.len())
                .ok_or(TdbError::Corruption("cursor read beyond buffer"))?;
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a big-endian u16.
        pub fn u16_be(&mut self) -> Result<u16> {
            let bytes = self.take(2)?;
            Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
        }

        /// Reads a big-endian u64.
        pub fn u64_be(&mut self) -> Result<u64> {
            let bytes = self.take(8)?;
            super::ord::get_u64_be(bytes).ok_or(TdbError::Corruption("u64 truncated"))
        }

        /// Reads an unsigned varint.
        pub fn varint(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads a varint length followed by that many bytes.
        pub fn len_prefixed(&mut self) -> Result<&'a [u8]> {
            let len = usize::try_from(self.varint()?)
                .map_err(|_| TdbError::Corruption("length prefix overflows usize"))?;
            self.take(len)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Current read offset.
        pub fn position(&self) -> usize {
            self.off
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}

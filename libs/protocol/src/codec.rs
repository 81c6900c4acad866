//! Primitive field encodings.
//!
//! Wire format (all integers big-endian unless noted):
//! - VarInt: 1-5 bytes, 7 data bits per byte, least-significant group first,
//!   high bit set on every byte except the last
//! - String: VarInt byte length followed by UTF-8 bytes
//! - Byte array: VarInt length followed by raw bytes
//! - UUID: 16 raw bytes

use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Maximum encoded width of a VarInt.
pub const MAX_VARINT_LEN: usize = 5;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Number of bytes `value` occupies when VarInt-encoded.
pub fn varint_len(value: i32) -> usize {
    let mut x = value as u32;
    let mut len = 1;
    while x >= u32::from(CONTINUE_BIT) {
        x >>= 7;
        len += 1;
    }
    len
}

/// Decode a VarInt from the front of `bytes` without consuming anything.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the value and
/// the number of bytes it occupied.
pub(crate) fn peek_varint(bytes: &[u8]) -> Result<Option<(i32, usize)>, ProtocolError> {
    let mut result: u32 = 0;
    for (i, byte) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        result |= u32::from(byte & SEGMENT_BITS) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(Some((result as i32, i + 1)));
        }
    }
    if bytes.len() >= MAX_VARINT_LEN {
        return Err(ProtocolError::VarIntTooLong {
            max: MAX_VARINT_LEN,
        });
    }
    Ok(None)
}

/// Checked reads of protocol fields from a [`Buf`].
pub trait PacketBufExt: Buf {
    fn get_varint(&mut self) -> Result<i32, ProtocolError> {
        let mut result: u32 = 0;
        for i in 0..MAX_VARINT_LEN {
            if !self.has_remaining() {
                return Err(ProtocolError::Truncated("varint"));
            }
            let byte = self.get_u8();
            result |= u32::from(byte & SEGMENT_BITS) << (7 * i);
            if byte & CONTINUE_BIT == 0 {
                return Ok(result as i32);
            }
        }
        Err(ProtocolError::VarIntTooLong {
            max: MAX_VARINT_LEN,
        })
    }

    fn get_checked_u8(&mut self) -> Result<u8, ProtocolError> {
        if self.remaining() < 1 {
            return Err(ProtocolError::Truncated("u8"));
        }
        Ok(self.get_u8())
    }

    fn get_checked_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.get_checked_u8()? != 0)
    }

    fn get_checked_u16(&mut self) -> Result<u16, ProtocolError> {
        if self.remaining() < 2 {
            return Err(ProtocolError::Truncated("u16"));
        }
        Ok(self.get_u16())
    }

    fn get_checked_i64(&mut self) -> Result<i64, ProtocolError> {
        if self.remaining() < 8 {
            return Err(ProtocolError::Truncated("i64"));
        }
        Ok(self.get_i64())
    }

    fn get_uuid(&mut self) -> Result<Uuid, ProtocolError> {
        if self.remaining() < 16 {
            return Err(ProtocolError::Truncated("uuid"));
        }
        Ok(Uuid::from_u128(self.get_u128()))
    }

    /// Read a string of at most `max_chars` characters.
    fn get_string(&mut self, max_chars: usize) -> Result<String, ProtocolError> {
        let len = self.get_varint()?;
        let len = usize::try_from(len).map_err(|_| ProtocolError::NegativeLength(len, "string"))?;
        // A character is at most four UTF-8 bytes.
        if len > max_chars * 4 {
            return Err(ProtocolError::StringTooLong {
                len,
                max: max_chars,
            });
        }
        if self.remaining() < len {
            return Err(ProtocolError::Truncated("string"));
        }
        let mut raw = vec![0u8; len];
        self.copy_to_slice(&mut raw);
        let value = String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        if value.chars().count() > max_chars {
            return Err(ProtocolError::StringTooLong {
                len,
                max: max_chars,
            });
        }
        Ok(value)
    }

    /// Read a VarInt-prefixed byte array of at most `max_len` bytes.
    fn get_byte_array(&mut self, max_len: usize) -> Result<Vec<u8>, ProtocolError> {
        let len = self.get_varint()?;
        let len =
            usize::try_from(len).map_err(|_| ProtocolError::NegativeLength(len, "byte array"))?;
        if len > max_len || self.remaining() < len {
            return Err(ProtocolError::Truncated("byte array"));
        }
        let mut raw = vec![0u8; len];
        self.copy_to_slice(&mut raw);
        Ok(raw)
    }
}

/// Writes of protocol fields into a [`BufMut`].
pub trait PacketBufMutExt: BufMut {
    fn put_varint(&mut self, value: i32) {
        let mut x = value as u32;
        loop {
            let mut byte = (x & u32::from(SEGMENT_BITS)) as u8;
            x >>= 7;
            if x != 0 {
                byte |= CONTINUE_BIT;
            }
            self.put_u8(byte);
            if x == 0 {
                break;
            }
        }
    }

    fn put_string(&mut self, value: &str) {
        self.put_varint(value.len() as i32);
        self.put_slice(value.as_bytes());
    }

    fn put_byte_array(&mut self, value: &[u8]) {
        self.put_varint(value.len() as i32);
        self.put_slice(value);
    }

    fn put_uuid(&mut self, value: &Uuid) {
        self.put_u128(value.as_u128());
    }
}

impl<B: Buf + ?Sized> PacketBufExt for B {}
impl<B: BufMut + ?Sized> PacketBufMutExt for B {}

//! Primitive field encodings shared by every packet.

use crate::error::{MqttError, Result};

/// Largest value a 4-byte remaining-length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Append `len` as a base-128 remaining-length field.
///
/// Low-order 7-bit group first; every byte but the last has bit 7 set.
pub fn encode_remaining_length(len: usize, out: &mut Vec<u8>) -> Result<()> {
    if len > MAX_REMAINING_LENGTH {
        return Err(MqttError::RemainingLengthTooLarge(len));
    }

    let mut len = len;
    loop {
        let mut digit = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            digit |= 0x80;
        }
        out.push(digit);
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decode a remaining-length field from the start of `buf`.
///
/// Returns `(value, bytes_used)`, or `None` when `buf` ends before the
/// terminating byte.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (i, byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(MqttError::MalformedRemainingLength);
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }

    if buf.len() >= 4 {
        Err(MqttError::MalformedRemainingLength)
    } else {
        Ok(None)
    }
}

/// Append a UTF-8 string with its two-byte big-endian length prefix.
pub fn encode_string(s: &str, out: &mut Vec<u8>) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| MqttError::StringTooLong(s.len()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Encoded size of a length-prefixed string.
pub fn string_len(s: &str) -> usize {
    2 + s.len()
}

/// Read-side cursor over a frame body.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    kind: &'static str,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8], kind: &'static str) -> Self {
        Self { buf, pos: 0, kind }
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| MqttError::malformed(self.kind, "truncated"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                MqttError::malformed(
                    self.kind,
                    format!("needs {} bytes, {} left", n, self.buf.len() - self.pos),
                )
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| MqttError::malformed(self.kind, "string is not valid UTF-8"))
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

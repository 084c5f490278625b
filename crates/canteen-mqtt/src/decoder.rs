//! Frame reassembly over a byte stream.
//!
//! TCP hands us bytes at arbitrary boundaries: a frame may arrive in several
//! reads, and one read may hold several frames. [`FrameDecoder`] buffers
//! until a whole frame is present and yields frames strictly in order.

use crate::codec::decode_remaining_length;
use crate::error::{MqttError, Result};
use crate::packet::Packet;

/// Default upper bound on an accepted inbound frame.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024;

pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Bytes still to be thrown away from an oversized frame.
    discard: usize,
    max_packet_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            discard: 0,
            max_packet_size,
        }
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, mut bytes: &[u8]) {
        if self.discard > 0 {
            let skip = self.discard.min(bytes.len());
            self.discard -= skip;
            bytes = &bytes[skip..];
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete packet out of the buffer.
    ///
    /// `Ok(None)` means more bytes are needed. An `Err` drops exactly the
    /// offending frame, so calling again continues with the next one; a
    /// malformed remaining length leaves nothing to resynchronize on and
    /// clears the buffer.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if self.buf.len() < 2 {
                return Ok(None);
            }

            let (len, len_bytes) = match decode_remaining_length(&self.buf[1..]) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.buf.clear();
                    return Err(e);
                }
            };

            let total = 1 + len_bytes + len;
            if total > self.max_packet_size {
                let buffered = self.buf.len().min(total);
                self.buf.drain(..buffered);
                self.discard = total - buffered;
                return Err(MqttError::PacketTooLarge(total));
            }
            if self.buf.len() < total {
                return Ok(None);
            }

            let frame: Vec<u8> = self.buf.drain(..total).collect();
            match Packet::decode(frame[0], &frame[1 + len_bytes..])? {
                Some(packet) => return Ok(Some(packet)),
                None => {
                    tracing::debug!(header = frame[0], "Ignoring unsupported packet type");
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

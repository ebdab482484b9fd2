//! Wire framing for `[opcode][length][payload]` packets.
//!
//! Opcode and length are carried in the protocol's compact variable-length
//! unsigned integer encoding ("CUInt"): values below `0x80` occupy one byte,
//! below `0x4000` two bytes (`value | 0x8000`, big-endian), below
//! `0x2000_0000` four bytes (`value | 0xC000_0000`, big-endian), and anything
//! larger five bytes (an `0xE0` marker followed by the value as a big-endian
//! `u32`). The decoder dispatches on the top bits of the first byte.
//!
//! [`PacketCodec`] implements `tokio_util`'s [`Decoder`] and [`Encoder`] so a
//! socket read half can be driven as a `FramedRead` of [`Packet`]s.
//! Incomplete frames leave the buffer untouched and yield `Ok(None)`;
//! retained unparsed bytes are capped at `buffer_size`, and consumed
//! front-of-buffer space is reclaimed once it passes the
//! `buffer_free_space_gc` threshold so long-lived connections cannot grow the
//! buffer without bound.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::{config::ProxyConfig, packet::Packet};

/// Errors raised while decoding or encoding packet frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A frame declared a payload larger than the configured buffer.
    #[error("frame payload of {length} bytes exceeds buffer capacity of {capacity} bytes")]
    FrameTooLarge {
        /// Payload length declared by the frame header.
        length: usize,
        /// Configured maximum for retained unparsed bytes.
        capacity: usize,
    },
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Append `value` to `dst` in the compact variable-length encoding.
pub fn put_cuint(value: u32, dst: &mut BytesMut) {
    if value < 0x80 {
        #[allow(clippy::cast_possible_truncation)]
        dst.put_u8(value as u8);
    } else if value < 0x4000 {
        #[allow(clippy::cast_possible_truncation)]
        dst.put_u16(value as u16 | 0x8000);
    } else if value < 0x2000_0000 {
        dst.put_u32(value | 0xC000_0000);
    } else {
        dst.put_u8(0xE0);
        dst.put_u32(value);
    }
}

/// Number of bytes a compact-encoded value starting with `first` occupies.
fn cuint_width(first: u8) -> usize {
    match first & 0xE0 {
        0xE0 => 5,
        0xC0 => 4,
        0x80 | 0xA0 => 2,
        _ => 1,
    }
}

/// Read one compact-encoded value from the front of `buf`.
///
/// Returns the value and the number of bytes it occupied, or `None` when the
/// buffer does not yet hold the whole encoding.
fn get_cuint(buf: &[u8]) -> Option<(u32, usize)> {
    let first = *buf.first()?;
    let width = cuint_width(first);
    if buf.len() < width {
        return None;
    }
    let value = match width {
        5 => u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        4 => u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) & 0x1FFF_FFFF,
        2 => u32::from(u16::from_be_bytes([buf[0], buf[1]]) & 0x3FFF),
        _ => u32::from(first),
    };
    Some((value, width))
}

/// Encode `packet` as a complete `[opcode][length][payload]` frame.
///
/// The length field is recomputed from the payload's current size, so a
/// payload resized by a handler re-frames correctly.
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) {
    dst.reserve(10 + packet.payload.len());
    put_cuint(packet.opcode, dst);
    #[allow(clippy::cast_possible_truncation)]
    put_cuint(packet.payload.len() as u32, dst);
    dst.extend_from_slice(&packet.payload);
}

/// Framing codec converting between raw bytes and [`Packet`]s.
#[derive(Clone, Debug)]
pub struct PacketCodec {
    buffer_size: usize,
    buffer_free_space_gc: usize,
    consumed: usize,
}

impl PacketCodec {
    /// Construct a codec with explicit buffer limits.
    #[must_use]
    pub fn new(buffer_size: usize, buffer_free_space_gc: usize) -> Self {
        Self {
            buffer_size,
            buffer_free_space_gc,
            consumed: 0,
        }
    }

    /// Construct a codec from the proxy configuration's buffer settings.
    #[must_use]
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.buffer_size, config.buffer_free_space_gc)
    }

    /// Maximum number of unparsed bytes retained between reads.
    #[must_use]
    pub fn buffer_size(&self) -> usize { self.buffer_size }

    // Consumed frames keep the backing allocation alive because split-off
    // payloads still reference it. Once the bytes consumed since the last
    // reclaim pass the gc threshold, move the remainder into a fresh buffer
    // so the old allocation can be freed as payloads are dropped.
    fn reclaim(&mut self, src: &mut BytesMut) {
        if self.consumed < self.buffer_free_space_gc {
            return;
        }
        self.consumed = 0;
        let mut fresh = BytesMut::with_capacity(src.len());
        fresh.extend_from_slice(src);
        *src = fresh;
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        let Some((opcode, opcode_width)) = get_cuint(&src[..]) else {
            return Ok(None);
        };
        let Some((length, length_width)) = get_cuint(&src[opcode_width..]) else {
            return Ok(None);
        };
        let length = length as usize;
        if length > self.buffer_size {
            return Err(CodecError::FrameTooLarge {
                length,
                capacity: self.buffer_size,
            });
        }
        let header = opcode_width + length_width;
        if src.len() < header + length {
            src.reserve(header + length - src.len());
            return Ok(None);
        }
        src.advance(header);
        let payload = src.split_to(length);
        self.consumed += header + length;
        self.reclaim(src);
        Ok(Some(Packet::from_wire(opcode, length, payload)))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        encode_packet(&packet, dst);
        Ok(())
    }
}

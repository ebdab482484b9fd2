//! The protocol's atomic transmission unit.
//!
//! A [`Packet`] is one decoded wire frame: an opcode identifying the
//! operation plus a mutable payload buffer. Handlers may rewrite both; the
//! length written back to the wire is always recomputed from the payload at
//! encode time, never taken from the header that was parsed.

use bytes::BytesMut;

/// One decoded `[opcode][length][payload]` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Protocol operation identifier.
    pub opcode: u32,
    /// Payload bytes; handlers may grow or shrink this buffer in place.
    pub payload: BytesMut,
    parsed_len: usize,
}

impl Packet {
    /// Build a packet from an opcode and payload bytes.
    #[must_use]
    pub fn new(opcode: u32, payload: impl Into<BytesMut>) -> Self {
        let payload = payload.into();
        let parsed_len = payload.len();
        Self {
            opcode,
            payload,
            parsed_len,
        }
    }

    pub(crate) fn from_wire(opcode: u32, parsed_len: usize, payload: BytesMut) -> Self {
        Self {
            opcode,
            payload,
            parsed_len,
        }
    }

    /// Payload size declared by the frame header at parse time.
    ///
    /// Diagnostic only: re-encoding uses the payload's current size, so this
    /// diverges from [`Packet::len`] once a handler resizes the payload.
    #[must_use]
    pub fn parsed_len(&self) -> usize { self.parsed_len }

    /// Current payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.payload.len() }

    /// Whether the payload is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.payload.is_empty() }
}

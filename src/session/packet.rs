//! Owned packet buffers with reserved encapsulation headroom.
//!
//! A packet keeps its payload at an offset into a heap buffer so the framer
//! can write the outer and inner headers immediately before it, without
//! moving the payload. Control packets also carry the PPP protocol number to
//! stamp at send time.

use crate::protocol::cp::ControlBuilder;
use crate::protocol::framer::OUTER_HEADER_LEN;
use crate::protocol::ppp::PPP_HEADER_MAX;
use crate::{Error, Result};

/// Headroom reserved in front of every outbound payload: outer header plus
/// the largest inner PPP header.
pub const RESERVED_HEADROOM: usize = OUTER_HEADER_LEN + PPP_HEADER_MAX;

/// A chunk of bytes with a reserved header region.
#[derive(Debug)]
pub struct Packet {
    buf: Vec<u8>,
    start: usize,
    len: usize,
    proto: Option<u16>,
}

impl Packet {
    /// Wrap an outbound payload, reserving the standard headroom.
    pub fn with_headroom(payload: &[u8]) -> Self {
        let mut buf = vec![0u8; RESERVED_HEADROOM + payload.len()];
        buf[RESERVED_HEADROOM..].copy_from_slice(payload);
        Self {
            buf,
            start: RESERVED_HEADROOM,
            len: payload.len(),
            proto: None,
        }
    }

    /// Build a control packet for `proto` with the standard headroom.
    pub fn control(proto: u16, code: u8, id: u8, payload: &[u8]) -> Self {
        let body = ControlBuilder::new(code, id).raw_data(payload).build();
        let mut pkt = Self::with_headroom(&body);
        pkt.proto = Some(proto);
        pkt
    }

    /// Allocate an empty receive buffer of `headroom + capacity` bytes.
    pub fn for_recv(headroom: usize, capacity: usize) -> Self {
        Self {
            buf: vec![0u8; headroom + capacity],
            start: 0,
            len: 0,
            proto: None,
        }
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }

    /// PPP protocol number pre-stashed for control packets.
    pub fn proto(&self) -> Option<u16> {
        self.proto
    }

    /// Remaining header region before the payload.
    pub fn headroom(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write `bytes` immediately before the payload, extending the span
    /// backwards into the headroom.
    pub fn prepend(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.start {
            return Err(Error::Internal("packet headroom exhausted"));
        }
        let new_start = self.start - bytes.len();
        self.buf[new_start..self.start].copy_from_slice(bytes);
        self.start = new_start;
        self.len += bytes.len();
        Ok(())
    }

    /// Replace the contents with fully framed wire bytes (HDLC path, where
    /// escaping re-sizes the frame).
    pub fn replace_wire(&mut self, wire: Vec<u8>) {
        self.len = wire.len();
        self.buf = wire;
        self.start = 0;
    }

    /// Whole backing buffer.
    pub(crate) fn buf(&self) -> &[u8] {
        &self.buf
    }

    /// Whole backing buffer, for the receive path to read into.
    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Move `len` payload bytes currently at `from` to `to` and set the span
    /// accordingly (receive-path re-alignment).
    pub(crate) fn realign(&mut self, from: usize, to: usize, len: usize) {
        if from != to {
            self.buf.copy_within(from..from + len, to);
        }
        self.start = to;
        self.len = len;
    }
}

//! Outer F5 encapsulation
//!
//! Every transport datagram is `0xf5 0x00 <be16 len>` followed by the PPP
//! frame, where `len` counts the PPP frame only. With HDLC encapsulation the
//! PPP frame is byte-stuffed; the outer header never is.

use crate::protocol::hdlc::{self, ASYNCMAP_LCP};
use crate::protocol::ppp::{self, LcpOpts, PPP_HEADER_MAX};
use crate::{Error, Result};

/// Outer header size
pub const OUTER_HEADER_LEN: usize = 4;

/// Outer header magic, big-endian
pub const F5_MAGIC: u16 = 0xf500;

/// Encapsulation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encap {
    /// F5 header, raw PPP frame
    F5Raw,
    /// F5 header, HDLC byte-stuffed PPP frame
    F5Hdlc,
}

impl Encap {
    /// Outer header length
    pub fn header_len(self) -> usize {
        OUTER_HEADER_LEN
    }

    pub fn is_hdlc(self) -> bool {
        matches!(self, Encap::F5Hdlc)
    }

    pub fn name(self) -> &'static str {
        match self {
            Encap::F5Raw => "F5",
            Encap::F5Hdlc => "F5 HDLC",
        }
    }
}

/// Asyncmap that governs a frame of the given protocol.
///
/// LCP frames are always escaped with the all-ones map; the peer has not
/// learned our asyncmap while LCP is still in flight.
pub fn frame_asyncmap(proto: u16, out_asyncmap: u32) -> u32 {
    if proto == ppp::protocols::LCP {
        ASYNCMAP_LCP
    } else {
        out_asyncmap
    }
}

/// Encode the raw-path send prefix: outer header followed by the inner PPP
/// header, to be written immediately before a payload of `payload_len`
/// bytes.
pub fn encode_headers(
    proto: u16,
    payload_len: usize,
    opts: LcpOpts,
) -> ([u8; OUTER_HEADER_LEN + PPP_HEADER_MAX], usize) {
    let (ppp_hdr, ppp_len) = ppp::encode_header(proto, opts);

    let mut hdr = [0u8; OUTER_HEADER_LEN + PPP_HEADER_MAX];
    hdr[0..2].copy_from_slice(&F5_MAGIC.to_be_bytes());
    hdr[2..4].copy_from_slice(&((ppp_len + payload_len) as u16).to_be_bytes());
    hdr[4..4 + ppp_len].copy_from_slice(&ppp_hdr[..ppp_len]);

    (hdr, OUTER_HEADER_LEN + ppp_len)
}

/// Encode a complete HDLC-path wire frame: outer header plus the escaped
/// inner header and payload.
pub fn encode_frame_hdlc(
    proto: u16,
    payload: &[u8],
    opts: LcpOpts,
    out_asyncmap: u32,
) -> Vec<u8> {
    let (ppp_hdr, ppp_len) = ppp::encode_header(proto, opts);

    let mut frame = Vec::with_capacity(ppp_len + payload.len());
    frame.extend_from_slice(&ppp_hdr[..ppp_len]);
    frame.extend_from_slice(payload);

    let escaped = hdlc::escape(&frame, frame_asyncmap(proto, out_asyncmap));

    let mut wire = Vec::with_capacity(OUTER_HEADER_LEN + escaped.len());
    wire.extend_from_slice(&F5_MAGIC.to_be_bytes());
    wire.extend_from_slice(&(escaped.len() as u16).to_be_bytes());
    wire.extend_from_slice(&escaped);
    wire
}

/// Validate the outer header of a received datagram and return the PPP frame
/// bytes (still escaped for HDLC encapsulation).
pub fn parse_outer(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < OUTER_HEADER_LEN {
        return Err(Error::OuterHeader(format!(
            "datagram of {} bytes is shorter than the outer header",
            buf.len()
        )));
    }

    let magic = u16::from_be_bytes([buf[0], buf[1]]);
    if magic != F5_MAGIC {
        return Err(Error::OuterHeader(format!("bad magic 0x{:04x}", magic)));
    }

    let payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if buf.len() != OUTER_HEADER_LEN + payload_len {
        return Err(Error::OuterHeader(format!(
            "read {} bytes but header payload_len is {}",
            buf.len(),
            payload_len
        )));
    }

    Ok(&buf[OUTER_HEADER_LEN..])
}

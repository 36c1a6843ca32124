//! PPP framing - RFC 1661
//!
//! Protocol numbers, the negotiated option flags, and the inner PPP header
//! (Address, Control, Protocol) with the optional field compressions.

use crate::{Error, Result};

/// Maximum inner header size: Address(1) + Control(1) + Protocol(2)
pub const PPP_HEADER_MAX: usize = 4;

/// PPP protocol numbers
pub mod protocols {
    /// Internet Protocol version 4
    pub const IP: u16 = 0x0021;
    /// Internet Protocol version 6
    pub const IPV6: u16 = 0x0057;
    /// Internet Protocol Control Protocol
    pub const IPCP: u16 = 0x8021;
    /// IPv6 Control Protocol
    pub const IP6CP: u16 = 0x8057;
    /// Link Control Protocol
    pub const LCP: u16 = 0xc021;
}

/// LCP option flags negotiated per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LcpOpts(u8);

impl LcpOpts {
    /// Address-and-Control-Field Compression
    pub const ACCOMP: LcpOpts = LcpOpts(1);
    /// Protocol-Field Compression
    pub const PFCOMP: LcpOpts = LcpOpts(2);
    /// Van Jacobson TCP/IP compression (recorded, never applied)
    pub const VJCOMP: LcpOpts = LcpOpts(4);

    pub const fn empty() -> Self {
        LcpOpts(0)
    }

    pub fn contains(self, other: LcpOpts) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: LcpOpts) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for LcpOpts {
    type Output = LcpOpts;

    fn bitor(self, rhs: LcpOpts) -> LcpOpts {
        LcpOpts(self.0 | rhs.0)
    }
}

/// Encode the inner PPP header for `proto` under the outgoing option set.
///
/// ACCOMP omits the `ff 03` prefix for non-LCP frames; PFCOMP shortens odd
/// protocol numbers below 0x100 to one byte. LCP frames always carry the
/// full uncompressed header.
pub fn encode_header(proto: u16, opts: LcpOpts) -> ([u8; PPP_HEADER_MAX], usize) {
    let mut hdr = [0u8; PPP_HEADER_MAX];
    let mut n = 0;

    if proto == protocols::LCP || !opts.contains(LcpOpts::ACCOMP) {
        hdr[n] = 0xff; // Address
        hdr[n + 1] = 0x03; // Control
        n += 2;
    }
    if proto == protocols::LCP
        || proto > 0xff
        || proto & 1 == 0
        || !opts.contains(LcpOpts::PFCOMP)
    {
        hdr[n] = (proto >> 8) as u8;
        n += 1;
    }
    hdr[n] = (proto & 0xff) as u8;
    n += 1;

    (hdr, n)
}

/// Parse the inner PPP header under the incoming option set.
///
/// Returns the protocol number and the header length. A missing `ff 03`
/// prefix is tolerated only when the peer negotiated ACCOMP.
pub fn decode_header(frame: &[u8], opts: LcpOpts) -> Result<(u16, usize)> {
    let mut p = 0;

    if frame.len() >= 2 && frame[0] == 0xff && frame[1] == 0x03 {
        p = 2;
    } else if !opts.contains(LcpOpts::ACCOMP) {
        return Err(Error::MalformedPpp(
            "missing address/control field".into(),
        ));
    }

    let first = *frame
        .get(p)
        .ok_or_else(|| Error::MalformedPpp("truncated protocol field".into()))?;

    let proto = if opts.contains(LcpOpts::PFCOMP) && first & 1 == 1 {
        p += 1;
        first as u16
    } else {
        let second = *frame
            .get(p + 1)
            .ok_or_else(|| Error::MalformedPpp("truncated protocol field".into()))?;
        p += 2;
        u16::from_be_bytes([first, second])
    };

    Ok((proto, p))
}

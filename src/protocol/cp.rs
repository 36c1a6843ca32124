//! PPP control-protocol packets - RFC 1661
//!
//! LCP, IPCP and IP6CP share the `code, id, length, options` layout; this
//! module holds the shared packet view, builder, and option tag constants.

use crate::protocol::tlv::TlvReader;
use crate::{Error, Result};

/// Control packet header size (code + identifier + length)
pub const CP_HEADER_SIZE: usize = 4;

/// Control packet codes
pub mod codes {
    /// Configure-Request
    pub const CONFIGURE_REQUEST: u8 = 1;
    /// Configure-Ack
    pub const CONFIGURE_ACK: u8 = 2;
    /// Configure-Nak
    pub const CONFIGURE_NAK: u8 = 3;
    /// Configure-Reject
    pub const CONFIGURE_REJECT: u8 = 4;
    /// Terminate-Request
    pub const TERMINATE_REQUEST: u8 = 5;
    /// Terminate-Ack
    pub const TERMINATE_ACK: u8 = 6;
    /// Code-Reject
    pub const CODE_REJECT: u8 = 7;
    /// Protocol-Reject
    pub const PROTOCOL_REJECT: u8 = 8;
    /// Echo-Request
    pub const ECHO_REQUEST: u8 = 9;
    /// Echo-Reply
    pub const ECHO_REPLY: u8 = 10;
    /// Discard-Request
    pub const DISCARD_REQUEST: u8 = 11;
}

/// LCP option tags
pub mod lcp_opts {
    /// Maximum-Receive-Unit
    pub const MRU: u8 = 1;
    /// Async-Control-Character-Map
    pub const ACCM: u8 = 2;
    /// Magic-Number
    pub const MAGIC_NUMBER: u8 = 5;
    /// Protocol-Field-Compression
    pub const PFC: u8 = 7;
    /// Address-and-Control-Field-Compression
    pub const ACFC: u8 = 8;
}

/// IPCP option tags
pub mod ipcp_opts {
    /// IP-Compression-Protocol
    pub const IP_COMPRESSION: u8 = 2;
    /// IP-Address
    pub const IP_ADDRESS: u8 = 3;
    /// Van Jacobson TCP/IP compression protocol value
    pub const VAN_JACOBSON: u16 = 0x002d;
}

/// IP6CP option tags
pub mod ip6cp_opts {
    /// Interface-Identifier
    pub const INTERFACE_ID: u8 = 1;
}

/// RFC name of a control packet code, for logging.
pub fn code_name(code: u8) -> &'static str {
    match code {
        codes::CONFIGURE_REQUEST => "Configure-Request",
        codes::CONFIGURE_ACK => "Configure-Ack",
        codes::CONFIGURE_NAK => "Configure-Nak",
        codes::CONFIGURE_REJECT => "Configure-Reject",
        codes::TERMINATE_REQUEST => "Terminate-Request",
        codes::TERMINATE_ACK => "Terminate-Ack",
        codes::CODE_REJECT => "Code-Reject",
        codes::PROTOCOL_REJECT => "Protocol-Reject",
        codes::ECHO_REQUEST => "Echo-Request",
        codes::ECHO_REPLY => "Echo-Reply",
        codes::DISCARD_REQUEST => "Discard-Request",
        _ => "Unknown",
    }
}

/// Parsed control packet (zero-copy reference)
#[derive(Debug)]
pub struct ControlPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> ControlPacket<'a> {
    /// Parse a control packet from a PPP payload.
    ///
    /// The embedded length must match the payload length exactly.
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < CP_HEADER_SIZE {
            return Err(Error::MalformedPpp("control packet too short".into()));
        }

        let packet = Self { buffer };

        let length = packet.length() as usize;
        if length < CP_HEADER_SIZE || length != buffer.len() {
            return Err(Error::MalformedPpp(format!(
                "control packet length {} does not match payload {}",
                length,
                buffer.len()
            )));
        }

        Ok(packet)
    }

    /// Code field
    pub fn code(&self) -> u8 {
        self.buffer[0]
    }

    /// Identifier field (for matching requests and responses)
    pub fn identifier(&self) -> u8 {
        self.buffer[1]
    }

    /// Length field (total packet length including header)
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Data (options for Configure-*, magic/reason for the rest)
    pub fn data(&self) -> &'a [u8] {
        &self.buffer[CP_HEADER_SIZE..]
    }

    /// Iterate over the options in the data
    pub fn options(&self) -> TlvReader<'a> {
        TlvReader::new(self.data())
    }
}

/// Builder for control packets
#[derive(Debug, Default)]
pub struct ControlBuilder {
    code: u8,
    identifier: u8,
    data: Vec<u8>,
}

impl ControlBuilder {
    /// Create a new control packet builder
    pub fn new(code: u8, identifier: u8) -> Self {
        Self {
            code,
            identifier,
            data: Vec::new(),
        }
    }

    /// Create Configure-Request builder
    pub fn configure_request(identifier: u8) -> Self {
        Self::new(codes::CONFIGURE_REQUEST, identifier)
    }

    /// Create Configure-Ack builder
    pub fn configure_ack(identifier: u8) -> Self {
        Self::new(codes::CONFIGURE_ACK, identifier)
    }

    /// Create Terminate-Request builder
    pub fn terminate_request(identifier: u8) -> Self {
        Self::new(codes::TERMINATE_REQUEST, identifier)
    }

    /// Create Terminate-Ack builder
    pub fn terminate_ack(identifier: u8) -> Self {
        Self::new(codes::TERMINATE_ACK, identifier)
    }

    /// Create Echo-Request builder carrying a magic number
    pub fn echo_request(identifier: u8, magic: u32) -> Self {
        let mut builder = Self::new(codes::ECHO_REQUEST, identifier);
        builder.data.extend_from_slice(&magic.to_be_bytes());
        builder
    }

    /// Create Echo-Reply builder carrying a magic number
    pub fn echo_reply(identifier: u8, magic: u32) -> Self {
        let mut builder = Self::new(codes::ECHO_REPLY, identifier);
        builder.data.extend_from_slice(&magic.to_be_bytes());
        builder
    }

    /// Add a raw option
    pub fn add_option(mut self, tag: u8, data: &[u8]) -> Self {
        crate::protocol::tlv::append_tlv(&mut self.data, tag, data);
        self
    }

    /// Set raw data (for echoing options or a terminate reason)
    pub fn raw_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    /// Build the control packet
    pub fn build(self) -> Vec<u8> {
        let length = (CP_HEADER_SIZE + self.data.len()) as u16;
        let mut packet = Vec::with_capacity(length as usize);

        packet.push(self.code);
        packet.push(self.identifier);
        packet.extend_from_slice(&length.to_be_bytes());
        packet.extend_from_slice(&self.data);

        packet
    }
}

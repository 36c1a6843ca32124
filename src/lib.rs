//! ppptun - PPP-over-tunnel core
//!
//! Drives the LCP/IPCP/IP6CP negotiation state machines of a VPN client and
//! the encapsulation pipeline that carries IPv4/IPv6 datagrams inside an
//! F5-style outer transport (raw or HDLC-framed). The secure transport, the
//! tun device, and the keepalive policy are external collaborators.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod telemetry;

pub use error::{Error, Result};

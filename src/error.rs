use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("short packet received ({0} bytes)")]
    ShortRead(usize),

    #[error("unexpected pre-PPP packet header: {0}")]
    OuterHeader(String),

    #[error("bad incoming PPP packet: {0}")]
    MalformedPpp(String),

    #[error("unknown proto 0x{proto:04x} option (tag {tag}, len {len}+2)")]
    UnknownOption { proto: u16, tag: u8, len: usize },

    #[error("PPP packet with unknown protocol 0x{0:04x}")]
    UnsupportedProtocol(u16),

    #[error("unexpected PPP state {0}")]
    UnexpectedPhase(&'static str),

    #[error("internal error: {0}")]
    Internal(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

//! The non-blocking byte transport the session runs over.
//!
//! Implemented by the TLS/DTLS layer. Reads and writes never block:
//! "no data" and "stalled" surface as `io::ErrorKind::WouldBlock`. A write
//! that returns `WouldBlock` must later be retried with exactly the same
//! bytes; the session keeps the in-flight packet pinned for that.

use std::io;

pub trait Transport {
    /// Whether the underlying connection is currently up.
    fn connected(&self) -> bool;

    /// Read one datagram into `buf`, returning the byte count.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `buf`, returning the byte count. Partial writes are not part of
    /// the contract: a conforming transport consumes everything or returns
    /// `WouldBlock`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Tear down and re-establish the connection.
    fn reconnect(&mut self) -> io::Result<()>;
}

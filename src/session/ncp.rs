//! Per-protocol negotiation state - RFC 1661
//!
//! Each of LCP, IPCP and IP6CP keeps a progress set over the
//! Configure/Terminate exchange, the id of its own outstanding
//! Configure-Request, and the time that request was last sent.

use std::time::{Duration, Instant};

/// Interval between Configure-Request retransmissions.
///
/// There is no retry cap; a truly stuck session is killed by the
/// keepalive/DPD layer.
pub const CONF_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Progress flags of one control protocol's exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NcpProgress(u8);

impl NcpProgress {
    pub const CONF_REQ_SENT: NcpProgress = NcpProgress(1);
    pub const CONF_REQ_RECEIVED: NcpProgress = NcpProgress(2);
    pub const CONF_ACK_SENT: NcpProgress = NcpProgress(4);
    pub const CONF_ACK_RECEIVED: NcpProgress = NcpProgress(8);
    pub const TERM_REQ_SENT: NcpProgress = NcpProgress(16);
    pub const TERM_REQ_RECEIVED: NcpProgress = NcpProgress(32);
    pub const TERM_ACK_SENT: NcpProgress = NcpProgress(64);
    pub const TERM_ACK_RECEIVED: NcpProgress = NcpProgress(128);

    pub const fn empty() -> Self {
        NcpProgress(0)
    }

    pub fn contains(self, other: NcpProgress) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: NcpProgress) {
        self.0 |= other.0;
    }
}

/// One control protocol's negotiation record.
#[derive(Debug, Default)]
pub struct Ncp {
    /// Exchange progress
    pub progress: NcpProgress,
    /// Identifier of our outgoing Configure-Request
    pub id: u8,
    /// When our Configure-Request was last (re)sent
    pub last_req: Option<Instant>,
}

impl Ncp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both sides have acknowledged: the protocol is up.
    pub fn converged(&self) -> bool {
        self.progress
            .contains(NcpProgress::CONF_ACK_SENT)
            && self.progress.contains(NcpProgress::CONF_ACK_RECEIVED)
    }

    /// Whether our Configure-Request is due for (re)transmission, narrowing
    /// `timeout` to the remaining wait when it is not.
    pub fn retransmit_due(&self, timeout: &mut Duration, now: Instant) -> bool {
        if self.progress.contains(NcpProgress::CONF_ACK_RECEIVED) {
            return false;
        }
        match self.last_req {
            None => true,
            Some(last) => deadline_due(timeout, now, last + CONF_RETRY_INTERVAL),
        }
    }
}

/// True when `deadline` has passed; otherwise narrows `timeout` so the
/// caller wakes up in time for it.
pub fn deadline_due(timeout: &mut Duration, now: Instant, deadline: Instant) -> bool {
    match deadline.checked_duration_since(now) {
        None => true,
        Some(remaining) if remaining.is_zero() => true,
        Some(remaining) => {
            if remaining < *timeout {
                *timeout = remaining;
            }
            false
        }
    }
}

//! Keepalive/DPD policy seam.
//!
//! The timer policy itself lives outside the core; the session only commits
//! rx/tx timestamps to it and consumes one verdict per tick.

use std::time::{Duration, Instant};

/// Verdict of the keepalive/DPD engine for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KaAction {
    /// Nothing to do
    None,
    /// Send a keepalive (LCP Discard-Request) if the link is otherwise idle
    Keepalive,
    /// Probe the peer (LCP Echo-Request)
    Dpd,
    /// Rekey the transport: reconnect
    Rekey,
    /// The peer is dead: reconnect
    DpdDead,
}

pub trait KeepaliveTimer {
    /// A frame was received; called before the frame is dispatched.
    fn mark_rx(&mut self, now: Instant);

    /// A write is being attempted.
    fn mark_tx(&mut self, now: Instant);

    /// Per-tick verdict; may narrow `timeout` to its next deadline.
    fn action(&mut self, now: Instant, timeout: &mut Duration) -> KaAction;

    /// Verdict while an outbound write is stalled; may narrow `timeout`.
    fn stalled_action(&mut self, now: Instant, timeout: &mut Duration) -> KaAction;
}

/// Keepalive engine that never asks for anything; for tests and transports
/// with their own liveness handling.
#[derive(Debug, Default)]
pub struct NullKeepalive;

impl KeepaliveTimer for NullKeepalive {
    fn mark_rx(&mut self, _now: Instant) {}

    fn mark_tx(&mut self, _now: Instant) {}

    fn action(&mut self, _now: Instant, _timeout: &mut Duration) -> KaAction {
        KaAction::None
    }

    fn stalled_action(&mut self, _now: Instant, _timeout: &mut Duration) -> KaAction {
        KaAction::None
    }
}

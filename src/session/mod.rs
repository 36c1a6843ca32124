//! PPP session orchestration.
//!
//! A single cooperative mainloop owns the session, the queues, and the
//! transport: each tick evaluates phase transitions, pumps inbound frames,
//! retries any stalled write, consults the keepalive engine, and services
//! the outbound queues with strict control-before-data priority.

mod exchange;
pub mod keepalive;
pub mod ncp;
pub mod packet;
pub mod queue;
pub mod transport;

pub use keepalive::{KaAction, KeepaliveTimer, NullKeepalive};
pub use packet::Packet;
pub use queue::PacketQueue;
pub use transport::Transport;

use crate::config::IpConfig;
use crate::protocol::cp::codes;
use crate::protocol::framer::{self, Encap};
use crate::protocol::hdlc;
use crate::protocol::ppp::{self, protocols, LcpOpts, PPP_HEADER_MAX};
use crate::session::ncp::Ncp;
use crate::{Error, Result};
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Smallest valid transport datagram; anything shorter ends the session.
const MIN_DATAGRAM: usize = 8;

/// Floor for the per-read buffer: servers send packets larger than the
/// negotiated MTU.
const RECEIVE_FLOOR: usize = 16384;

/// PPP phase - RFC 1661
///
/// Authenticate exists only to be rejected: this core negotiates no
/// authentication protocol, so reaching it is a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Dead,
    Establish,
    Opened,
    Authenticate,
    Network,
    Terminate,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Dead => "DEAD",
            Phase::Establish => "ESTABLISH",
            Phase::Opened => "OPENED",
            Phase::Authenticate => "AUTHENTICATE",
            Phase::Network => "NETWORK",
            Phase::Terminate => "TERMINATE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one mainloop tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing happened; sleep until the (possibly narrowed) timeout
    Idle,
    /// Frames moved or the transport was reconnected
    Progress,
    /// The session is over; tear the transport down
    Done,
}

enum ReadOutcome {
    /// No more inbound data this tick
    WouldBlock,
    /// The transport needs to be re-established
    Reconnect,
    /// One frame consumed; `data` is set when it reached the ingress queue
    Frame { data: bool },
}

enum Flush {
    /// The packet left the transport whole
    Sent,
    /// `WouldBlock`: the packet stays pinned for a byte-identical retry
    Stalled,
    /// The transport needs to be re-established
    Reconnect,
}

/// One PPP-over-tunnel session.
///
/// Created with the encapsulation kind and the IP families to negotiate;
/// mutated solely by [`mainloop_tick`](Self::mainloop_tick).
pub struct PppSession {
    encap: Encap,
    want_ipv4: bool,
    want_ipv6: bool,

    phase: Phase,
    lcp: Ncp,
    ipcp: Ncp,
    ip6cp: Ncp,

    // Outgoing options
    out_asyncmap: u32,
    out_lcp_opts: LcpOpts,
    out_lcp_magic: u32,
    out_peer_addr: Ipv4Addr,
    out_ipv6_int_ident: [u8; 8],
    util_id: u8,

    // Incoming options
    exp_ppp_hdr_size: usize,
    in_asyncmap: u32,
    in_lcp_opts: LcpOpts,
    in_lcp_magic: u32,
    in_peer_addr: Ipv4Addr,
    in_ipv6_int_ident: [u8; 8],

    ip_info: IpConfig,
    alt_data_connected: bool,
    quit_reason: Option<String>,

    control_queue: PacketQueue,
    egress_queue: PacketQueue,
    ingress_queue: PacketQueue,
    current_pkt: Option<Packet>,
}

impl PppSession {
    pub fn new(encap: Encap, want_ipv4: bool, want_ipv6: bool, ip_info: IpConfig) -> Self {
        Self {
            encap,
            want_ipv4,
            want_ipv6,
            phase: Phase::Dead,
            lcp: Ncp::new(),
            ipcp: Ncp::new(),
            ip6cp: Ncp::new(),
            out_asyncmap: 0,
            out_lcp_opts: LcpOpts::empty(),
            out_lcp_magic: 0,
            out_peer_addr: Ipv4Addr::UNSPECIFIED,
            out_ipv6_int_ident: [0; 8],
            util_id: 0,
            exp_ppp_hdr_size: PPP_HEADER_MAX,
            in_asyncmap: 0,
            in_lcp_opts: LcpOpts::empty(),
            in_lcp_magic: 0,
            in_peer_addr: Ipv4Addr::UNSPECIFIED,
            in_ipv6_int_ident: [0; 8],
            ip_info,
            alt_data_connected: false,
            quit_reason: None,
            control_queue: PacketQueue::new(),
            egress_queue: PacketQueue::new(),
            ingress_queue: PacketQueue::new(),
            current_pkt: None,
        }
    }

    /// Current phase, for UX.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Reason the session ended, when the peer or the core supplied one.
    pub fn quit_reason(&self) -> Option<&str> {
        self.quit_reason.as_deref()
    }

    /// Negotiated IP parameters.
    pub fn ip_info(&self) -> &IpConfig {
        &self.ip_info
    }

    /// Peer-supplied IPv4 address, once IPCP has seen one.
    pub fn peer_addr(&self) -> Ipv4Addr {
        self.in_peer_addr
    }

    /// Peer-supplied IPv6 interface identifier, once IP6CP has seen one.
    pub fn peer_ipv6_int_ident(&self) -> [u8; 8] {
        self.in_ipv6_int_ident
    }

    /// Our LCP magic number (zero until the first Configure-Request).
    pub fn lcp_magic(&self) -> u32 {
        self.out_lcp_magic
    }

    /// Queue an IP datagram read from the tun device for transmission.
    pub fn egress_queue_mut(&mut self) -> &mut PacketQueue {
        &mut self.egress_queue
    }

    /// Tunnelled IP datagrams for the tun device to consume.
    pub fn ingress_queue_mut(&mut self) -> &mut PacketQueue {
        &mut self.ingress_queue
    }

    /// Tell the session whether an alternate data transport (e.g. DTLS)
    /// currently owns data flow.
    pub fn set_alt_data_connected(&mut self, connected: bool) {
        self.alt_data_connected = connected;
    }

    /// Run one mainloop tick.
    ///
    /// `readable` hints that the transport has inbound data; `timeout` is
    /// narrowed to the next retransmit or keepalive deadline so the caller
    /// knows how long it may sleep. Fatal conditions are errors; a clean end
    /// of session is [`Tick::Done`].
    pub fn mainloop_tick(
        &mut self,
        transport: &mut dyn Transport,
        keepalive: &mut dyn KeepaliveTimer,
        readable: bool,
        timeout: &mut Duration,
        now: Instant,
    ) -> Result<Tick> {
        let mut work_done = false;

        if !transport.connected() {
            return self.reconnect(transport);
        }

        if let Some(tick) = self.step_phase(timeout, now)? {
            return Ok(tick);
        }

        if readable {
            loop {
                match self.read_one(transport, keepalive, now)? {
                    ReadOutcome::WouldBlock => break,
                    ReadOutcome::Reconnect => return self.reconnect(transport),
                    ReadOutcome::Frame { data } => work_done |= data,
                }
            }
        }

        // A write the transport previously refused must be retried with
        // exactly the same bytes before anything else goes out.
        if self.current_pkt.is_some() {
            match self.flush_current(transport, keepalive, timeout, now)? {
                Flush::Sent => {}
                Flush::Stalled => return Ok(tick_of(work_done)),
                Flush::Reconnect => return self.reconnect(transport),
            }
        }

        match keepalive.action(now, timeout) {
            KaAction::DpdDead => {
                error!("Detected dead peer!");
                return self.reconnect(transport);
            }
            KaAction::Rekey => return self.reconnect(transport),
            KaAction::Keepalive => {
                // No explicit keepalive when real traffic is pending anyway
                let data_pending = !self.alt_data_connected
                    && self.phase == Phase::Network
                    && !self.egress_queue.is_empty();
                if self.control_queue.is_empty() && !data_pending {
                    debug!("Send PPP discard request as keepalive");
                    let id = self.next_util_id();
                    self.queue_config_packet(protocols::LCP, id, codes::DISCARD_REQUEST, &[]);
                }
            }
            KaAction::Dpd => {
                debug!("Send PPP echo request as DPD");
                let id = self.next_util_id();
                let magic = self.out_lcp_magic.to_be_bytes();
                self.queue_config_packet(protocols::LCP, id, codes::ECHO_REQUEST, &magic);
            }
            KaAction::None => {}
        }

        // Service the control queue; then the data queue, if the data phase
        // is open and no alternate transport owns data flow.
        loop {
            let mut next = self.control_queue.dequeue();
            if next.is_none() && !self.alt_data_connected && self.phase == Phase::Network {
                next = self.egress_queue.dequeue();
            }
            let mut pkt = match next {
                Some(pkt) => pkt,
                None => break,
            };

            let proto = match pkt.proto() {
                Some(proto) => proto,
                None => {
                    if pkt.data().first().map_or(false, |b| b & 0xf0 == 0x60) {
                        protocols::IPV6
                    } else {
                        protocols::IP
                    }
                }
            };

            self.encapsulate(&mut pkt, proto)?;
            trace!(
                "Sending proto 0x{:04x} packet ({} bytes total)",
                proto,
                pkt.data().len()
            );
            self.current_pkt = Some(pkt);
            match self.flush_current(transport, keepalive, timeout, now)? {
                Flush::Sent => {}
                Flush::Stalled => return Ok(tick_of(work_done)),
                Flush::Reconnect => return self.reconnect(transport),
            }
        }

        Ok(tick_of(work_done))
    }

    /// Evaluate phase transitions and queue any due Configure-Requests.
    ///
    /// Returns `Some(Tick::Done)` once the session has terminated.
    fn step_phase(&mut self, timeout: &mut Duration, now: Instant) -> Result<Option<Tick>> {
        let last = self.phase;

        if self.phase == Phase::Dead {
            self.phase = Phase::Establish;
        }

        if self.phase == Phase::Establish {
            if self.lcp.converged() {
                self.phase = Phase::Opened;
            } else if self.lcp.retransmit_due(timeout, now) {
                self.lcp.last_req = Some(now);
                self.queue_config_request(protocols::LCP, 1);
            }
        }

        if self.phase == Phase::Opened {
            if self.want_ipv4 && self.ipcp.retransmit_due(timeout, now) {
                self.ipcp.last_req = Some(now);
                self.queue_config_request(protocols::IPCP, 1);
            }
            if self.want_ipv6 && self.ip6cp.retransmit_due(timeout, now) {
                self.ip6cp.last_req = Some(now);
                self.queue_config_request(protocols::IP6CP, 1);
            }

            // Have we configured all the protocols we want?
            let ipv4_up = !self.want_ipv4 || self.ipcp.converged();
            let ipv6_up = !self.want_ipv6 || self.ip6cp.converged();
            if ipv4_up && ipv6_up {
                self.phase = Phase::Network;
            }
        }

        let outcome = match self.phase {
            Phase::Terminate => Some(Tick::Done),
            Phase::Authenticate => {
                self.quit_reason
                    .get_or_insert_with(|| "Unexpected state".to_string());
                return Err(Error::UnexpectedPhase(self.phase.name()));
            }
            _ => None,
        };

        if last != self.phase {
            debug!("PPP state transition from {} to {}", last, self.phase);
            self.log_state();
        }

        Ok(outcome)
    }

    /// Read and dispatch one inbound frame.
    fn read_one(
        &mut self,
        transport: &mut dyn Transport,
        keepalive: &mut dyn KeepaliveTimer,
        now: Instant,
    ) -> Result<ReadOutcome> {
        let receive_mtu = std::cmp::max(RECEIVE_FLOOR, self.ip_info.mtu as usize);
        let encap_len = self.encap.header_len();
        // Anticipate the inner header size so the payload lands at its
        // canonical offset without a copy.
        let rsv_hdr = encap_len + self.exp_ppp_hdr_size;

        // The buffer keeps PPP_HEADER_MAX bytes of slack past the read
        // region: re-aligning a payload whose header was smaller than
        // anticipated shifts it right by up to that much.
        let mut pkt = Packet::for_recv(rsv_hdr, receive_mtu + PPP_HEADER_MAX);
        let read_cap = rsv_hdr + receive_mtu;

        let n = match transport.read(&mut pkt.buf_mut()[..read_cap]) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(ReadOutcome::WouldBlock)
            }
            Err(e) => {
                warn!("Transport read failed: {}", e);
                return Ok(ReadOutcome::Reconnect);
            }
            Ok(0) => {
                warn!("Transport closed by peer");
                return Ok(ReadOutcome::Reconnect);
            }
            Ok(n) => n,
        };

        if n < MIN_DATAGRAM {
            error!("Short packet received ({} bytes)", n);
            self.quit_reason = Some("Short packet received".to_string());
            return Err(Error::ShortRead(n));
        }

        if let Err(e) = framer::parse_outer(&pkt.buf()[..n]) {
            // Soft: log, drop the frame, keep the session up
            warn!("{} for encap {}", e, self.encap.name());
            return Ok(ReadOutcome::Frame { data: false });
        }

        if self.encap.is_hdlc() {
            let frame = hdlc::unescape(&pkt.buf()[encap_len..n])?;
            let (proto, hdr_len) = ppp::decode_header(&frame, self.in_lcp_opts)?;
            keepalive.mark_rx(now);
            return self.dispatch_hdlc(proto, hdr_len, &frame);
        }

        let (proto, hdr_len) = ppp::decode_header(&pkt.buf()[encap_len..n], self.in_lcp_opts)?;
        keepalive.mark_rx(now);

        let payload_off = encap_len + hdr_len;
        let payload_len = n - payload_off;

        match proto {
            protocols::LCP | protocols::IPCP | protocols::IP6CP => {
                let body = &pkt.buf()[payload_off..n];
                self.handle_config_packet(proto, body)?;
                Ok(ReadOutcome::Frame { data: false })
            }
            protocols::IP | protocols::IPV6 => {
                if self.phase != Phase::Network {
                    warn!(
                        "Unexpected IPv{} packet in PPP state {}",
                        if proto == protocols::IPV6 { 6 } else { 4 },
                        self.phase
                    );
                    return Ok(ReadOutcome::Frame { data: false });
                }
                trace!(
                    "Received IPv{} data packet of {} bytes",
                    if proto == protocols::IPV6 { 6 } else { 4 },
                    payload_len
                );
                if payload_off != rsv_hdr {
                    trace!(
                        "Expected {} PPP header bytes but got {}, shifting payload",
                        self.exp_ppp_hdr_size,
                        hdr_len
                    );
                    self.exp_ppp_hdr_size = hdr_len;
                }
                pkt.realign(payload_off, rsv_hdr, payload_len);
                self.ingress_queue.enqueue(pkt);
                Ok(ReadOutcome::Frame { data: true })
            }
            other => Err(Error::UnsupportedProtocol(other)),
        }
    }

    /// Dispatch a frame that was unescaped into its own buffer.
    fn dispatch_hdlc(&mut self, proto: u16, hdr_len: usize, frame: &[u8]) -> Result<ReadOutcome> {
        let payload = &frame[hdr_len..];
        match proto {
            protocols::LCP | protocols::IPCP | protocols::IP6CP => {
                self.handle_config_packet(proto, payload)?;
                Ok(ReadOutcome::Frame { data: false })
            }
            protocols::IP | protocols::IPV6 => {
                if self.phase != Phase::Network {
                    warn!(
                        "Unexpected IPv{} packet in PPP state {}",
                        if proto == protocols::IPV6 { 6 } else { 4 },
                        self.phase
                    );
                    return Ok(ReadOutcome::Frame { data: false });
                }
                trace!(
                    "Received IPv{} data packet of {} bytes",
                    if proto == protocols::IPV6 { 6 } else { 4 },
                    payload.len()
                );
                if hdr_len != self.exp_ppp_hdr_size {
                    self.exp_ppp_hdr_size = hdr_len;
                }
                self.ingress_queue.enqueue(Packet::with_headroom(payload));
                Ok(ReadOutcome::Frame { data: true })
            }
            other => Err(Error::UnsupportedProtocol(other)),
        }
    }

    /// Frame an outbound packet for the wire.
    fn encapsulate(&self, pkt: &mut Packet, proto: u16) -> Result<()> {
        if self.encap.is_hdlc() {
            let wire =
                framer::encode_frame_hdlc(proto, pkt.data(), self.out_lcp_opts, self.out_asyncmap);
            pkt.replace_wire(wire);
        } else {
            let (hdr, n) = framer::encode_headers(proto, pkt.len(), self.out_lcp_opts);
            pkt.prepend(&hdr[..n])?;
        }
        Ok(())
    }

    /// Try to push the pinned packet out. On `WouldBlock` the packet stays
    /// pinned so the retry uses the identical bytes.
    fn flush_current(
        &mut self,
        transport: &mut dyn Transport,
        keepalive: &mut dyn KeepaliveTimer,
        timeout: &mut Duration,
        now: Instant,
    ) -> Result<Flush> {
        let pkt = match self.current_pkt.take() {
            Some(pkt) => pkt,
            None => return Ok(Flush::Sent),
        };

        keepalive.mark_tx(now);
        match transport.write(pkt.data()) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                match keepalive.stalled_action(now, timeout) {
                    KaAction::DpdDead => {
                        error!("Detected dead peer!");
                        Ok(Flush::Reconnect)
                    }
                    _ => {
                        self.current_pkt = Some(pkt);
                        Ok(Flush::Stalled)
                    }
                }
            }
            Err(e) => {
                warn!("Transport write failed: {}", e);
                Ok(Flush::Reconnect)
            }
            Ok(n) if n != pkt.data().len() => {
                error!(
                    "Transport wrote too few bytes! Asked for {}, sent {}",
                    pkt.data().len(),
                    n
                );
                self.quit_reason = Some("Internal error".to_string());
                Err(Error::Internal("short transport write"))
            }
            Ok(_) => Ok(Flush::Sent),
        }
    }

    fn reconnect(&mut self, transport: &mut dyn Transport) -> Result<Tick> {
        self.current_pkt = None;
        if let Err(e) = transport.reconnect() {
            error!("Reconnect failed: {}", e);
            self.quit_reason
                .get_or_insert_with(|| "PPP reconnect failed".to_string());
            return Err(Error::Transport(e.to_string()));
        }
        Ok(Tick::Progress)
    }

    fn next_util_id(&mut self) -> u8 {
        let id = self.util_id;
        self.util_id = self.util_id.wrapping_add(1);
        id
    }

    fn log_state(&self) {
        trace!(
            "Current PPP state: {} (encap {})",
            self.phase,
            self.encap.name()
        );
        trace!(
            "    in: asyncmap=0x{:08x}, lcp_opts={}, lcp_magic=0x{:08x}, peer={}",
            self.in_asyncmap,
            self.in_lcp_opts.bits(),
            self.in_lcp_magic,
            self.in_peer_addr
        );
        trace!(
            "   out: asyncmap=0x{:08x}, lcp_opts={}, lcp_magic=0x{:08x}, peer={}",
            self.out_asyncmap,
            self.out_lcp_opts.bits(),
            self.out_lcp_magic,
            self.out_peer_addr
        );
    }
}

fn tick_of(work_done: bool) -> Tick {
    if work_done {
        Tick::Progress
    } else {
        Tick::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cp::ControlPacket;
    use crate::session::ncp::CONF_RETRY_INTERVAL;
    use std::collections::VecDeque;

    struct MockTransport {
        connected: bool,
        rx: VecDeque<Vec<u8>>,
        tx: Vec<Vec<u8>>,
        attempts: Vec<Vec<u8>>,
        block_writes: usize,
        reconnects: usize,
        fail_reconnect: bool,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                connected: true,
                rx: VecDeque::new(),
                tx: Vec::new(),
                attempts: Vec::new(),
                block_writes: 0,
                reconnects: 0,
                fail_reconnect: false,
            }
        }

        fn push_rx(&mut self, frame: &[u8]) {
            self.rx.push_back(frame.to_vec());
        }
    }

    impl Transport for MockTransport {
        fn connected(&self) -> bool {
            self.connected
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.rx.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.attempts.push(buf.to_vec());
            if self.block_writes > 0 {
                self.block_writes -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.tx.push(buf.to_vec());
            Ok(buf.len())
        }

        fn reconnect(&mut self) -> io::Result<()> {
            self.reconnects += 1;
            if self.fail_reconnect {
                return Err(io::ErrorKind::ConnectionRefused.into());
            }
            self.connected = true;
            Ok(())
        }
    }

    struct MockKeepalive {
        verdicts: VecDeque<KaAction>,
        stalled_verdict: KaAction,
        rx_marks: usize,
        tx_marks: usize,
    }

    impl MockKeepalive {
        fn new() -> Self {
            Self {
                verdicts: VecDeque::new(),
                stalled_verdict: KaAction::None,
                rx_marks: 0,
                tx_marks: 0,
            }
        }
    }

    impl KeepaliveTimer for MockKeepalive {
        fn mark_rx(&mut self, _now: Instant) {
            self.rx_marks += 1;
        }

        fn mark_tx(&mut self, _now: Instant) {
            self.tx_marks += 1;
        }

        fn action(&mut self, _now: Instant, _timeout: &mut Duration) -> KaAction {
            self.verdicts.pop_front().unwrap_or(KaAction::None)
        }

        fn stalled_action(&mut self, _now: Instant, _timeout: &mut Duration) -> KaAction {
            self.stalled_verdict
        }
    }

    fn session(want_ipv4: bool, want_ipv6: bool) -> PppSession {
        PppSession::new(Encap::F5Raw, want_ipv4, want_ipv6, IpConfig::default())
    }

    fn tick(
        s: &mut PppSession,
        t: &mut MockTransport,
        k: &mut MockKeepalive,
        now: Instant,
    ) -> Result<Tick> {
        let mut timeout = Duration::from_secs(60);
        s.mainloop_tick(t, k, true, &mut timeout, now)
    }

    /// Wrap a PPP frame in the F5 outer header.
    fn f5(frame: &[u8]) -> Vec<u8> {
        let mut wire = vec![0xf5, 0x00];
        wire.extend_from_slice(&(frame.len() as u16).to_be_bytes());
        wire.extend_from_slice(frame);
        wire
    }

    /// Uncompressed LCP frame with the given control packet body.
    fn lcp(body: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xff, 0x03, 0xc0, 0x21];
        frame.extend_from_slice(body);
        frame
    }

    /// Uncompressed IPCP frame with the given control packet body.
    fn ipcp(body: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xff, 0x03, 0x80, 0x21];
        frame.extend_from_slice(body);
        frame
    }

    /// Control packet body parsed out of a raw F5 wire frame.
    fn sent_control(wire: &[u8]) -> (u16, Vec<u8>) {
        assert_eq!(&wire[..2], &[0xf5, 0x00]);
        let frame = &wire[4..];
        assert_eq!(&frame[..2], &[0xff, 0x03]);
        let proto = u16::from_be_bytes([frame[2], frame[3]]);
        (proto, frame[4..].to_vec())
    }

    #[test]
    fn test_clean_lcp_bring_up() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        // Peer Configure-Request id=1: MRU=1500, magic 0x11223344
        t.push_rx(&f5(&lcp(&[
            0x01, 0x01, 0x00, 0x0e, // Configure-Request, id=1, length=14
            0x01, 0x04, 0x05, 0xdc, // MRU=1500
            0x05, 0x06, 0x11, 0x22, 0x33, 0x44, // Magic-Number
        ])));

        let r = tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();
        assert_eq!(r, Tick::Idle);
        assert_eq!(s.phase(), Phase::Establish);
        assert_eq!(s.in_lcp_magic, 0x11223344);
        assert_eq!(s.ip_info().mtu, 1500);
        assert_eq!(k.rx_marks, 1);

        // Our Configure-Request goes out first, then the Configure-Ack
        assert_eq!(t.tx.len(), 2);
        let (proto, body) = sent_control(&t.tx[0]);
        assert_eq!(proto, protocols::LCP);
        let req = ControlPacket::parse(&body).unwrap();
        assert_eq!(req.code(), codes::CONFIGURE_REQUEST);
        assert_eq!(req.identifier(), 1);

        let (proto, body) = sent_control(&t.tx[1]);
        assert_eq!(proto, protocols::LCP);
        let ack = ControlPacket::parse(&body).unwrap();
        assert_eq!(ack.code(), codes::CONFIGURE_ACK);
        assert_eq!(ack.identifier(), 1);
        // Option bytes echoed exactly
        assert_eq!(
            ack.data(),
            &[0x01, 0x04, 0x05, 0xdc, 0x05, 0x06, 0x11, 0x22, 0x33, 0x44]
        );
    }

    #[test]
    fn test_lcp_retransmit_at_three_seconds() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();
        let t0 = Instant::now();

        tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert_eq!(t.tx.len(), 1); // initial request

        tick(&mut s, &mut t, &mut k, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(t.tx.len(), 1); // not due yet

        tick(&mut s, &mut t, &mut k, t0 + CONF_RETRY_INTERVAL).unwrap();
        assert_eq!(t.tx.len(), 2); // exactly one retransmit

        // One second after the retransmit: nothing, and the timeout narrows
        let mut timeout = Duration::from_secs(60);
        s.mainloop_tick(
            &mut t,
            &mut k,
            true,
            &mut timeout,
            t0 + CONF_RETRY_INTERVAL + Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(t.tx.len(), 2);
        assert_eq!(timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_phase_advance_to_network_and_data_delivery() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();
        let t0 = Instant::now();

        // Tick 1: our LCP request goes out
        tick(&mut s, &mut t, &mut k, t0).unwrap();

        // Peer acks our LCP request and sends its own (no options)
        t.push_rx(&f5(&lcp(&[0x02, 0x01, 0x00, 0x04])));
        t.push_rx(&f5(&lcp(&[0x01, 0x07, 0x00, 0x04])));
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert!(s.lcp.converged());

        // Tick 3: LCP converged, phase opens and the IPCP request goes out
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert_eq!(s.phase(), Phase::Opened);

        // Peer acks IPCP and sends its own request carrying its address
        t.push_rx(&f5(&ipcp(&[0x02, 0x01, 0x00, 0x04])));
        t.push_rx(&f5(&ipcp(&[
            0x01, 0x02, 0x00, 0x0a, // Configure-Request, id=2
            0x03, 0x06, 0x0a, 0x00, 0x00, 0x01, // IP-Address 10.0.0.1
        ])));
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert!(s.ipcp.converged());
        assert_eq!(s.peer_addr(), Ipv4Addr::new(10, 0, 0, 1));

        // Tick 5: phase reaches NETWORK; an inbound IP packet is delivered
        let payload = [0x45, 0x00, 0x00, 0x1c, 0xaa, 0xbb, 0xcc, 0xdd];
        let mut frame = vec![0xff, 0x03, 0x00, 0x21];
        frame.extend_from_slice(&payload);
        t.push_rx(&f5(&frame));

        let r = tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert_eq!(s.phase(), Phase::Network);
        assert_eq!(r, Tick::Progress);
        let delivered = s.ingress_queue_mut().dequeue().unwrap();
        assert_eq!(delivered.data(), &payload);
    }

    #[test]
    fn test_network_not_entered_until_wanted_ncps_converge() {
        let mut s = session(true, true);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();
        let t0 = Instant::now();

        tick(&mut s, &mut t, &mut k, t0).unwrap();
        t.push_rx(&f5(&lcp(&[0x02, 0x01, 0x00, 0x04])));
        t.push_rx(&f5(&lcp(&[0x01, 0x07, 0x00, 0x04])));
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert_eq!(s.phase(), Phase::Opened);

        // Only IPCP converges; IP6CP still outstanding
        t.push_rx(&f5(&ipcp(&[0x02, 0x01, 0x00, 0x04])));
        t.push_rx(&f5(&ipcp(&[0x01, 0x02, 0x00, 0x04])));
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert_eq!(s.phase(), Phase::Opened);

        // IP6CP converges too
        t.push_rx(&f5(&[
            0xff, 0x03, 0x80, 0x57, 0x02, 0x01, 0x00, 0x04,
        ]));
        t.push_rx(&f5(&[
            0xff, 0x03, 0x80, 0x57, // IP6CP
            0x01, 0x03, 0x00, 0x0e, // Configure-Request, id=3
            0x01, 0x0a, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, // Interface-Id
        ]));
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert_eq!(s.phase(), Phase::Network);
        assert_eq!(
            s.peer_ipv6_int_ident(),
            [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]
        );
    }

    #[test]
    fn test_dpd_sends_echo_request_with_magic() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();
        let t0 = Instant::now();

        // First tick chooses the magic while queueing the LCP request
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        let magic = s.lcp_magic();
        assert_ne!(magic, 0);

        k.verdicts.push_back(KaAction::Dpd);
        tick(&mut s, &mut t, &mut k, t0).unwrap();

        let (proto, body) = sent_control(t.tx.last().unwrap());
        assert_eq!(proto, protocols::LCP);
        let echo = ControlPacket::parse(&body).unwrap();
        assert_eq!(echo.code(), codes::ECHO_REQUEST);
        assert_eq!(echo.data(), &magic.to_be_bytes());
    }

    #[test]
    fn test_keepalive_discard_only_when_idle() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();
        let t0 = Instant::now();

        // Tick 1 drains the initial LCP request, so the queues are empty
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        let sent_before = t.tx.len();

        k.verdicts.push_back(KaAction::Keepalive);
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        let (_, body) = sent_control(t.tx.last().unwrap());
        let discard = ControlPacket::parse(&body).unwrap();
        assert_eq!(discard.code(), codes::DISCARD_REQUEST);
        assert_eq!(t.tx.len(), sent_before + 1);

        // With a control frame already pending, the keepalive is suppressed
        s.queue_config_packet(protocols::LCP, 9, codes::ECHO_REQUEST, &[0, 0, 0, 0]);
        k.verdicts.push_back(KaAction::Keepalive);
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        let (_, body) = sent_control(t.tx.last().unwrap());
        let last = ControlPacket::parse(&body).unwrap();
        assert_eq!(last.code(), codes::ECHO_REQUEST);
    }

    #[test]
    fn test_terminate_request_acked_and_session_done() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();
        let t0 = Instant::now();

        // Terminate-Request id=2 with reason "bye"
        t.push_rx(&f5(&lcp(&[0x05, 0x02, 0x00, 0x07, b'b', b'y', b'e'])));
        tick(&mut s, &mut t, &mut k, t0).unwrap();

        assert_eq!(s.phase(), Phase::Terminate);
        assert_eq!(s.quit_reason(), Some("bye"));

        let (_, body) = sent_control(t.tx.last().unwrap());
        let ack = ControlPacket::parse(&body).unwrap();
        assert_eq!(ack.code(), codes::TERMINATE_ACK);
        assert_eq!(ack.identifier(), 2);
        assert!(ack.data().is_empty());

        let r = tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert_eq!(r, Tick::Done);
    }

    #[test]
    fn test_hdlc_request_escapes_control_bytes() {
        let mut s = PppSession::new(Encap::F5Hdlc, true, false, IpConfig::default());
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();

        let wire = &t.tx[0];
        assert_eq!(&wire[..2], &[0xf5, 0x00]);
        let escaped = &wire[4..];
        // The Configure-Request code byte 0x01 must ride as 7d 21
        assert!(escaped.windows(2).any(|w| w == [0x7d, 0x21]));
        // Nothing below 0x20 survives unescaped under the all-ones map
        assert!(escaped.iter().all(|&b| b >= 0x20));

        // And the frame round-trips to a parseable Configure-Request
        let frame = hdlc::unescape(escaped).unwrap();
        let (proto, hdr_len) = ppp::decode_header(&frame, LcpOpts::empty()).unwrap();
        assert_eq!(proto, protocols::LCP);
        let req = ControlPacket::parse(&frame[hdr_len..]).unwrap();
        assert_eq!(req.code(), codes::CONFIGURE_REQUEST);
    }

    #[test]
    fn test_control_queue_has_priority_over_data() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        s.phase = Phase::Network;
        s.lcp.progress.insert(ncp::NcpProgress::CONF_ACK_SENT);
        s.lcp.progress.insert(ncp::NcpProgress::CONF_ACK_RECEIVED);
        s.ipcp.progress.insert(ncp::NcpProgress::CONF_ACK_SENT);
        s.ipcp.progress.insert(ncp::NcpProgress::CONF_ACK_RECEIVED);

        s.egress_queue_mut()
            .enqueue(Packet::with_headroom(&[0x45, 0x00, 0x01, 0x02]));
        s.queue_config_packet(protocols::LCP, 1, codes::ECHO_REQUEST, &[0, 0, 0, 0]);

        tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();

        // Control frame first, data frame after
        let (proto, _) = sent_control(&t.tx[0]);
        assert_eq!(proto, protocols::LCP);
        let data_frame = &t.tx[1][4..];
        assert_eq!(&data_frame[..4], &[0xff, 0x03, 0x00, 0x21]);
        assert_eq!(&data_frame[4..], &[0x45, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_data_proto_chosen_by_first_nibble() {
        let mut s = session(false, true);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        s.phase = Phase::Network;
        s.egress_queue_mut()
            .enqueue(Packet::with_headroom(&[0x60, 0x00, 0x00, 0x00]));

        tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();
        let frame = &t.tx.last().unwrap()[4..];
        assert_eq!(&frame[..4], &[0xff, 0x03, 0x00, 0x57]);
    }

    #[test]
    fn test_egress_held_while_alt_data_transport_connected() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        s.phase = Phase::Network;
        s.set_alt_data_connected(true);
        s.egress_queue_mut()
            .enqueue(Packet::with_headroom(&[0x45, 0x00]));

        tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();
        assert!(t.tx.is_empty());
        assert_eq!(s.egress_queue_mut().len(), 1);
    }

    #[test]
    fn test_stalled_write_retried_byte_identical() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();
        let t0 = Instant::now();

        t.block_writes = 1;
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert_eq!(t.attempts.len(), 1);
        assert!(t.tx.is_empty());

        tick(&mut s, &mut t, &mut k, t0).unwrap();
        assert_eq!(t.attempts.len(), 2);
        assert_eq!(t.attempts[0], t.attempts[1]);
        assert_eq!(t.tx.len(), 1);
        assert_eq!(k.tx_marks, 2); // last-tx committed on every attempt
    }

    #[test]
    fn test_stall_with_dpd_dead_reconnects() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        t.block_writes = 1;
        k.stalled_verdict = KaAction::DpdDead;
        let r = tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();
        assert_eq!(r, Tick::Progress);
        assert_eq!(t.reconnects, 1);
    }

    #[test]
    fn test_dpd_dead_verdict_reconnects() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();
        k.verdicts.push_back(KaAction::DpdDead);
        let r = tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();
        assert_eq!(r, Tick::Progress);
        assert_eq!(t.reconnects, 1);
    }

    #[test]
    fn test_reconnect_failure_is_fatal() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        t.connected = false;
        t.fail_reconnect = true;
        let r = tick(&mut s, &mut t, &mut k, Instant::now());
        assert!(matches!(r, Err(Error::Transport(_))));
        assert_eq!(s.quit_reason(), Some("PPP reconnect failed"));
    }

    #[test]
    fn test_short_datagram_is_fatal() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        t.push_rx(&[0xf5, 0x00, 0x00, 0x02, 0xc0, 0x21]);
        let r = tick(&mut s, &mut t, &mut k, Instant::now());
        assert!(matches!(r, Err(Error::ShortRead(6))));
        assert_eq!(s.quit_reason(), Some("Short packet received"));
    }

    #[test]
    fn test_outer_header_mismatch_dropped_softly() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        // Wrong magic
        t.push_rx(&[0x10, 0x00, 0x00, 0x08, 0xff, 0x03, 0xc0, 0x21, 0x01, 0x01, 0x00, 0x04]);
        // Outer length disagrees with the read size
        let truncated = f5(&lcp(&[0x02, 0x01, 0x00, 0x04]));
        t.push_rx(&truncated[..11]);

        let r = tick(&mut s, &mut t, &mut k, Instant::now());
        assert!(r.is_ok());
        assert!(!s.lcp.progress.contains(ncp::NcpProgress::CONF_ACK_RECEIVED));
    }

    #[test]
    fn test_unsupported_protocol_is_fatal() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        // CHAP (0xc223) is not carried by this core
        t.push_rx(&f5(&[0xff, 0x03, 0xc2, 0x23, 0x01, 0x01, 0x00, 0x04]));
        let r = tick(&mut s, &mut t, &mut k, Instant::now());
        assert!(matches!(r, Err(Error::UnsupportedProtocol(0xc223))));
    }

    #[test]
    fn test_data_before_network_phase_dropped() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        t.push_rx(&f5(&[0xff, 0x03, 0x00, 0x21, 0x45, 0x00, 0x00, 0x1c]));
        let r = tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();
        assert_eq!(r, Tick::Idle);
        assert!(s.ingress_queue_mut().dequeue().is_none());
    }

    #[test]
    fn test_echo_request_ignored_before_opened() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        t.push_rx(&f5(&lcp(&[0x09, 0x05, 0x00, 0x08, 0x11, 0x22, 0x33, 0x44])));
        tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();

        for wire in &t.tx {
            let (_, body) = sent_control(wire);
            let packet = ControlPacket::parse(&body).unwrap();
            assert_ne!(packet.code(), codes::ECHO_REPLY);
        }
    }

    #[test]
    fn test_phase_never_regresses() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();
        let t0 = Instant::now();

        let mut seen = Vec::new();
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        seen.push(s.phase());
        t.push_rx(&f5(&lcp(&[0x02, 0x01, 0x00, 0x04])));
        t.push_rx(&f5(&lcp(&[0x01, 0x07, 0x00, 0x04])));
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        seen.push(s.phase());
        t.push_rx(&f5(&ipcp(&[0x02, 0x01, 0x00, 0x04])));
        t.push_rx(&f5(&ipcp(&[0x01, 0x02, 0x00, 0x04])));
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        seen.push(s.phase());
        tick(&mut s, &mut t, &mut k, t0).unwrap();
        seen.push(s.phase());

        for pair in seen.windows(2) {
            assert!(pair[0] <= pair[1], "phase regressed: {:?}", seen);
        }
        assert_eq!(s.phase(), Phase::Network);
    }

    #[test]
    fn test_receive_header_size_hint_tracks_peer() {
        let mut s = session(true, false);
        let mut t = MockTransport::new();
        let mut k = MockKeepalive::new();

        s.phase = Phase::Network;
        s.in_lcp_opts = LcpOpts::ACCOMP | LcpOpts::PFCOMP;
        assert_eq!(s.exp_ppp_hdr_size, 4);

        // Fully compressed data frame: protocol is the single byte 0x21
        let payload = [0x45, 0x00, 0x00, 0x14, 0x01, 0x02, 0x03, 0x04];
        let mut frame = vec![0x21];
        frame.extend_from_slice(&payload);
        t.push_rx(&f5(&frame));

        tick(&mut s, &mut t, &mut k, Instant::now()).unwrap();
        assert_eq!(s.exp_ppp_hdr_size, 1);
        let delivered = s.ingress_queue_mut().dequeue().unwrap();
        assert_eq!(delivered.data(), &payload);
    }
}

//! Configure/Terminate/Echo exchange for LCP, IPCP and IP6CP.
//!
//! Builds our Configure-Requests, absorbs the peer's, and answers the
//! remaining control codes. Outgoing packets land on the control queue and
//! are framed at send time.

use super::*;
use crate::protocol::cp::{code_name, ip6cp_opts, ipcp_opts, lcp_opts, ControlPacket};
use crate::protocol::tlv::{self, TlvReader};
use crate::session::ncp::NcpProgress;
use rand::Rng;

/// MTU used for the LCP request when the setup layer supplied none.
const DEFAULT_MTU: u16 = 1300;

/// The magic is fixed once chosen: the bitwise NOT of the peer's magic when
/// we have seen one, any non-zero value otherwise.
fn choose_magic(in_magic: u32) -> u32 {
    let magic = !in_magic;
    if in_magic != 0 && magic != 0 {
        magic
    } else {
        rand::thread_rng().gen_range(1..=u32::MAX)
    }
}

impl PppSession {
    fn ncp_mut(&mut self, proto: u16) -> Option<&mut Ncp> {
        match proto {
            protocols::LCP => Some(&mut self.lcp),
            protocols::IPCP => Some(&mut self.ipcp),
            protocols::IP6CP => Some(&mut self.ip6cp),
            _ => None,
        }
    }

    fn add_progress(&mut self, proto: u16, flag: NcpProgress) {
        if let Some(ncp) = self.ncp_mut(proto) {
            ncp.progress.insert(flag);
        }
    }

    /// Queue a control packet; the protocol number is stamped at send time.
    pub(super) fn queue_config_packet(&mut self, proto: u16, id: u8, code: u8, payload: &[u8]) {
        self.control_queue
            .enqueue(Packet::control(proto, code, id, payload));
    }

    /// Build and queue our Configure-Request for `proto`.
    pub(super) fn queue_config_request(&mut self, proto: u16, id: u8) {
        let mut opts = Vec::with_capacity(64);

        match proto {
            protocols::LCP => {
                self.out_asyncmap = 0;
                self.out_lcp_opts = LcpOpts::ACCOMP | LcpOpts::PFCOMP;
                if self.out_lcp_magic == 0 {
                    self.out_lcp_magic = choose_magic(self.in_lcp_magic);
                }
                if self.ip_info.mtu == 0 {
                    self.ip_info.mtu = DEFAULT_MTU;
                }

                tlv::append_tlv_be16(&mut opts, lcp_opts::MRU, self.ip_info.mtu);
                tlv::append_tlv_be32(&mut opts, lcp_opts::ACCM, self.out_asyncmap);
                tlv::append_tlv(
                    &mut opts,
                    lcp_opts::MAGIC_NUMBER,
                    &self.out_lcp_magic.to_be_bytes(),
                );
                if self.out_lcp_opts.contains(LcpOpts::PFCOMP) {
                    tlv::append_tlv(&mut opts, lcp_opts::PFC, &[]);
                }
                if self.out_lcp_opts.contains(LcpOpts::ACCOMP) {
                    tlv::append_tlv(&mut opts, lcp_opts::ACFC, &[]);
                }
            }

            protocols::IPCP => {
                if let Some(addr) = self.ip_info.addr4 {
                    self.out_peer_addr = addr;
                }
                tlv::append_tlv(&mut opts, ipcp_opts::IP_ADDRESS, &self.out_peer_addr.octets());
            }

            protocols::IP6CP => {
                if let Some(addr) = self.ip_info.addr6 {
                    // Interface identifier: low 64 bits of the address
                    self.out_ipv6_int_ident.copy_from_slice(&addr.octets()[8..16]);
                }
                tlv::append_tlv(&mut opts, ip6cp_opts::INTERFACE_ID, &self.out_ipv6_int_ident);
            }

            _ => return,
        }

        debug!(
            "Sending our proto 0x{:04x}/id {} config request to server",
            proto, id
        );
        self.queue_config_packet(proto, id, codes::CONFIGURE_REQUEST, &opts);
        if let Some(ncp) = self.ncp_mut(proto) {
            ncp.progress.insert(NcpProgress::CONF_REQ_SENT);
            ncp.id = id;
        }
    }

    /// Absorb the peer's Configure-Request and echo it back as an ack.
    ///
    /// An unknown or malformed option rejects the whole request; no
    /// Configure-Reject is emitted.
    fn handle_config_request(&mut self, proto: u16, id: u8, payload: &[u8]) -> Result<()> {
        for opt in TlvReader::new(payload) {
            let opt = opt?;
            match (proto, opt.tag, opt.data.len()) {
                (protocols::LCP, lcp_opts::MRU, 2) => {
                    self.ip_info.mtu = u16::from_be_bytes([opt.data[0], opt.data[1]]);
                    debug!("Received MTU {} from server", self.ip_info.mtu);
                }
                (protocols::LCP, lcp_opts::ACCM, 4) => {
                    self.in_asyncmap = u32::from_be_bytes([
                        opt.data[0], opt.data[1], opt.data[2], opt.data[3],
                    ]);
                    debug!("Received asyncmap of 0x{:08x} from server", self.in_asyncmap);
                }
                (protocols::LCP, lcp_opts::MAGIC_NUMBER, 4) => {
                    self.in_lcp_magic = u32::from_be_bytes([
                        opt.data[0], opt.data[1], opt.data[2], opt.data[3],
                    ]);
                    debug!(
                        "Received magic number of 0x{:08x} from server",
                        self.in_lcp_magic
                    );
                }
                (protocols::LCP, lcp_opts::PFC, 0) => {
                    debug!("Received protocol field compression from server");
                    self.in_lcp_opts.insert(LcpOpts::PFCOMP);
                }
                (protocols::LCP, lcp_opts::ACFC, 0) => {
                    debug!("Received address and control field compression from server");
                    self.in_lcp_opts.insert(LcpOpts::ACCOMP);
                }
                (protocols::IPCP, ipcp_opts::IP_COMPRESSION, 2)
                    if u16::from_be_bytes([opt.data[0], opt.data[1]])
                        == ipcp_opts::VAN_JACOBSON =>
                {
                    // Recorded only; VJ compression is never applied
                    debug!("Received Van Jacobson TCP/IP compression from server");
                    self.in_lcp_opts.insert(LcpOpts::VJCOMP);
                }
                (protocols::IPCP, ipcp_opts::IP_ADDRESS, 4) => {
                    self.in_peer_addr =
                        Ipv4Addr::new(opt.data[0], opt.data[1], opt.data[2], opt.data[3]);
                    debug!("Received peer IPv4 address {} from server", self.in_peer_addr);
                }
                (protocols::IP6CP, ip6cp_opts::INTERFACE_ID, 8) => {
                    self.in_ipv6_int_ident.copy_from_slice(opt.data);
                    debug!(
                        "Received peer IPv6 interface identifier {:02x?} from server",
                        self.in_ipv6_int_ident
                    );
                }
                _ => {
                    debug!(
                        "Received unknown proto 0x{:04x} TLV (tag {}, len {}+2) from server",
                        proto,
                        opt.tag,
                        opt.data.len()
                    );
                    return Err(Error::UnknownOption {
                        proto,
                        tag: opt.tag,
                        len: opt.data.len(),
                    });
                }
            }
        }
        self.add_progress(proto, NcpProgress::CONF_REQ_RECEIVED);

        debug!("Ack proto 0x{:04x}/id {} config from server", proto, id);
        self.queue_config_packet(proto, id, codes::CONFIGURE_ACK, payload);
        self.add_progress(proto, NcpProgress::CONF_ACK_SENT);
        Ok(())
    }

    /// Dispatch one inbound control packet for `proto`.
    pub(super) fn handle_config_packet(&mut self, proto: u16, payload: &[u8]) -> Result<()> {
        if self.ncp_mut(proto).is_none() {
            return Err(Error::UnsupportedProtocol(proto));
        }

        let packet = ControlPacket::parse(payload)?;
        let code = packet.code();
        let id = packet.identifier();
        trace!(
            "Received proto 0x{:04x}/id {} {} from server",
            proto,
            id,
            code_name(code)
        );

        match code {
            codes::CONFIGURE_REQUEST => {
                self.handle_config_request(proto, id, packet.data())?;
            }

            codes::CONFIGURE_ACK => {
                // The echoed options and id are not verified against our
                // request.
                self.add_progress(proto, NcpProgress::CONF_ACK_RECEIVED);
            }

            codes::ECHO_REQUEST => {
                if self.phase >= Phase::Opened {
                    let magic = self.out_lcp_magic.to_be_bytes();
                    self.queue_config_packet(proto, id, codes::ECHO_REPLY, &magic);
                }
            }

            codes::TERMINATE_REQUEST => {
                self.add_progress(proto, NcpProgress::TERM_REQ_RECEIVED);
                self.queue_config_packet(proto, id, codes::TERMINATE_ACK, &[]);
                self.add_progress(proto, NcpProgress::TERM_ACK_SENT);
                self.set_quit_reason(packet.data());
                self.phase = Phase::Terminate;
            }

            codes::TERMINATE_ACK => {
                self.add_progress(proto, NcpProgress::TERM_ACK_RECEIVED);
                self.set_quit_reason(packet.data());
                self.phase = Phase::Terminate;
            }

            codes::ECHO_REPLY | codes::DISCARD_REQUEST => {}

            // Configure-Nak/-Reject and Code-/Protocol-Reject are not
            // refined here; any of them ends the session.
            other => {
                return Err(Error::Parse(format!(
                    "cannot handle {} (code {}) for proto 0x{:04x}",
                    code_name(other),
                    other,
                    proto
                )));
            }
        }
        Ok(())
    }

    /// Keep the peer-supplied reason from a Terminate packet's trailing
    /// bytes, unless one is already set.
    fn set_quit_reason(&mut self, data: &[u8]) {
        if self.quit_reason.is_none() && !data.is_empty() {
            let reason = String::from_utf8_lossy(data).into_owned();
            debug!("Peer terminated session: {}", reason);
            self.quit_reason = Some(reason);
        }
    }
}

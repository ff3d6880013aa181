//! DHCPv4 server core.
//!
//! Strictly synchronous: one call in, a (possibly empty) list of replies out.
//! The caller owns the state, supplies the clock, and decides what to do with
//! the destination hint on each reply. No I/O happens here.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{V4Config, sanitize_hostname};
use crate::error::{Error, Result};
use crate::lease::{Lease4, LeaseSet4, format_client_id};
use crate::pool::Pool;
use crate::v4::options::{DhcpOption, MessageType};
use crate::v4::packet::{BOOTREQUEST, DhcpPacket};

/// Where the transport should send a reply. The core only derives intent
/// from the BROADCAST flag and `giaddr`; sockets and ports stay outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDestination {
    Broadcast,
    Unicast(Ipv4Addr),
    Relay(Ipv4Addr),
}

#[derive(Debug, Clone)]
pub struct V4Reply {
    pub payload: Vec<u8>,
    pub destination: ReplyDestination,
}

#[derive(Debug)]
pub struct V4Server {
    config: V4Config,
    pool: Pool<Ipv4Addr>,
    leases: LeaseSet4,
}

impl V4Server {
    pub fn new(config: V4Config) -> Result<Self> {
        config.validate()?;
        let pool = Pool::new(config.range_start, config.range_end);
        Ok(Self {
            config,
            pool,
            leases: LeaseSet4::new(),
        })
    }

    pub fn config(&self) -> &V4Config {
        &self.config
    }

    /// Handles one inbound datagram. Malformed input is dropped silently
    /// apart from a debug log; protocol failures become NAKs per RFC 2131.
    pub fn process(
        &mut self,
        data: &[u8],
        peer: Ipv4Addr,
        peer_port: u16,
        now: DateTime<Utc>,
    ) -> Vec<V4Reply> {
        let packet = match DhcpPacket::parse(data) {
            Ok(packet) => packet,
            Err(error) => {
                debug!("Dropping malformed v4 packet from {}:{}: {}", peer, peer_port, error);
                return Vec::new();
            }
        };

        if packet.op != BOOTREQUEST {
            debug!("Ignoring non-BOOTREQUEST from {}", peer);
            return Vec::new();
        }

        let Some(message_type) = packet.message_type() else {
            debug!("Dropping v4 packet without message type from {}", peer);
            return Vec::new();
        };

        info!("{} from {} ({})", message_type, packet.mac_address(), peer);

        let reply = match message_type {
            MessageType::Discover => self.handle_discover(&packet, now),
            MessageType::Request => self.handle_request(&packet, now),
            MessageType::Decline => self.handle_decline(&packet),
            MessageType::Release => self.handle_release(&packet),
            MessageType::Inform => self.handle_inform(&packet),
            other => {
                debug!("Ignoring {} message", other);
                None
            }
        };

        reply
            .map(|packet_out| {
                let is_nak = packet_out.message_type() == Some(MessageType::Nak);
                V4Reply {
                    payload: packet_out.encode(),
                    destination: Self::destination(&packet, is_nak),
                }
            })
            .into_iter()
            .collect()
    }

    /// Drops every lease with `expires_at <= now` and returns its address
    /// to the pool.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        for key in self.leases.expired_keys(now) {
            if let Some(lease) = self.leases.remove(&key) {
                info!("Lease for {} ({}) expired", lease.client_id, lease.ip_address);
                self.pool.give_back(lease.ip_address);
            }
        }
    }

    /// Pure projection of the lease table.
    pub fn leases(&self) -> Vec<&Lease4> {
        self.leases.iter().collect()
    }

    pub fn active_lease_count(&self, now: DateTime<Utc>) -> usize {
        self.leases.iter().filter(|lease| !lease.is_expired(now)).count()
    }

    pub fn free_address_count(&self) -> u128 {
        self.pool.free_count()
    }

    pub fn declined_addresses(&self) -> Vec<Ipv4Addr> {
        self.pool.declined()
    }

    /// Administrative reset of the declined set.
    pub fn clear_declined(&mut self) -> usize {
        self.pool.clear_declined()
    }

    fn destination(request: &DhcpPacket, is_nak: bool) -> ReplyDestination {
        if request.giaddr != Ipv4Addr::UNSPECIFIED {
            ReplyDestination::Relay(request.giaddr)
        } else if is_nak || request.is_broadcast() || request.ciaddr == Ipv4Addr::UNSPECIFIED {
            ReplyDestination::Broadcast
        } else {
            ReplyDestination::Unicast(request.ciaddr)
        }
    }

    fn handle_discover(&mut self, packet: &DhcpPacket, now: DateTime<Utc>) -> Option<DhcpPacket> {
        let key = format_client_id(&packet.client_key());

        let offered_ip = match self.allocate(&key, packet, now) {
            Ok(ip) => ip,
            Err(Error::PoolExhausted) => {
                warn!("Pool exhausted, cannot offer an address to {}", packet.mac_address());
                return None;
            }
            Err(error) => {
                warn!("Allocation failed for {}: {}", packet.mac_address(), error);
                return None;
            }
        };

        info!("OFFER {} to {}", offered_ip, packet.mac_address());

        Some(DhcpPacket::create_reply(
            packet,
            MessageType::Offer,
            offered_ip,
            self.config.server_identifier(),
            self.lease_options(),
        ))
    }

    fn handle_request(&mut self, packet: &DhcpPacket, now: DateTime<Utc>) -> Option<DhcpPacket> {
        if let Some(server_id) = packet.server_identifier()
            && server_id != self.config.server_identifier()
        {
            info!(
                "REQUEST from {} is for different server {}",
                packet.mac_address(),
                server_id
            );
            return None;
        }

        let requested_ip = packet.requested_ip().or_else(|| {
            (packet.ciaddr != Ipv4Addr::UNSPECIFIED).then_some(packet.ciaddr)
        });

        let Some(requested_ip) = requested_ip else {
            return Some(self.nak(packet, "no requested address"));
        };

        if !self.pool.contains(requested_ip) {
            return Some(self.nak(packet, "requested address not in pool"));
        }

        let key = format_client_id(&packet.client_key());

        let renewed = match self.leases.get_mut(&key) {
            Some(lease) if lease.ip_address == requested_ip && !lease.is_expired(now) => {
                lease.renew(self.config.lease_time_seconds, now);
                if let Some(hostname) = packet.hostname() {
                    lease.hostname = Some(sanitize_hostname(hostname));
                }
                true
            }
            _ => false,
        };

        if !renewed {
            // The address must be free, or be this client's own stale binding.
            let own_binding = self
                .leases
                .get(&key)
                .is_some_and(|lease| lease.ip_address == requested_ip);

            if !own_binding && !self.pool.is_free(requested_ip) {
                return Some(self.nak(packet, "requested address not available"));
            }

            // Changing address: the old binding goes back to the pool first.
            if let Some(old) = self.leases.remove(&key) {
                self.pool.give_back(old.ip_address);
            }

            if !self.pool.take(requested_ip) {
                return Some(self.nak(packet, "requested address not available"));
            }

            self.insert_lease(&key, requested_ip, packet, now);
        }

        info!("ACK {} to {}", requested_ip, packet.mac_address());

        Some(DhcpPacket::create_reply(
            packet,
            MessageType::Ack,
            requested_ip,
            self.config.server_identifier(),
            self.lease_options(),
        ))
    }

    fn handle_decline(&mut self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        let Some(declined_ip) = packet.requested_ip() else {
            return None;
        };

        let key = format_client_id(&packet.client_key());

        // Withholding is indefinite, so only a client that actually holds the
        // address may trigger it. Anything else is a forgeable no-op.
        let holds_address = self
            .leases
            .get(&key)
            .is_some_and(|lease| lease.ip_address == declined_ip);

        if !holds_address {
            warn!(
                "DECLINE from {} for {} rejected: address not held by this client",
                packet.mac_address(),
                declined_ip
            );
            return None;
        }

        self.leases.remove(&key);
        self.pool.decline(declined_ip);

        warn!(
            "DECLINE from {} for {}: withheld until cleared",
            packet.mac_address(),
            declined_ip
        );

        None
    }

    fn handle_release(&mut self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        if packet.ciaddr == Ipv4Addr::UNSPECIFIED {
            warn!("RELEASE from {} with no ciaddr", packet.mac_address());
            return None;
        }

        let key = format_client_id(&packet.client_key());

        let holds_address = self
            .leases
            .get(&key)
            .is_some_and(|lease| lease.ip_address == packet.ciaddr);

        if holds_address {
            self.leases.remove(&key);
            self.pool.give_back(packet.ciaddr);
            info!("RELEASE from {} for {}", packet.mac_address(), packet.ciaddr);
        } else {
            warn!(
                "RELEASE from {} for {} does not match any lease",
                packet.mac_address(),
                packet.ciaddr
            );
        }

        None
    }

    fn handle_inform(&mut self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        info!("INFORM response to {}", packet.mac_address());

        Some(DhcpPacket::create_reply(
            packet,
            MessageType::Ack,
            Ipv4Addr::UNSPECIFIED,
            self.config.server_identifier(),
            self.configuration_options(),
        ))
    }

    fn nak(&self, packet: &DhcpPacket, reason: &str) -> DhcpPacket {
        warn!("NAK to {}: {}", packet.mac_address(), reason);

        DhcpPacket::create_reply(
            packet,
            MessageType::Nak,
            Ipv4Addr::UNSPECIFIED,
            self.config.server_identifier(),
            vec![
                DhcpOption::server_identifier(self.config.server_identifier()),
                DhcpOption::message(reason),
            ],
        )
    }

    /// Allocation order: live binding, then the client's hint, then the
    /// lowest free address.
    fn allocate(&mut self, key: &str, packet: &DhcpPacket, now: DateTime<Utc>) -> Result<Ipv4Addr> {
        if let Some(lease) = self.leases.get(key) {
            if !lease.is_expired(now) {
                return Ok(lease.ip_address);
            }
            let ip = lease.ip_address;
            self.leases.remove(key);
            self.pool.give_back(ip);
        }

        let ip = match packet.requested_ip() {
            Some(requested) if self.pool.take(requested) => requested,
            _ => self.pool.take_next().ok_or(Error::PoolExhausted)?,
        };

        self.insert_lease(key, ip, packet, now);
        Ok(ip)
    }

    fn insert_lease(&mut self, key: &str, ip: Ipv4Addr, packet: &DhcpPacket, now: DateTime<Utc>) {
        debug_assert!(self.pool.is_in_use(ip));

        let mut lease = Lease4::new(
            ip,
            packet.mac_address(),
            key.to_string(),
            self.config.lease_time_seconds,
            now,
        );
        if let Some(hostname) = packet.hostname() {
            lease.hostname = Some(sanitize_hostname(hostname));
        }
        if let Some(vendor_class) = packet.vendor_class() {
            lease
                .extra_options
                .push((u16::from(crate::v4::options::OPT_VENDOR_CLASS), vendor_class.to_vec()));
        }
        self.leases.insert(lease);
    }

    /// OFFER/ACK option set, in the RFC-suggested order: server id, lease
    /// timers, mask before router, then DNS and the configured extras.
    fn lease_options(&self) -> Vec<DhcpOption> {
        let mut options = vec![
            DhcpOption::server_identifier(self.config.server_identifier()),
            DhcpOption::lease_time(self.config.lease_time_seconds),
        ];

        self.push_network_options(&mut options);

        options.push(DhcpOption::renewal_time(self.config.renewal_time()));
        options.push(DhcpOption::rebinding_time(self.config.rebinding_time()));

        self.push_extra_options(&mut options);

        options
    }

    /// INFORM replies carry configuration only, no lease timers.
    fn configuration_options(&self) -> Vec<DhcpOption> {
        let mut options = vec![DhcpOption::server_identifier(self.config.server_identifier())];
        self.push_network_options(&mut options);
        self.push_extra_options(&mut options);
        options
    }

    fn push_network_options(&self, options: &mut Vec<DhcpOption>) {
        options.push(DhcpOption::subnet_mask(self.config.netmask));

        if let Some(gateway) = self.config.gateway {
            options.push(DhcpOption::routers(vec![gateway]));
        }

        if !self.config.dns_servers.is_empty() {
            options.push(DhcpOption::dns_servers(self.config.dns_servers.clone()));
        }

        options.push(DhcpOption::broadcast(self.config.broadcast_address()));
    }

    fn push_extra_options(&self, options: &mut Vec<DhcpOption>) {
        for extra in &self.config.extra_options {
            options.push(DhcpOption::raw(extra.code as u8, extra.data.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v4::options::{OptionValue, OPT_DNS_SERVER, OPT_LEASE_TIME, OPT_MESSAGE,
        OPT_ROUTER, OPT_SERVER_ID, OPT_SUBNET_MASK};
    use crate::v4::packet::{HLEN_ETHERNET, HTYPE_ETHERNET};

    fn test_config() -> V4Config {
        V4Config {
            subnet: Ipv4Addr::new(192, 168, 1, 0),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            range_start: Ipv4Addr::new(192, 168, 1, 100),
            range_end: Ipv4Addr::new(192, 168, 1, 200),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
            lease_time_seconds: 3600,
            renewal_time_seconds: None,
            rebinding_time_seconds: None,
            extra_options: Vec::new(),
        }
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn request_packet(msg_type: MessageType, mac: [u8; 6]) -> DhcpPacket {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);
        DhcpPacket {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: 0x12345678,
            secs: 0,
            flags: 0x8000,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![DhcpOption::message_type(msg_type)],
        }
    }

    const MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

    fn process(server: &mut V4Server, packet: &DhcpPacket) -> Vec<V4Reply> {
        server.process(&packet.encode(), Ipv4Addr::UNSPECIFIED, 68, epoch())
    }

    fn single_reply(server: &mut V4Server, packet: &DhcpPacket) -> DhcpPacket {
        let replies = process(server, packet);
        assert_eq!(replies.len(), 1);
        DhcpPacket::parse(&replies[0].payload).unwrap()
    }

    fn option_value<'a>(packet: &'a DhcpPacket, code: u8) -> &'a OptionValue {
        &packet
            .options
            .iter()
            .find(|option| option.code == code)
            .unwrap_or_else(|| panic!("option {} missing", code))
            .value
    }

    #[test]
    fn test_discover_offers_first_free_address() {
        let mut server = V4Server::new(test_config()).unwrap();
        let discover = request_packet(MessageType::Discover, MAC);

        let offer = single_reply(&mut server, &discover);

        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.yiaddr, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(offer.xid, discover.xid);

        // The offer is backed by a lease for this client.
        let leases = server.leases();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].ip_address, offer.yiaddr);
        assert_eq!(leases[0].mac_address, "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_offer_option_contents() {
        let mut server = V4Server::new(test_config()).unwrap();
        let offer = single_reply(&mut server, &request_packet(MessageType::Discover, MAC));

        assert_eq!(
            option_value(&offer, OPT_SERVER_ID),
            &OptionValue::Ipv4(Ipv4Addr::new(192, 168, 1, 1))
        );
        assert_eq!(option_value(&offer, OPT_LEASE_TIME), &OptionValue::U32(3600));
        assert_eq!(
            option_value(&offer, OPT_SUBNET_MASK),
            &OptionValue::Ipv4(Ipv4Addr::new(255, 255, 255, 0))
        );
        assert_eq!(
            option_value(&offer, OPT_ROUTER),
            &OptionValue::Ipv4List(vec![Ipv4Addr::new(192, 168, 1, 1)])
        );
        assert_eq!(
            option_value(&offer, OPT_DNS_SERVER),
            &OptionValue::Ipv4List(vec![Ipv4Addr::new(8, 8, 8, 8)])
        );

        // Mask precedes router on the wire.
        let mask_pos = offer.options.iter().position(|o| o.code == OPT_SUBNET_MASK);
        let router_pos = offer.options.iter().position(|o| o.code == OPT_ROUTER);
        assert!(mask_pos < router_pos);
    }

    #[test]
    fn test_full_lease_cycle() {
        let mut server = V4Server::new(test_config()).unwrap();

        let offer = single_reply(&mut server, &request_packet(MessageType::Discover, MAC));
        let offered_ip = offer.yiaddr;

        let mut request = request_packet(MessageType::Request, MAC);
        request.options.push(DhcpOption {
            code: crate::v4::options::OPT_REQUESTED_IP,
            value: OptionValue::Ipv4(offered_ip),
        });
        request
            .options
            .push(DhcpOption::server_identifier(Ipv4Addr::new(192, 168, 1, 1)));

        let ack = single_reply(&mut server, &request);
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, offered_ip);

        let mut release = request_packet(MessageType::Release, MAC);
        release.ciaddr = offered_ip;
        assert!(process(&mut server, &release).is_empty());
        assert!(server.leases().is_empty());
        assert_eq!(server.free_address_count(), 101);
    }

    #[test]
    fn test_discover_reuses_existing_lease() {
        let mut server = V4Server::new(test_config()).unwrap();

        let first = single_reply(&mut server, &request_packet(MessageType::Discover, MAC));
        let second = single_reply(&mut server, &request_packet(MessageType::Discover, MAC));
        assert_eq!(first.yiaddr, second.yiaddr);
        assert_eq!(server.leases().len(), 1);
    }

    #[test]
    fn test_discover_honors_requested_ip() {
        let mut server = V4Server::new(test_config()).unwrap();
        let mut discover = request_packet(MessageType::Discover, MAC);
        discover.options.push(DhcpOption {
            code: crate::v4::options::OPT_REQUESTED_IP,
            value: OptionValue::Ipv4(Ipv4Addr::new(192, 168, 1, 150)),
        });

        let offer = single_reply(&mut server, &discover);
        assert_eq!(offer.yiaddr, Ipv4Addr::new(192, 168, 1, 150));
    }

    #[test]
    fn test_request_outside_pool_naks() {
        let mut server = V4Server::new(test_config()).unwrap();

        let mut request = request_packet(MessageType::Request, MAC);
        request.options.push(DhcpOption {
            code: crate::v4::options::OPT_REQUESTED_IP,
            value: OptionValue::Ipv4(Ipv4Addr::new(10, 0, 0, 5)),
        });
        request
            .options
            .push(DhcpOption::server_identifier(Ipv4Addr::new(192, 168, 1, 1)));

        let nak = single_reply(&mut server, &request);
        assert_eq!(nak.message_type(), Some(MessageType::Nak));
        assert_eq!(nak.op, crate::v4::packet::BOOTREPLY);

        // Option 56 carries non-empty ASCII error text.
        match option_value(&nak, OPT_MESSAGE) {
            OptionValue::Text(text) => {
                assert!(!text.is_empty());
                assert!(text.is_ascii());
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_request_for_other_server_dropped() {
        let mut server = V4Server::new(test_config()).unwrap();

        let mut request = request_packet(MessageType::Request, MAC);
        request.options.push(DhcpOption {
            code: crate::v4::options::OPT_REQUESTED_IP,
            value: OptionValue::Ipv4(Ipv4Addr::new(192, 168, 1, 100)),
        });
        request
            .options
            .push(DhcpOption::server_identifier(Ipv4Addr::new(192, 168, 2, 1)));

        assert!(process(&mut server, &request).is_empty());
    }

    #[test]
    fn test_request_for_address_held_by_other_client_naks() {
        let mut server = V4Server::new(test_config()).unwrap();

        let offer = single_reply(
            &mut server,
            &request_packet(MessageType::Discover, [0xaa, 0, 0, 0, 0, 1]),
        );

        let mut request = request_packet(MessageType::Request, [0xaa, 0, 0, 0, 0, 2]);
        request.options.push(DhcpOption {
            code: crate::v4::options::OPT_REQUESTED_IP,
            value: OptionValue::Ipv4(offer.yiaddr),
        });

        let nak = single_reply(&mut server, &request);
        assert_eq!(nak.message_type(), Some(MessageType::Nak));
    }

    #[test]
    fn test_request_renews_existing_lease() {
        let mut server = V4Server::new(test_config()).unwrap();
        let offer = single_reply(&mut server, &request_packet(MessageType::Discover, MAC));

        let mut request = request_packet(MessageType::Request, MAC);
        request.options.push(DhcpOption {
            code: crate::v4::options::OPT_REQUESTED_IP,
            value: OptionValue::Ipv4(offer.yiaddr),
        });
        request.options.push(DhcpOption {
            code: crate::v4::options::OPT_HOSTNAME,
            value: OptionValue::Text("work station".to_string()),
        });

        let ack = single_reply(&mut server, &request);
        assert_eq!(ack.yiaddr, offer.yiaddr);
        assert_eq!(server.leases().len(), 1);
        assert_eq!(server.leases()[0].hostname.as_deref(), Some("workstation"));
    }

    #[test]
    fn test_decline_withholds_address() {
        let mut server = V4Server::new(test_config()).unwrap();
        let offer = single_reply(&mut server, &request_packet(MessageType::Discover, MAC));

        let mut decline = request_packet(MessageType::Decline, MAC);
        decline.options.push(DhcpOption {
            code: crate::v4::options::OPT_REQUESTED_IP,
            value: OptionValue::Ipv4(offer.yiaddr),
        });
        assert!(process(&mut server, &decline).is_empty());

        assert!(server.leases().is_empty());
        assert_eq!(server.declined_addresses(), vec![offer.yiaddr]);

        // The next discover skips the declined address.
        let next = single_reply(&mut server, &request_packet(MessageType::Discover, MAC));
        assert_ne!(next.yiaddr, offer.yiaddr);

        // Administrative clear makes it allocatable again.
        assert_eq!(server.clear_declined(), 1);
        assert!(server.declined_addresses().is_empty());
    }

    #[test]
    fn test_decline_for_unheld_address_is_dropped() {
        let mut server = V4Server::new(test_config()).unwrap();

        // No lease: an in-range address cannot be sunk by a forged DECLINE.
        let mut decline = request_packet(MessageType::Decline, MAC);
        decline.options.push(DhcpOption {
            code: crate::v4::options::OPT_REQUESTED_IP,
            value: OptionValue::Ipv4(Ipv4Addr::new(192, 168, 1, 100)),
        });
        assert!(process(&mut server, &decline).is_empty());
        assert!(server.declined_addresses().is_empty());
        assert_eq!(server.free_address_count(), 101);

        // Holding a lease for a different address does not qualify either.
        single_reply(&mut server, &request_packet(MessageType::Discover, MAC));
        let mut decline_other = request_packet(MessageType::Decline, MAC);
        decline_other.options.push(DhcpOption {
            code: crate::v4::options::OPT_REQUESTED_IP,
            value: OptionValue::Ipv4(Ipv4Addr::new(192, 168, 1, 150)),
        });
        assert!(process(&mut server, &decline_other).is_empty());
        assert!(server.declined_addresses().is_empty());
        assert_eq!(server.leases().len(), 1);
    }

    #[test]
    fn test_inform_returns_configuration_only() {
        let mut server = V4Server::new(test_config()).unwrap();

        let mut inform = request_packet(MessageType::Inform, MAC);
        inform.ciaddr = Ipv4Addr::new(192, 168, 1, 42);

        let ack = single_reply(&mut server, &inform);
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert!(ack.options.iter().all(|option| option.code != OPT_LEASE_TIME));
        assert!(ack.options.iter().any(|option| option.code == OPT_DNS_SERVER));
        assert!(server.leases().is_empty());
    }

    #[test]
    fn test_release_with_wrong_address_keeps_lease() {
        let mut server = V4Server::new(test_config()).unwrap();
        let offer = single_reply(&mut server, &request_packet(MessageType::Discover, MAC));

        let mut release = request_packet(MessageType::Release, MAC);
        release.ciaddr = Ipv4Addr::new(192, 168, 1, 199);
        assert!(process(&mut server, &release).is_empty());

        assert_eq!(server.leases().len(), 1);
        assert_eq!(server.leases()[0].ip_address, offer.yiaddr);
    }

    #[test]
    fn test_sweep_returns_expired_addresses() {
        let mut server = V4Server::new(test_config()).unwrap();
        single_reply(&mut server, &request_packet(MessageType::Discover, MAC));
        assert_eq!(server.free_address_count(), 100);

        // Still active at the expiry boundary minus one.
        server.sweep(epoch() + chrono::TimeDelta::seconds(3599));
        assert_eq!(server.leases().len(), 1);

        server.sweep(epoch() + chrono::TimeDelta::seconds(3600));
        assert!(server.leases().is_empty());
        assert_eq!(server.free_address_count(), 101);
    }

    #[test]
    fn test_client_identifier_option_is_the_key() {
        let mut server = V4Server::new(test_config()).unwrap();

        let client_id = OptionValue::ClientId {
            htype: 1,
            id: vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
        };

        let mut discover = request_packet(MessageType::Discover, MAC);
        discover.options.push(DhcpOption {
            code: crate::v4::options::OPT_CLIENT_ID,
            value: client_id.clone(),
        });
        let offer = single_reply(&mut server, &discover);

        // Same option 61 from a different chaddr maps to the same lease.
        let mut discover_again = request_packet(MessageType::Discover, [0xde, 0xad, 0, 0, 0, 1]);
        discover_again.options.push(DhcpOption {
            code: crate::v4::options::OPT_CLIENT_ID,
            value: client_id,
        });
        let offer_again = single_reply(&mut server, &discover_again);

        assert_eq!(offer.yiaddr, offer_again.yiaddr);
        assert_eq!(server.leases().len(), 1);
    }

    #[test]
    fn test_pool_exhaustion_silences_discover() {
        let config = V4Config {
            range_start: Ipv4Addr::new(192, 168, 1, 100),
            range_end: Ipv4Addr::new(192, 168, 1, 100),
            ..test_config()
        };
        let mut server = V4Server::new(config).unwrap();

        single_reply(&mut server, &request_packet(MessageType::Discover, [0xaa, 0, 0, 0, 0, 1]));
        let replies = process(&mut server, &request_packet(MessageType::Discover, [0xaa, 0, 0, 0, 0, 2]));
        assert!(replies.is_empty());
    }

    #[test]
    fn test_destination_hints() {
        let mut broadcast_request = request_packet(MessageType::Discover, MAC);
        broadcast_request.flags = 0x8000;
        assert_eq!(
            V4Server::destination(&broadcast_request, false),
            ReplyDestination::Broadcast
        );

        let mut unicast_request = request_packet(MessageType::Request, MAC);
        unicast_request.flags = 0;
        unicast_request.ciaddr = Ipv4Addr::new(192, 168, 1, 50);
        assert_eq!(
            V4Server::destination(&unicast_request, false),
            ReplyDestination::Unicast(Ipv4Addr::new(192, 168, 1, 50))
        );
        // NAKs are always broadcast.
        assert_eq!(
            V4Server::destination(&unicast_request, true),
            ReplyDestination::Broadcast
        );

        let mut relayed = request_packet(MessageType::Discover, MAC);
        relayed.giaddr = Ipv4Addr::new(192, 168, 5, 1);
        assert_eq!(
            V4Server::destination(&relayed, false),
            ReplyDestination::Relay(Ipv4Addr::new(192, 168, 5, 1))
        );
    }

    #[test]
    fn test_malformed_input_is_dropped() {
        let mut server = V4Server::new(test_config()).unwrap();
        let replies = server.process(&[0u8; 50], Ipv4Addr::UNSPECIFIED, 68, epoch());
        assert!(replies.is_empty());
    }
}

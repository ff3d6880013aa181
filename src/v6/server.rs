//! DHCPv6 server core.
//!
//! Same contract as the v4 core: synchronous, no I/O, caller-supplied clock.
//! Identity is the client DUID from option 1; bindings are tracked per
//! (DUID, IAID). Outcomes are reported per IA through STATUS_CODE sub-options
//! rather than distinct message types, so nearly every exchange ends in a
//! REPLY. v6 replies always go back to the sender's address and port, so no
//! destination hint is needed.

use std::net::Ipv6Addr;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::V6Config;
use crate::error::Result;
use crate::lease::{Lease6, LeaseSet6, format_client_id};
use crate::pool::Pool;
use crate::v6::message::{V6Message, V6MessageType};
use crate::v6::options::{IaAddr, IaNa, StatusCode, V6Option};

#[derive(Debug)]
pub struct V6Server {
    config: V6Config,
    pool: Pool<Ipv6Addr>,
    leases: LeaseSet6,
}

impl V6Server {
    pub fn new(config: V6Config) -> Result<Self> {
        config.validate()?;
        let pool = Pool::new(config.range_start, config.range_end);
        Ok(Self {
            config,
            pool,
            leases: LeaseSet6::new(),
        })
    }

    pub fn config(&self) -> &V6Config {
        &self.config
    }

    /// Handles one inbound datagram; replies are addressed back to the peer.
    pub fn process(
        &mut self,
        data: &[u8],
        peer: Ipv6Addr,
        peer_port: u16,
        now: DateTime<Utc>,
    ) -> Vec<Vec<u8>> {
        let message = match V6Message::parse(data) {
            Ok(message) => message,
            Err(error) => {
                debug!("Dropping malformed v6 packet from [{}]:{}: {}", peer, peer_port, error);
                return Vec::new();
            }
        };

        let Some(duid) = message.client_id().map(<[u8]>::to_vec) else {
            debug!("Dropping {} without client identifier from {}", message.msg_type, peer);
            return Vec::new();
        };

        info!("{} from {} ({})", message.msg_type, format_client_id(&duid), peer);

        let reply = match message.msg_type {
            V6MessageType::Solicit => Some(self.handle_solicit(&message, &duid, now)),
            V6MessageType::Request => self.handle_request(&message, &duid, now),
            V6MessageType::Confirm => Some(self.handle_confirm(&message, &duid)),
            V6MessageType::Renew => self.handle_renew(&message, &duid, now, true),
            V6MessageType::Rebind => self.handle_renew(&message, &duid, now, false),
            V6MessageType::Release => Some(self.handle_release(&message, &duid)),
            V6MessageType::InformationRequest => Some(self.handle_information_request(&message, &duid)),
            other => {
                debug!("Ignoring {} message", other);
                None
            }
        };

        reply.map(|message| message.encode()).into_iter().collect()
    }

    /// Drops every lease with `expires_at <= now` and returns its address
    /// to the pool.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        for (duid, iaid) in self.leases.expired_keys(now) {
            if let Some(lease) = self.leases.remove(&duid, iaid) {
                info!(
                    "Lease for {} iaid {} ({}) expired",
                    format_client_id(&duid),
                    iaid,
                    lease.address
                );
                self.pool.give_back(lease.address);
            }
        }
    }

    /// Pure projection of the lease table.
    pub fn leases(&self) -> Vec<&Lease6> {
        self.leases.iter().collect()
    }

    pub fn active_lease_count(&self, now: DateTime<Utc>) -> usize {
        self.leases.iter().filter(|lease| !lease.is_expired(now)).count()
    }

    pub fn free_address_count(&self) -> u128 {
        self.pool.free_count()
    }

    pub fn declined_addresses(&self) -> Vec<Ipv6Addr> {
        self.pool.declined()
    }

    pub fn clear_declined(&mut self) -> usize {
        self.pool.clear_declined()
    }

    fn handle_solicit(&mut self, message: &V6Message, duid: &[u8], now: DateTime<Utc>) -> V6Message {
        let rapid = self.config.rapid_commit && message.has_rapid_commit();

        let msg_type = if rapid {
            V6MessageType::Reply
        } else {
            V6MessageType::Advertise
        };
        let mut reply = self.base_reply(msg_type, message);

        if rapid {
            reply.options.push(V6Option::RapidCommit);
        }

        for ia in message.ia_nas() {
            let outcome = if rapid {
                self.commit_address(duid, ia, now)
            } else {
                self.select_address(duid, ia, now)
            };

            match outcome {
                Some(address) => {
                    if rapid {
                        info!(
                            "REPLY (rapid commit) {} to {} iaid {}",
                            address,
                            format_client_id(duid),
                            ia.iaid
                        );
                    }
                    reply.options.push(self.ia_with_address(ia.iaid, address, None));
                }
                None => {
                    warn!(
                        "Pool exhausted, no address for {} iaid {}",
                        format_client_id(duid),
                        ia.iaid
                    );
                    reply.options.push(self.ia_with_status(
                        ia.iaid,
                        StatusCode::NoAddrsAvail,
                        "no addresses available",
                    ));
                }
            }
        }

        self.push_config_options(&mut reply);
        reply
    }

    fn handle_request(
        &mut self,
        message: &V6Message,
        duid: &[u8],
        now: DateTime<Utc>,
    ) -> Option<V6Message> {
        if !self.addressed_to_us(message) {
            info!("REQUEST from {} is for a different server", format_client_id(duid));
            return None;
        }

        let mut reply = self.base_reply(V6MessageType::Reply, message);

        for ia in message.ia_nas() {
            match self.commit_address(duid, ia, now) {
                Some(address) => {
                    info!("REPLY {} to {} iaid {}", address, format_client_id(duid), ia.iaid);
                    reply.options.push(self.ia_with_address(
                        ia.iaid,
                        address,
                        Some((StatusCode::Success, "address assigned")),
                    ));
                }
                None => {
                    warn!(
                        "Pool exhausted, no address for {} iaid {}",
                        format_client_id(duid),
                        ia.iaid
                    );
                    reply.options.push(self.ia_with_status(
                        ia.iaid,
                        StatusCode::NoAddrsAvail,
                        "no addresses available",
                    ));
                }
            }
        }

        self.push_config_options(&mut reply);
        Some(reply)
    }

    fn handle_confirm(&self, message: &V6Message, duid: &[u8]) -> V6Message {
        let mut reply = self.base_reply(V6MessageType::Reply, message);

        for ia in message.ia_nas() {
            let all_on_link = ia
                .addresses()
                .iter()
                .all(|addr| self.config.on_link(addr.address));

            let ia_option = if all_on_link {
                self.ia_with_status(ia.iaid, StatusCode::Success, "all addresses on link")
            } else {
                info!(
                    "CONFIRM from {} iaid {} has off-link addresses",
                    format_client_id(duid),
                    ia.iaid
                );
                self.ia_with_status(ia.iaid, StatusCode::NotOnLink, "address not on link")
            };
            reply.options.push(ia_option);
        }

        reply
    }

    fn handle_renew(
        &mut self,
        message: &V6Message,
        duid: &[u8],
        now: DateTime<Utc>,
        require_server_id: bool,
    ) -> Option<V6Message> {
        if require_server_id && !self.addressed_to_us(message) {
            info!("RENEW from {} is for a different server", format_client_id(duid));
            return None;
        }

        let mut reply = self.base_reply(V6MessageType::Reply, message);

        for ia in message.ia_nas() {
            match self.leases.get_mut(duid, ia.iaid) {
                Some(lease) => {
                    lease.renew(self.config.lease_time_seconds, now);
                    lease.preferred_lifetime = self.config.lease_time_seconds;
                    let address = lease.address;
                    reply.options.push(self.ia_with_address(
                        ia.iaid,
                        address,
                        Some((StatusCode::Success, "lease renewed")),
                    ));
                }
                None => {
                    reply.options.push(self.ia_with_status(
                        ia.iaid,
                        StatusCode::NoBinding,
                        "no binding for this identity association",
                    ));
                }
            }
        }

        self.push_config_options(&mut reply);
        Some(reply)
    }

    fn handle_release(&mut self, message: &V6Message, duid: &[u8]) -> V6Message {
        let mut reply = self.base_reply(V6MessageType::Reply, message);

        for ia in message.ia_nas() {
            match self.leases.remove(duid, ia.iaid) {
                Some(lease) => {
                    self.pool.give_back(lease.address);
                    info!(
                        "RELEASE {} from {} iaid {}",
                        lease.address,
                        format_client_id(duid),
                        ia.iaid
                    );
                    reply.options.push(self.ia_with_status(
                        ia.iaid,
                        StatusCode::Success,
                        "lease released",
                    ));
                }
                None => {
                    reply.options.push(self.ia_with_status(
                        ia.iaid,
                        StatusCode::NoBinding,
                        "no binding for this identity association",
                    ));
                }
            }
        }

        reply
    }

    fn handle_information_request(&self, message: &V6Message, duid: &[u8]) -> V6Message {
        info!("INFORMATION-REQUEST response to {}", format_client_id(duid));
        let mut reply = self.base_reply(V6MessageType::Reply, message);
        self.push_config_options(&mut reply);
        reply
    }

    /// A server id in the request must match ours; absence is fine.
    fn addressed_to_us(&self, message: &V6Message) -> bool {
        message
            .server_id()
            .is_none_or(|server_id| server_id == self.config.server_duid.as_slice())
    }

    /// Every reply echoes the client DUID and carries our own.
    fn base_reply(&self, msg_type: V6MessageType, request: &V6Message) -> V6Message {
        let mut reply = V6Message::new(msg_type, request.transaction_id);
        if let Some(client_id) = request.client_id() {
            reply.options.push(V6Option::ClientId(client_id.to_vec()));
        }
        reply
            .options
            .push(V6Option::ServerId(self.config.server_duid.clone()));
        reply
    }

    fn push_config_options(&self, reply: &mut V6Message) {
        if !self.config.dns_servers.is_empty() {
            reply
                .options
                .push(V6Option::DnsServers(self.config.dns_servers.clone()));
        }
        for extra in &self.config.extra_options {
            reply.options.push(V6Option::Unknown {
                code: extra.code,
                data: extra.data.clone(),
            });
        }
    }

    /// Candidate address for an ADVERTISE; nothing is claimed or written.
    fn select_address(&self, duid: &[u8], ia: &IaNa, now: DateTime<Utc>) -> Option<Ipv6Addr> {
        if let Some(lease) = self.leases.get(duid, ia.iaid)
            && !lease.is_expired(now)
        {
            return Some(lease.address);
        }

        for requested in ia.addresses() {
            if self.pool.is_free(requested.address) {
                return Some(requested.address);
            }
        }

        self.pool.peek_next()
    }

    /// Allocates and records a lease: existing binding first, then the
    /// client's proposals, then the lowest free address.
    fn commit_address(&mut self, duid: &[u8], ia: &IaNa, now: DateTime<Utc>) -> Option<Ipv6Addr> {
        if let Some(lease) = self.leases.get_mut(duid, ia.iaid) {
            if !lease.is_expired(now) {
                lease.renew(self.config.lease_time_seconds, now);
                return Some(lease.address);
            }
            let address = lease.address;
            self.leases.remove(duid, ia.iaid);
            self.pool.give_back(address);
        }

        let mut chosen = None;
        for requested in ia.addresses() {
            if self.pool.take(requested.address) {
                chosen = Some((requested.address, Self::opaque_suboptions(requested)));
                break;
            }
        }

        let (address, extra_options) = match chosen {
            Some(found) => found,
            None => (self.pool.take_next()?, Vec::new()),
        };

        let mut lease = Lease6::new(
            address,
            duid.to_vec(),
            ia.iaid,
            self.config.lease_time_seconds,
            self.config.lease_time_seconds,
            now,
        );
        lease.extra_options = extra_options;
        self.leases.insert(lease);
        Some(address)
    }

    fn opaque_suboptions(addr: &IaAddr) -> Vec<(u16, Vec<u8>)> {
        addr.options
            .iter()
            .filter_map(|option| match option {
                V6Option::Unknown { code, data } => Some((*code, data.clone())),
                _ => None,
            })
            .collect()
    }

    fn ia_with_address(
        &self,
        iaid: u32,
        address: Ipv6Addr,
        status: Option<(StatusCode, &str)>,
    ) -> V6Option {
        let mut options = vec![V6Option::IaAddr(IaAddr {
            address,
            preferred_lifetime: self.config.lease_time_seconds,
            valid_lifetime: self.config.lease_time_seconds,
            options: Vec::new(),
        })];
        if let Some((code, message)) = status {
            options.push(V6Option::status(code, message));
        }
        V6Option::IaNa(IaNa {
            iaid,
            t1: self.config.t1(),
            t2: self.config.t2(),
            options,
        })
    }

    fn ia_with_status(&self, iaid: u32, code: StatusCode, message: &str) -> V6Option {
        V6Option::IaNa(IaNa {
            iaid,
            t1: self.config.t1(),
            t2: self.config.t2(),
            options: vec![V6Option::status(code, message)],
        })
    }
}

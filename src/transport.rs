//! UDP transport adapter.
//!
//! Owns the sockets, the wall clock and the expiry timer; the protocol cores
//! own nothing but their state. All datagrams for a family funnel through a
//! single mutex-held core, so the cores never see concurrent calls. Replies
//! come back with a destination hint (v4) or implicitly addressed to the
//! sender (v6), and this layer turns the hint into a socket address.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::v4::server::{ReplyDestination, V4Server};
use crate::v6::server::V6Server;

const DHCPV4_SERVER_PORT: u16 = 67;
const DHCPV4_CLIENT_PORT: u16 = 68;
const DHCPV6_SERVER_PORT: u16 = 547;
const DHCPV6_CLIENT_PORT: u16 = 546;

const RECV_BUFFER_SIZE: usize = 1500;
const SWEEP_INTERVAL_SECS: u64 = 60;

const RATE_LIMIT_WINDOW_SECS: u64 = 1;
const RATE_LIMIT_MAX_REQUESTS: usize = 10;
const RATE_LIMIT_CLEANUP_THRESHOLD: usize = 1000;

/// Sliding-window limiter keyed by source address, shared by both families.
struct RateLimiter {
    clients: HashMap<SocketAddr, Vec<Instant>>,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    fn is_limited(&mut self, source: SocketAddr) -> bool {
        let now = Instant::now();
        let window = Duration::from_secs(RATE_LIMIT_WINDOW_SECS);

        if self.clients.len() > RATE_LIMIT_CLEANUP_THRESHOLD {
            self.clients.retain(|_, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < window);
                !timestamps.is_empty()
            });
        }

        let timestamps = self.clients.entry(source).or_default();
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() >= RATE_LIMIT_MAX_REQUESTS {
            return true;
        }

        timestamps.push(now);
        false
    }
}

pub struct DhcpServer {
    v4: Option<Arc<V4Endpoint>>,
    v6: Option<Arc<V6Endpoint>>,
}

struct V4Endpoint {
    core: Mutex<V4Server>,
    socket: UdpSocket,
    rate_limiter: Mutex<RateLimiter>,
}

struct V6Endpoint {
    core: Mutex<V6Server>,
    socket: UdpSocket,
    rate_limiter: Mutex<RateLimiter>,
}

impl DhcpServer {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let v4 = match config.v4 {
            Some(v4_config) => {
                let core = V4Server::new(v4_config)?;
                let socket = create_v4_socket()?;
                info!(
                    "DHCPv4 listening on port {} (pool {} - {}, {} addresses)",
                    DHCPV4_SERVER_PORT,
                    core.config().range_start,
                    core.config().range_end,
                    core.config().pool_size()
                );
                Some(Arc::new(V4Endpoint {
                    core: Mutex::new(core),
                    socket,
                    rate_limiter: Mutex::new(RateLimiter::new()),
                }))
            }
            None => None,
        };

        let v6 = match config.v6 {
            Some(v6_config) => {
                let core = V6Server::new(v6_config)?;
                let socket = create_v6_socket()?;
                info!(
                    "DHCPv6 listening on port {} (range {} - {})",
                    DHCPV6_SERVER_PORT,
                    core.config().range_start,
                    core.config().range_end
                );
                Some(Arc::new(V6Endpoint {
                    core: Mutex::new(core),
                    socket,
                    rate_limiter: Mutex::new(RateLimiter::new()),
                }))
            }
            None => None,
        };

        Ok(Self { v4, v6 })
    }

    pub async fn run(&self) -> Result<()> {
        let v4_loop = async {
            match &self.v4 {
                Some(endpoint) => run_v4(Arc::clone(endpoint)).await,
                None => std::future::pending().await,
            }
        };
        let v6_loop = async {
            match &self.v6 {
                Some(endpoint) => run_v6(Arc::clone(endpoint)).await,
                None => std::future::pending().await,
            }
        };

        tokio::try_join!(v4_loop, v6_loop, self.run_sweeper())?;
        Ok(())
    }

    /// Pull-based expiry: the cores never see a timer, only `sweep(now)`.
    async fn run_sweeper(&self) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            let now = Utc::now();
            if let Some(endpoint) = &self.v4 {
                endpoint.core.lock().await.sweep(now);
            }
            if let Some(endpoint) = &self.v6 {
                endpoint.core.lock().await.sweep(now);
            }
        }
    }

    /// Administrative reset of both declined sets (wired to SIGHUP in the
    /// binary). Returns (v4, v6) counts.
    pub async fn clear_declined(&self) -> (usize, usize) {
        let v4_cleared = match &self.v4 {
            Some(endpoint) => endpoint.core.lock().await.clear_declined(),
            None => 0,
        };
        let v6_cleared = match &self.v6 {
            Some(endpoint) => endpoint.core.lock().await.clear_declined(),
            None => 0,
        };
        (v4_cleared, v6_cleared)
    }

    pub async fn log_lease_summary(&self) {
        let now = Utc::now();
        if let Some(endpoint) = &self.v4 {
            let core = endpoint.core.lock().await;
            info!(
                "v4: {} active leases, {} free addresses, {} declined",
                core.active_lease_count(now),
                core.free_address_count(),
                core.declined_addresses().len()
            );
        }
        if let Some(endpoint) = &self.v6 {
            let core = endpoint.core.lock().await;
            info!(
                "v6: {} active leases, {} free addresses",
                core.active_lease_count(now),
                core.free_address_count()
            );
        }
    }
}

async fn run_v4(endpoint: Arc<V4Endpoint>) -> Result<()> {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    loop {
        let (size, source) = match endpoint.socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(recv_error) => {
                error!("v4 receive error: {}", recv_error);
                continue;
            }
        };

        if endpoint.rate_limiter.lock().await.is_limited(source) {
            warn!("Rate limited v4 client {}", source);
            continue;
        }

        let (peer_ip, peer_port) = match source {
            SocketAddr::V4(addr) => (*addr.ip(), addr.port()),
            SocketAddr::V6(_) => {
                debug!("Ignoring v6-sourced datagram on the v4 socket");
                continue;
            }
        };

        let replies = endpoint
            .core
            .lock()
            .await
            .process(&buffer[..size], peer_ip, peer_port, Utc::now());

        for reply in replies {
            let destination = match reply.destination {
                ReplyDestination::Relay(giaddr) => {
                    SocketAddrV4::new(giaddr, DHCPV4_SERVER_PORT)
                }
                ReplyDestination::Broadcast => {
                    SocketAddrV4::new(Ipv4Addr::BROADCAST, DHCPV4_CLIENT_PORT)
                }
                ReplyDestination::Unicast(addr) => {
                    SocketAddrV4::new(addr, DHCPV4_CLIENT_PORT)
                }
            };

            if let Err(send_error) = endpoint
                .socket
                .send_to(&reply.payload, SocketAddr::V4(destination))
                .await
            {
                warn!("Failed to send v4 reply to {}: {}", destination, send_error);
            }
        }
    }
}

async fn run_v6(endpoint: Arc<V6Endpoint>) -> Result<()> {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    loop {
        let (size, source) = match endpoint.socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(recv_error) => {
                error!("v6 receive error: {}", recv_error);
                continue;
            }
        };

        if endpoint.rate_limiter.lock().await.is_limited(source) {
            warn!("Rate limited v6 client {}", source);
            continue;
        }

        let (peer_ip, peer_port, scope_id) = match source {
            SocketAddr::V6(addr) => (*addr.ip(), addr.port(), addr.scope_id()),
            SocketAddr::V4(_) => {
                debug!("Ignoring v4-sourced datagram on the v6 socket");
                continue;
            }
        };

        let replies = endpoint
            .core
            .lock()
            .await
            .process(&buffer[..size], peer_ip, peer_port, Utc::now());

        // Replies go back to the sender's link-local address on the client
        // port, keeping the scope so link-local sources stay reachable.
        let destination = SocketAddrV6::new(peer_ip, DHCPV6_CLIENT_PORT, 0, scope_id);
        for payload in replies {
            if let Err(send_error) = endpoint
                .socket
                .send_to(&payload, SocketAddr::V6(destination))
                .await
            {
                warn!("Failed to send v6 reply to {}: {}", destination, send_error);
            }
        }
    }
}

fn create_v4_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|socket_error| Error::Socket(format!("Failed to create socket: {}", socket_error)))?;

    socket
        .set_reuse_address(true)
        .map_err(|socket_error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", socket_error)))?;

    socket
        .set_broadcast(true)
        .map_err(|socket_error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", socket_error)))?;

    socket
        .set_nonblocking(true)
        .map_err(|socket_error| Error::Socket(format!("Failed to set non-blocking: {}", socket_error)))?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCPV4_SERVER_PORT);
    socket
        .bind(&bind_addr.into())
        .map_err(|socket_error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, socket_error)))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
        .map_err(|socket_error| Error::Socket(format!("Failed to convert to tokio socket: {}", socket_error)))
}

fn create_v6_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|socket_error| Error::Socket(format!("Failed to create socket: {}", socket_error)))?;

    socket
        .set_reuse_address(true)
        .map_err(|socket_error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", socket_error)))?;

    socket
        .set_only_v6(true)
        .map_err(|socket_error| Error::Socket(format!("Failed to set IPV6_V6ONLY: {}", socket_error)))?;

    socket
        .set_nonblocking(true)
        .map_err(|socket_error| Error::Socket(format!("Failed to set non-blocking: {}", socket_error)))?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, DHCPV6_SERVER_PORT, 0, 0);
    socket
        .bind(&bind_addr.into())
        .map_err(|socket_error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, socket_error)))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
        .map_err(|socket_error| Error::Socket(format!("Failed to convert to tokio socket: {}", socket_error)))
}

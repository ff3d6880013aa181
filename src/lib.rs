pub mod config;
pub mod error;
pub mod lease;
pub mod net;
pub mod pool;
pub mod transport;
pub mod v4;
pub mod v6;

pub use config::{ServerConfig, V4Config, V6Config};
pub use error::{Error, Result};
pub use lease::{Lease4, Lease6};
pub use transport::DhcpServer;
pub use v4::packet::DhcpPacket;
pub use v4::server::{ReplyDestination, V4Reply, V4Server};
pub use v6::message::V6Message;
pub use v6::server::V6Server;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::net::{in_prefix, in_subnet_v4, is_contiguous_netmask};

/// RFC 2131 floors lease sanity well below this, but nothing useful runs on
/// sub-minute leases.
pub const MIN_LEASE_SECONDS: u32 = 60;

/// Top-level configuration: either family may be enabled independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub v4: Option<V4Config>,
    pub v6: Option<V6Config>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            v4: Some(V4Config::default()),
            v6: Some(V6Config::default()),
        }
    }
}

impl ServerConfig {
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: ServerConfig = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = ServerConfig::default();
            config.save(path).await?;
            Ok(config)
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.v4.is_none() && self.v6.is_none() {
            return Err(Error::InvalidConfig(
                "at least one of v4 or v6 must be configured".to_string(),
            ));
        }
        if let Some(v4) = &self.v4 {
            v4.validate()?;
        }
        if let Some(v6) = &self.v6 {
            v6.validate()?;
        }
        Ok(())
    }
}

/// An opaque option appended verbatim to every reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraOption {
    pub code: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V4Config {
    pub subnet: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub lease_time_seconds: u32,
    pub renewal_time_seconds: Option<u32>,
    pub rebinding_time_seconds: Option<u32>,
    #[serde(default)]
    pub extra_options: Vec<ExtraOption>,
}

impl Default for V4Config {
    fn default() -> Self {
        Self {
            subnet: Ipv4Addr::new(192, 168, 1, 0),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            range_start: Ipv4Addr::new(192, 168, 1, 100),
            range_end: Ipv4Addr::new(192, 168, 1, 200),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            lease_time_seconds: 86400,
            renewal_time_seconds: None,
            rebinding_time_seconds: None,
            extra_options: Vec::new(),
        }
    }
}

impl V4Config {
    pub fn validate(&self) -> Result<()> {
        if !is_contiguous_netmask(self.netmask) {
            return Err(Error::InvalidConfig(format!(
                "invalid subnet mask: {} (must be contiguous)",
                self.netmask
            )));
        }

        if !in_subnet_v4(self.range_start, self.subnet, self.netmask) {
            return Err(Error::InvalidConfig(format!(
                "range_start {} is outside subnet {}/{}",
                self.range_start, self.subnet, self.netmask
            )));
        }

        if !in_subnet_v4(self.range_end, self.subnet, self.netmask) {
            return Err(Error::InvalidConfig(format!(
                "range_end {} is outside subnet {}/{}",
                self.range_end, self.subnet, self.netmask
            )));
        }

        if u32::from(self.range_start) > u32::from(self.range_end) {
            return Err(Error::InvalidConfig(
                "range_start must be less than or equal to range_end".to_string(),
            ));
        }

        if self.lease_time_seconds < MIN_LEASE_SECONDS {
            return Err(Error::InvalidConfig(format!(
                "lease_time_seconds must be at least {}",
                MIN_LEASE_SECONDS
            )));
        }

        Ok(())
    }

    pub fn ip_in_range(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        addr >= u32::from(self.range_start) && addr <= u32::from(self.range_end)
    }

    pub fn pool_size(&self) -> u32 {
        u32::from(self.range_end) - u32::from(self.range_start) + 1
    }

    /// Identity used for option 54 and for REQUEST server-id validation.
    pub fn server_identifier(&self) -> Ipv4Addr {
        self.gateway.unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    pub fn broadcast_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.subnet) | !u32::from(self.netmask))
    }

    pub fn renewal_time(&self) -> u32 {
        self.renewal_time_seconds
            .unwrap_or(self.lease_time_seconds / 2)
    }

    pub fn rebinding_time(&self) -> u32 {
        self.rebinding_time_seconds
            .unwrap_or(self.lease_time_seconds / 8 * 7)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V6Config {
    pub prefix: Ipv6Addr,
    pub prefix_length: u8,
    pub range_start: Ipv6Addr,
    pub range_end: Ipv6Addr,
    pub dns_servers: Vec<Ipv6Addr>,
    pub lease_time_seconds: u32,
    pub rapid_commit: bool,
    /// Opaque server DUID, constant for the lifetime of the deployment.
    pub server_duid: Vec<u8>,
    #[serde(default)]
    pub extra_options: Vec<ExtraOption>,
}

impl Default for V6Config {
    fn default() -> Self {
        Self {
            prefix: "2001:db8::".parse().expect("valid literal"),
            prefix_length: 64,
            range_start: "2001:db8::1000".parse().expect("valid literal"),
            range_end: "2001:db8::1fff".parse().expect("valid literal"),
            dns_servers: vec!["2001:4860:4860::8888".parse().expect("valid literal")],
            lease_time_seconds: 86400,
            rapid_commit: false,
            server_duid: b"dualease-server-duid".to_vec(),
            extra_options: Vec::new(),
        }
    }
}

impl V6Config {
    pub fn validate(&self) -> Result<()> {
        if self.prefix_length > 128 {
            return Err(Error::InvalidConfig(format!(
                "prefix_length must be 0..=128, got {}",
                self.prefix_length
            )));
        }

        if !in_prefix(self.range_start, self.prefix, self.prefix_length) {
            return Err(Error::InvalidConfig(format!(
                "range_start {} is outside prefix {}/{}",
                self.range_start, self.prefix, self.prefix_length
            )));
        }

        if !in_prefix(self.range_end, self.prefix, self.prefix_length) {
            return Err(Error::InvalidConfig(format!(
                "range_end {} is outside prefix {}/{}",
                self.range_end, self.prefix, self.prefix_length
            )));
        }

        if u128::from(self.range_start) > u128::from(self.range_end) {
            return Err(Error::InvalidConfig(
                "range_start must be less than or equal to range_end".to_string(),
            ));
        }

        if self.lease_time_seconds < MIN_LEASE_SECONDS {
            return Err(Error::InvalidConfig(format!(
                "lease_time_seconds must be at least {}",
                MIN_LEASE_SECONDS
            )));
        }

        if self.server_duid.is_empty() {
            return Err(Error::InvalidConfig("server_duid must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn ip_in_range(&self, ip: Ipv6Addr) -> bool {
        let addr = u128::from(ip);
        addr >= u128::from(self.range_start) && addr <= u128::from(self.range_end)
    }

    pub fn on_link(&self, ip: Ipv6Addr) -> bool {
        in_prefix(ip, self.prefix, self.prefix_length)
    }

    /// T1 per RFC 8415 recommendation: half the preferred lifetime.
    pub fn t1(&self) -> u32 {
        self.lease_time_seconds / 2
    }

    pub fn t2(&self) -> u32 {
        self.lease_time_seconds / 8 * 7
    }
}

pub fn sanitize_hostname(hostname: &str) -> String {
    hostname
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.')
        .take(255)
        .collect()
}

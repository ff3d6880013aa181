//! DHCPv6 options (RFC 8415, RFC 3646).
//!
//! Options of interest are decoded into typed variants; identity-association
//! containers carry their sub-options as a recursive tree, so IAADDR inside
//! IA_NA is a first-class value rather than an opaque slice. IA_TA, IA_PD and
//! relay payloads are recognised but carried opaque, and anything else falls
//! through to `Unknown`.

use std::net::Ipv6Addr;

use crate::error::{Error, Result};

pub const OPT_CLIENTID: u16 = 1;
pub const OPT_SERVERID: u16 = 2;
pub const OPT_IA_NA: u16 = 3;
pub const OPT_IA_TA: u16 = 4;
pub const OPT_IAADDR: u16 = 5;
pub const OPT_ORO: u16 = 6;
pub const OPT_PREFERENCE: u16 = 7;
pub const OPT_ELAPSED_TIME: u16 = 8;
pub const OPT_RELAY_MSG: u16 = 9;
pub const OPT_STATUS_CODE: u16 = 13;
pub const OPT_RAPID_COMMIT: u16 = 14;
pub const OPT_DNS_SERVERS: u16 = 23;
pub const OPT_IA_PD: u16 = 25;

const STATUS_SUCCESS: u16 = 0;
const STATUS_UNSPEC_FAIL: u16 = 1;
const STATUS_NO_ADDRS_AVAIL: u16 = 2;
const STATUS_NO_BINDING: u16 = 3;
const STATUS_NOT_ON_LINK: u16 = 4;
const STATUS_USE_MULTICAST: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    UnspecFail,
    NoAddrsAvail,
    NoBinding,
    NotOnLink,
    UseMulticast,
    Other(u16),
}

impl From<StatusCode> for u16 {
    fn from(value: StatusCode) -> u16 {
        match value {
            StatusCode::Success => STATUS_SUCCESS,
            StatusCode::UnspecFail => STATUS_UNSPEC_FAIL,
            StatusCode::NoAddrsAvail => STATUS_NO_ADDRS_AVAIL,
            StatusCode::NoBinding => STATUS_NO_BINDING,
            StatusCode::NotOnLink => STATUS_NOT_ON_LINK,
            StatusCode::UseMulticast => STATUS_USE_MULTICAST,
            StatusCode::Other(code) => code,
        }
    }
}

impl From<u16> for StatusCode {
    fn from(value: u16) -> Self {
        match value {
            STATUS_SUCCESS => Self::Success,
            STATUS_UNSPEC_FAIL => Self::UnspecFail,
            STATUS_NO_ADDRS_AVAIL => Self::NoAddrsAvail,
            STATUS_NO_BINDING => Self::NoBinding,
            STATUS_NOT_ON_LINK => Self::NotOnLink,
            STATUS_USE_MULTICAST => Self::UseMulticast,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::UnspecFail => write!(f, "UnspecFail"),
            Self::NoAddrsAvail => write!(f, "NoAddrsAvail"),
            Self::NoBinding => write!(f, "NoBinding"),
            Self::NotOnLink => write!(f, "NotOnLink"),
            Self::UseMulticast => write!(f, "UseMulticast"),
            Self::Other(code) => write!(f, "Other({})", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaNa {
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub options: Vec<V6Option>,
}

impl IaNa {
    /// The addresses the client proposes inside this IA. Empty means the
    /// server chooses.
    pub fn addresses(&self) -> Vec<&IaAddr> {
        self.options
            .iter()
            .filter_map(|option| match option {
                V6Option::IaAddr(addr) => Some(addr),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaAddr {
    pub address: Ipv6Addr,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub options: Vec<V6Option>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum V6Option {
    ClientId(Vec<u8>),
    ServerId(Vec<u8>),
    IaNa(IaNa),
    IaAddr(IaAddr),
    Oro(Vec<u16>),
    Preference(u8),
    /// Hundredths of a second since the client began the exchange.
    ElapsedTime(u16),
    RelayMessage(Vec<u8>),
    StatusCode(Status),
    RapidCommit,
    DnsServers(Vec<Ipv6Addr>),
    /// Prefix delegation is recognised but not served.
    IaPd(Vec<u8>),
    IaTa(Vec<u8>),
    Unknown { code: u16, data: Vec<u8> },
}

impl V6Option {
    pub fn code(&self) -> u16 {
        match self {
            Self::ClientId(_) => OPT_CLIENTID,
            Self::ServerId(_) => OPT_SERVERID,
            Self::IaNa(_) => OPT_IA_NA,
            Self::IaAddr(_) => OPT_IAADDR,
            Self::Oro(_) => OPT_ORO,
            Self::Preference(_) => OPT_PREFERENCE,
            Self::ElapsedTime(_) => OPT_ELAPSED_TIME,
            Self::RelayMessage(_) => OPT_RELAY_MSG,
            Self::StatusCode(_) => OPT_STATUS_CODE,
            Self::RapidCommit => OPT_RAPID_COMMIT,
            Self::DnsServers(_) => OPT_DNS_SERVERS,
            Self::IaPd(_) => OPT_IA_PD,
            Self::IaTa(_) => OPT_IA_TA,
            Self::Unknown { code, .. } => *code,
        }
    }

    /// Parses a whole option stream. Terminates when the buffer is empty;
    /// a partial option header or body is fatal.
    pub fn parse_stream(data: &[u8]) -> Result<Vec<V6Option>> {
        let mut options = Vec::new();
        let mut index = 0;

        while index < data.len() {
            if index + 4 > data.len() {
                return Err(Error::InvalidPacket(
                    "Truncated DHCPv6 option header".to_string(),
                ));
            }

            let code = u16::from_be_bytes([data[index], data[index + 1]]);
            let length = u16::from_be_bytes([data[index + 2], data[index + 3]]) as usize;

            if index + 4 + length > data.len() {
                return Err(Error::InvalidPacket(format!(
                    "Truncated DHCPv6 option {} (length {})",
                    code, length
                )));
            }

            options.push(Self::parse_one(code, &data[index + 4..index + 4 + length])?);
            index += 4 + length;
        }

        Ok(options)
    }

    fn parse_one(code: u16, data: &[u8]) -> Result<V6Option> {
        Ok(match code {
            OPT_CLIENTID => {
                if data.is_empty() {
                    return Err(Error::InvalidPacket("Empty client DUID".to_string()));
                }
                Self::ClientId(data.to_vec())
            }
            OPT_SERVERID => {
                if data.is_empty() {
                    return Err(Error::InvalidPacket("Empty server DUID".to_string()));
                }
                Self::ServerId(data.to_vec())
            }
            OPT_IA_NA => {
                if data.len() < 12 {
                    return Err(Error::InvalidPacket(format!(
                        "IA_NA too short: {} bytes",
                        data.len()
                    )));
                }
                Self::IaNa(IaNa {
                    iaid: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                    t1: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                    t2: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
                    options: Self::parse_stream(&data[12..])?,
                })
            }
            OPT_IAADDR => {
                if data.len() < 24 {
                    return Err(Error::InvalidPacket(format!(
                        "IAADDR too short: {} bytes",
                        data.len()
                    )));
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&data[..16]);
                Self::IaAddr(IaAddr {
                    address: Ipv6Addr::from(octets),
                    preferred_lifetime: u32::from_be_bytes([
                        data[16], data[17], data[18], data[19],
                    ]),
                    valid_lifetime: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
                    options: Self::parse_stream(&data[24..])?,
                })
            }
            OPT_ORO => {
                if data.len() % 2 != 0 {
                    return Err(Error::InvalidPacket(
                        "ORO expects a multiple of 2 bytes".to_string(),
                    ));
                }
                Self::Oro(
                    data.chunks_exact(2)
                        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                        .collect(),
                )
            }
            OPT_PREFERENCE => {
                if data.len() != 1 {
                    return Err(Error::InvalidPacket("Preference expects 1 byte".to_string()));
                }
                Self::Preference(data[0])
            }
            OPT_ELAPSED_TIME => {
                if data.len() != 2 {
                    return Err(Error::InvalidPacket(
                        "Elapsed time expects 2 bytes".to_string(),
                    ));
                }
                Self::ElapsedTime(u16::from_be_bytes([data[0], data[1]]))
            }
            OPT_RELAY_MSG => Self::RelayMessage(data.to_vec()),
            OPT_STATUS_CODE => {
                if data.len() < 2 {
                    return Err(Error::InvalidPacket(
                        "Status code expects at least 2 bytes".to_string(),
                    ));
                }
                Self::StatusCode(Status {
                    code: u16::from_be_bytes([data[0], data[1]]).into(),
                    message: String::from_utf8_lossy(&data[2..]).to_string(),
                })
            }
            OPT_RAPID_COMMIT => {
                if !data.is_empty() {
                    return Err(Error::InvalidPacket(
                        "Rapid commit carries no payload".to_string(),
                    ));
                }
                Self::RapidCommit
            }
            OPT_DNS_SERVERS => {
                if data.len() % 16 != 0 {
                    return Err(Error::InvalidPacket(
                        "DNS server list expects a multiple of 16 bytes".to_string(),
                    ));
                }
                Self::DnsServers(
                    data.chunks_exact(16)
                        .map(|chunk| {
                            let mut octets = [0u8; 16];
                            octets.copy_from_slice(chunk);
                            Ipv6Addr::from(octets)
                        })
                        .collect(),
                )
            }
            OPT_IA_PD => Self::IaPd(data.to_vec()),
            OPT_IA_TA => Self::IaTa(data.to_vec()),
            other => Self::Unknown {
                code: other,
                data: data.to_vec(),
            },
        })
    }

    /// Appends the full TLV (code, length, payload) to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let payload = self.encode_payload();
        out.extend_from_slice(&self.code().to_be_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&payload);
    }

    fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::ClientId(duid) | Self::ServerId(duid) => duid.clone(),
            Self::IaNa(ia) => {
                let mut payload = Vec::with_capacity(12);
                payload.extend_from_slice(&ia.iaid.to_be_bytes());
                payload.extend_from_slice(&ia.t1.to_be_bytes());
                payload.extend_from_slice(&ia.t2.to_be_bytes());
                for option in &ia.options {
                    option.encode_into(&mut payload);
                }
                payload
            }
            Self::IaAddr(addr) => {
                let mut payload = Vec::with_capacity(24);
                payload.extend_from_slice(&addr.address.octets());
                payload.extend_from_slice(&addr.preferred_lifetime.to_be_bytes());
                payload.extend_from_slice(&addr.valid_lifetime.to_be_bytes());
                for option in &addr.options {
                    option.encode_into(&mut payload);
                }
                payload
            }
            Self::Oro(codes) => {
                let mut payload = Vec::with_capacity(codes.len() * 2);
                for code in codes {
                    payload.extend_from_slice(&code.to_be_bytes());
                }
                payload
            }
            Self::Preference(value) => vec![*value],
            Self::ElapsedTime(value) => value.to_be_bytes().to_vec(),
            Self::RelayMessage(data) => data.clone(),
            Self::StatusCode(status) => {
                let mut payload = Vec::with_capacity(2 + status.message.len());
                payload.extend_from_slice(&u16::from(status.code).to_be_bytes());
                payload.extend_from_slice(status.message.as_bytes());
                payload
            }
            Self::RapidCommit => Vec::new(),
            Self::DnsServers(addrs) => {
                let mut payload = Vec::with_capacity(addrs.len() * 16);
                for addr in addrs {
                    payload.extend_from_slice(&addr.octets());
                }
                payload
            }
            Self::IaPd(data) | Self::IaTa(data) => data.clone(),
            Self::Unknown { data, .. } => data.clone(),
        }
    }

    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Self::StatusCode(Status {
            code,
            message: message.into(),
        })
    }
}

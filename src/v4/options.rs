//! DHCPv4 option semantics (RFC 2132).
//!
//! Every recognised code maps to a kind, and decoding produces a value tagged
//! by that kind. The kind table centralises the arity and length rules so the
//! packet codec stays a dumb TLV walker. Unrecognised codes round-trip through
//! [`OptionValue::Raw`].

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_BROADCAST: u8 = 28;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_OVERLOAD: u8 = 52;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAMETER_LIST: u8 = 55;
pub const OPT_MESSAGE: u8 = 56;
pub const OPT_RENEWAL_TIME: u8 = 58;
pub const OPT_REBINDING_TIME: u8 = 59;
pub const OPT_VENDOR_CLASS: u8 = 60;
pub const OPT_CLIENT_ID: u8 = 61;
pub const OPT_CLASSLESS_ROUTES: u8 = 121;
pub const OPT_END: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// Decoded shape of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Single IPv4 address.
    Ipv4,
    /// Whole multiple of 4-byte addresses.
    Ipv4List,
    /// (address, mask) pairs, whole multiple of 8 bytes.
    Ipv4Pairs,
    U8,
    U16,
    U32,
    I32,
    /// One byte, strictly 0 or 1.
    Flag,
    Text,
    U8List,
    U16List,
    MessageType,
    /// Hardware type byte followed by an opaque identifier.
    ClientId,
    /// RFC 3442 length-compressed classless static routes.
    Routes,
    Raw,
}

/// The per-code kind table. Codes absent here decode as [`OptionKind::Raw`].
pub fn kind_of(code: u8) -> OptionKind {
    match code {
        1 | 28 | 32 | 50 | 54 => OptionKind::Ipv4,
        2 => OptionKind::I32,
        3..=11 | 41 | 42 | 44 | 45 | 48 | 49 | 65 | 68..=76 => OptionKind::Ipv4List,
        12 | 14 | 15 | 17 | 18 | 40 | 43 | 47 | 56 | 62..=64 | 66 | 67 | 100 | 101 => {
            OptionKind::Text
        }
        13 | 22 | 26 | 57 => OptionKind::U16,
        19 | 20 | 27 | 29..=31 | 34 | 36 | 39 => OptionKind::Flag,
        21 | 33 => OptionKind::Ipv4Pairs,
        23 | 37 | 46 | 52 => OptionKind::U8,
        24 | 35 | 38 | 51 | 58 | 59 => OptionKind::U32,
        25 => OptionKind::U16List,
        53 => OptionKind::MessageType,
        55 | 60 => OptionKind::U8List,
        61 => OptionKind::ClientId,
        121 => OptionKind::Routes,
        _ => OptionKind::Raw,
    }
}

/// One RFC 3442 route entry. `destination` keeps only the top `prefix_length`
/// bits; the rest are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticRoute {
    pub destination: Ipv4Addr,
    pub prefix_length: u8,
    pub router: Ipv4Addr,
}

impl StaticRoute {
    fn significant_octets(&self) -> usize {
        (self.prefix_length as usize).div_ceil(8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Ipv4(Ipv4Addr),
    Ipv4List(Vec<Ipv4Addr>),
    Ipv4Pairs(Vec<(Ipv4Addr, Ipv4Addr)>),
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    Flag(bool),
    Text(String),
    U8List(Vec<u8>),
    U16List(Vec<u16>),
    MessageType(MessageType),
    ClientId { htype: u8, id: Vec<u8> },
    Routes(Vec<StaticRoute>),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub value: OptionValue,
}

fn read_ipv4(chunk: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3])
}

impl DhcpOption {
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        if code == OPT_PAD || code == OPT_END {
            return Err(Error::InvalidPacket(
                "Pad/End should not be parsed as options".to_string(),
            ));
        }

        let value = match kind_of(code) {
            OptionKind::Ipv4 => {
                if data.len() != 4 {
                    return Err(Error::InvalidPacket(format!(
                        "Option {} expects 4 bytes, got {}",
                        code,
                        data.len()
                    )));
                }
                OptionValue::Ipv4(read_ipv4(data))
            }
            OptionKind::Ipv4List => {
                if data.len() % 4 != 0 {
                    return Err(Error::InvalidPacket(format!(
                        "Option {} expects a multiple of 4 bytes, got {}",
                        code,
                        data.len()
                    )));
                }
                OptionValue::Ipv4List(data.chunks_exact(4).map(read_ipv4).collect())
            }
            OptionKind::Ipv4Pairs => {
                if data.len() % 8 != 0 {
                    return Err(Error::InvalidPacket(format!(
                        "Option {} expects a multiple of 8 bytes, got {}",
                        code,
                        data.len()
                    )));
                }
                OptionValue::Ipv4Pairs(
                    data.chunks_exact(8)
                        .map(|chunk| (read_ipv4(&chunk[..4]), read_ipv4(&chunk[4..])))
                        .collect(),
                )
            }
            OptionKind::U8 => {
                if data.len() != 1 {
                    return Err(Error::InvalidPacket(format!(
                        "Option {} expects 1 byte, got {}",
                        code,
                        data.len()
                    )));
                }
                OptionValue::U8(data[0])
            }
            OptionKind::U16 => {
                if data.len() != 2 {
                    return Err(Error::InvalidPacket(format!(
                        "Option {} expects 2 bytes, got {}",
                        code,
                        data.len()
                    )));
                }
                OptionValue::U16(u16::from_be_bytes([data[0], data[1]]))
            }
            OptionKind::U32 => {
                if data.len() != 4 {
                    return Err(Error::InvalidPacket(format!(
                        "Option {} expects 4 bytes, got {}",
                        code,
                        data.len()
                    )));
                }
                OptionValue::U32(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
            }
            OptionKind::I32 => {
                if data.len() != 4 {
                    return Err(Error::InvalidPacket(format!(
                        "Option {} expects 4 bytes, got {}",
                        code,
                        data.len()
                    )));
                }
                OptionValue::I32(i32::from_be_bytes([data[0], data[1], data[2], data[3]]))
            }
            OptionKind::Flag => {
                if data.len() != 1 {
                    return Err(Error::InvalidPacket(format!(
                        "Option {} expects 1 byte, got {}",
                        code,
                        data.len()
                    )));
                }
                match data[0] {
                    0 => OptionValue::Flag(false),
                    1 => OptionValue::Flag(true),
                    other => {
                        return Err(Error::InvalidPacket(format!(
                            "Option {} flag must be 0 or 1, got {}",
                            code, other
                        )));
                    }
                }
            }
            OptionKind::Text => OptionValue::Text(String::from_utf8_lossy(data).to_string()),
            OptionKind::U8List => OptionValue::U8List(data.to_vec()),
            OptionKind::U16List => {
                if data.len() % 2 != 0 {
                    return Err(Error::InvalidPacket(format!(
                        "Option {} expects a multiple of 2 bytes, got {}",
                        code,
                        data.len()
                    )));
                }
                OptionValue::U16List(
                    data.chunks_exact(2)
                        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                        .collect(),
                )
            }
            OptionKind::MessageType => {
                if data.len() != 1 {
                    return Err(Error::InvalidPacket(
                        "Invalid message type length".to_string(),
                    ));
                }
                let msg_type = MessageType::try_from(data[0]).map_err(|value| {
                    Error::InvalidPacket(format!("Unknown message type: {}", value))
                })?;
                OptionValue::MessageType(msg_type)
            }
            OptionKind::ClientId => {
                if data.is_empty() {
                    return Err(Error::InvalidPacket(
                        "Client identifier must not be empty".to_string(),
                    ));
                }
                OptionValue::ClientId {
                    htype: data[0],
                    id: data[1..].to_vec(),
                }
            }
            OptionKind::Routes => OptionValue::Routes(Self::parse_routes(data)?),
            OptionKind::Raw => OptionValue::Raw(data.to_vec()),
        };

        Ok(Self { code, value })
    }

    /// RFC 3442: each entry is `prefix_length`, then ceil(prefix_length/8)
    /// significant destination octets, then a 4-byte router.
    fn parse_routes(data: &[u8]) -> Result<Vec<StaticRoute>> {
        let mut routes = Vec::new();
        let mut index = 0;

        while index < data.len() {
            let prefix_length = data[index];
            if prefix_length > 32 {
                return Err(Error::InvalidPacket(format!(
                    "Route prefix length {} exceeds 32",
                    prefix_length
                )));
            }
            let octets = (prefix_length as usize).div_ceil(8);
            let entry_len = 1 + octets + 4;

            if index + entry_len > data.len() {
                return Err(Error::InvalidPacket(
                    "Truncated classless static route entry".to_string(),
                ));
            }

            let mut destination = [0u8; 4];
            destination[..octets].copy_from_slice(&data[index + 1..index + 1 + octets]);
            let router = read_ipv4(&data[index + 1 + octets..index + entry_len]);

            routes.push(StaticRoute {
                destination: Ipv4Addr::from(destination),
                prefix_length,
                router,
            });

            index += entry_len;
        }

        Ok(routes)
    }

    /// Full TLV encoding, code and length bytes included.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut result = vec![self.code, payload.len() as u8];
        result.extend_from_slice(&payload);
        result
    }

    fn encode_payload(&self) -> Vec<u8> {
        match &self.value {
            OptionValue::Ipv4(addr) => addr.octets().to_vec(),
            OptionValue::Ipv4List(addrs) => {
                let mut payload = Vec::with_capacity(addrs.len() * 4);
                for addr in addrs {
                    payload.extend_from_slice(&addr.octets());
                }
                payload
            }
            OptionValue::Ipv4Pairs(pairs) => {
                let mut payload = Vec::with_capacity(pairs.len() * 8);
                for (addr, mask) in pairs {
                    payload.extend_from_slice(&addr.octets());
                    payload.extend_from_slice(&mask.octets());
                }
                payload
            }
            OptionValue::U8(value) => vec![*value],
            OptionValue::U16(value) => value.to_be_bytes().to_vec(),
            OptionValue::U32(value) => value.to_be_bytes().to_vec(),
            OptionValue::I32(value) => value.to_be_bytes().to_vec(),
            OptionValue::Flag(value) => vec![u8::from(*value)],
            OptionValue::Text(text) => text.as_bytes().to_vec(),
            OptionValue::U8List(values) => values.clone(),
            OptionValue::U16List(values) => {
                let mut payload = Vec::with_capacity(values.len() * 2);
                for value in values {
                    payload.extend_from_slice(&value.to_be_bytes());
                }
                payload
            }
            OptionValue::MessageType(msg_type) => vec![*msg_type as u8],
            OptionValue::ClientId { htype, id } => {
                let mut payload = Vec::with_capacity(1 + id.len());
                payload.push(*htype);
                payload.extend_from_slice(id);
                payload
            }
            OptionValue::Routes(routes) => {
                let mut payload = Vec::new();
                for route in routes {
                    payload.push(route.prefix_length);
                    payload.extend_from_slice(&route.destination.octets()[..route.significant_octets()]);
                    payload.extend_from_slice(&route.router.octets());
                }
                payload
            }
            OptionValue::Raw(data) => data.clone(),
        }
    }

    pub fn subnet_mask(addr: Ipv4Addr) -> Self {
        Self {
            code: OPT_SUBNET_MASK,
            value: OptionValue::Ipv4(addr),
        }
    }

    pub fn routers(addrs: Vec<Ipv4Addr>) -> Self {
        Self {
            code: OPT_ROUTER,
            value: OptionValue::Ipv4List(addrs),
        }
    }

    pub fn dns_servers(addrs: Vec<Ipv4Addr>) -> Self {
        Self {
            code: OPT_DNS_SERVER,
            value: OptionValue::Ipv4List(addrs),
        }
    }

    pub fn broadcast(addr: Ipv4Addr) -> Self {
        Self {
            code: OPT_BROADCAST,
            value: OptionValue::Ipv4(addr),
        }
    }

    pub fn lease_time(seconds: u32) -> Self {
        Self {
            code: OPT_LEASE_TIME,
            value: OptionValue::U32(seconds),
        }
    }

    pub fn renewal_time(seconds: u32) -> Self {
        Self {
            code: OPT_RENEWAL_TIME,
            value: OptionValue::U32(seconds),
        }
    }

    pub fn rebinding_time(seconds: u32) -> Self {
        Self {
            code: OPT_REBINDING_TIME,
            value: OptionValue::U32(seconds),
        }
    }

    pub fn message_type(msg_type: MessageType) -> Self {
        Self {
            code: OPT_MESSAGE_TYPE,
            value: OptionValue::MessageType(msg_type),
        }
    }

    pub fn server_identifier(addr: Ipv4Addr) -> Self {
        Self {
            code: OPT_SERVER_ID,
            value: OptionValue::Ipv4(addr),
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self {
            code: OPT_MESSAGE,
            value: OptionValue::Text(text.into()),
        }
    }

    pub fn raw(code: u8, data: Vec<u8>) -> Self {
        Self {
            code,
            value: OptionValue::Raw(data),
        }
    }
}

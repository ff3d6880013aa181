use crate::error::{Error, Result};
use crate::v6::options::{IaNa, V6Option};

pub const TRANSACTION_ID_LEN: usize = 3;

/// RFC 8415 message types. Relay types are recognised so the parser does not
/// choke on them; the server core ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum V6MessageType {
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
    RelayForward = 12,
    RelayReply = 13,
}

impl TryFrom<u8> for V6MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Solicit),
            2 => Ok(Self::Advertise),
            3 => Ok(Self::Request),
            4 => Ok(Self::Confirm),
            5 => Ok(Self::Renew),
            6 => Ok(Self::Rebind),
            7 => Ok(Self::Reply),
            8 => Ok(Self::Release),
            9 => Ok(Self::Decline),
            10 => Ok(Self::Reconfigure),
            11 => Ok(Self::InformationRequest),
            12 => Ok(Self::RelayForward),
            13 => Ok(Self::RelayReply),
            other => Err(Error::InvalidPacket(format!(
                "Unknown DHCPv6 message type: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for V6MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solicit => write!(f, "SOLICIT"),
            Self::Advertise => write!(f, "ADVERTISE"),
            Self::Request => write!(f, "REQUEST"),
            Self::Confirm => write!(f, "CONFIRM"),
            Self::Renew => write!(f, "RENEW"),
            Self::Rebind => write!(f, "REBIND"),
            Self::Reply => write!(f, "REPLY"),
            Self::Release => write!(f, "RELEASE"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Reconfigure => write!(f, "RECONFIGURE"),
            Self::InformationRequest => write!(f, "INFORMATION-REQUEST"),
            Self::RelayForward => write!(f, "RELAY-FORW"),
            Self::RelayReply => write!(f, "RELAY-REPL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V6Message {
    pub msg_type: V6MessageType,
    pub transaction_id: [u8; TRANSACTION_ID_LEN],
    pub options: Vec<V6Option>,
}

impl V6Message {
    pub fn new(msg_type: V6MessageType, transaction_id: [u8; TRANSACTION_ID_LEN]) -> Self {
        Self {
            msg_type,
            transaction_id,
            options: Vec::new(),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 1 + TRANSACTION_ID_LEN {
            return Err(Error::InvalidPacket(format!(
                "DHCPv6 message too short: {} bytes",
                data.len()
            )));
        }

        let msg_type = V6MessageType::try_from(data[0])?;
        let mut transaction_id = [0u8; TRANSACTION_ID_LEN];
        transaction_id.copy_from_slice(&data[1..4]);
        let options = V6Option::parse_stream(&data[4..])?;

        Ok(Self {
            msg_type,
            transaction_id,
            options,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(128);
        packet.push(self.msg_type as u8);
        packet.extend_from_slice(&self.transaction_id);
        for option in &self.options {
            option.encode_into(&mut packet);
        }
        packet
    }

    pub fn client_id(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|option| match option {
            V6Option::ClientId(duid) => Some(duid.as_slice()),
            _ => None,
        })
    }

    pub fn server_id(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|option| match option {
            V6Option::ServerId(duid) => Some(duid.as_slice()),
            _ => None,
        })
    }

    pub fn has_rapid_commit(&self) -> bool {
        self.options
            .iter()
            .any(|option| matches!(option, V6Option::RapidCommit))
    }

    pub fn ia_nas(&self) -> Vec<&IaNa> {
        self.options
            .iter()
            .filter_map(|option| match option {
                V6Option::IaNa(ia) => Some(ia),
                _ => None,
            })
            .collect()
    }
}

//! NetBIOS session service packet types

use crate::error::Error;
use std::convert::TryFrom;

/// Packet types of the NetBIOS session service (RFC 1002 §4.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NetBiosMessageType {
    SessionMessage = 0x00,
    SessionRequest = 0x81,
    PositiveResponse = 0x82,
    NegativeResponse = 0x83,
    RetargetResponse = 0x84,
    Keepalive = 0x85,
}

impl TryFrom<u8> for NetBiosMessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(NetBiosMessageType::SessionMessage),
            0x81 => Ok(NetBiosMessageType::SessionRequest),
            0x82 => Ok(NetBiosMessageType::PositiveResponse),
            0x83 => Ok(NetBiosMessageType::NegativeResponse),
            0x84 => Ok(NetBiosMessageType::RetargetResponse),
            0x85 => Ok(NetBiosMessageType::Keepalive),
            _ => Err(Error::InvalidHeader(format!(
                "Invalid NetBIOS message type: 0x{:02x}",
                value
            ))),
        }
    }
}

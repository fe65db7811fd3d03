//! NetBIOS over TCP/IP (RFC 1001/1002)
//!
//! The session service frames every SMB2 message with a 4-byte header whose
//! length field is 17 bits wide. The name service ([`ns`]) resolves names and
//! node services over UDP.

use crate::error::{Error, Result};
use crate::protocol::NetBiosMessageType;
use bytes::BufMut;
use std::convert::TryFrom;
use std::fmt;

pub mod name;
pub mod ns;

pub use name::{NetBiosName, ServiceType};
pub use ns::{Endpoint, NetBiosResolver, ResolverConfig};

/// NetBIOS Session Service header (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetBiosHeader {
    pub message_type: NetBiosMessageType,
    /// Length of the payload (17 bits max)
    pub length: u32,
}

impl NetBiosHeader {
    /// Maximum payload length (17 bits)
    pub const MAX_LENGTH: u32 = 0x1FFFF;

    /// Header size in bytes
    pub const SIZE: usize = 4;

    pub fn new(message_type: NetBiosMessageType, length: u32) -> Result<Self> {
        if length > Self::MAX_LENGTH {
            return Err(Error::InvalidParameter(format!(
                "NetBIOS length {} exceeds maximum {}",
                length,
                Self::MAX_LENGTH
            )));
        }
        Ok(Self {
            message_type,
            length,
        })
    }

    pub fn session_message(length: u32) -> Result<Self> {
        Self::new(NetBiosMessageType::SessionMessage, length)
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                need: Self::SIZE,
                have: buf.len(),
            });
        }

        let message_type = NetBiosMessageType::try_from(buf[0])?;
        let length = (((buf[1] & 0x01) as u32) << 16) | ((buf[2] as u32) << 8) | (buf[3] as u32);

        Ok(Self {
            message_type,
            length,
        })
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [
            self.message_type as u8,
            ((self.length >> 16) & 0x01) as u8,
            ((self.length >> 8) & 0xFF) as u8,
            (self.length & 0xFF) as u8,
        ]
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if buf.remaining_mut() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                need: Self::SIZE,
                have: buf.remaining_mut(),
            });
        }
        buf.put_slice(&self.to_bytes());
        Ok(())
    }
}

/// Reason carried by a negative session response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRefusal {
    NotListeningOnCalledName,
    NotListeningForCallingName,
    CalledNameNotPresent,
    InsufficientResources,
    Unspecified(u8),
}

impl From<u8> for SessionRefusal {
    fn from(code: u8) -> Self {
        match code {
            0x80 => SessionRefusal::NotListeningOnCalledName,
            0x81 => SessionRefusal::NotListeningForCallingName,
            0x82 => SessionRefusal::CalledNameNotPresent,
            0x83 => SessionRefusal::InsufficientResources,
            other => SessionRefusal::Unspecified(other),
        }
    }
}

impl From<SessionRefusal> for u8 {
    fn from(reason: SessionRefusal) -> Self {
        match reason {
            SessionRefusal::NotListeningOnCalledName => 0x80,
            SessionRefusal::NotListeningForCallingName => 0x81,
            SessionRefusal::CalledNameNotPresent => 0x82,
            SessionRefusal::InsufficientResources => 0x83,
            SessionRefusal::Unspecified(code) => code,
        }
    }
}

impl fmt::Display for SessionRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRefusal::NotListeningOnCalledName => f.write_str("not listening on called name"),
            SessionRefusal::NotListeningForCallingName => {
                f.write_str("not listening for calling name")
            }
            SessionRefusal::CalledNameNotPresent => f.write_str("called name not present"),
            SessionRefusal::InsufficientResources => f.write_str("insufficient resources"),
            SessionRefusal::Unspecified(code) => write!(f, "unspecified error 0x{:02X}", code),
        }
    }
}

/// A complete session service packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetBiosMessage {
    pub header: NetBiosHeader,
    pub payload: Vec<u8>,
}

impl NetBiosMessage {
    fn with_payload(message_type: NetBiosMessageType, payload: Vec<u8>) -> Result<Self> {
        let header = NetBiosHeader::new(message_type, payload.len() as u32)?;
        Ok(Self { header, payload })
    }

    pub fn session_message(payload: Vec<u8>) -> Result<Self> {
        Self::with_payload(NetBiosMessageType::SessionMessage, payload)
    }

    /// Session request naming the server (called) and this host (calling)
    pub fn session_request(called: &NetBiosName, calling: &NetBiosName) -> Result<Self> {
        let mut payload = called.to_wire("");
        payload.extend_from_slice(&calling.to_wire(""));
        Self::with_payload(NetBiosMessageType::SessionRequest, payload)
    }

    pub fn positive_response() -> Result<Self> {
        Self::with_payload(NetBiosMessageType::PositiveResponse, Vec::new())
    }

    pub fn negative_response(reason: SessionRefusal) -> Result<Self> {
        Self::with_payload(NetBiosMessageType::NegativeResponse, vec![reason.into()])
    }

    pub fn keepalive() -> Result<Self> {
        Self::with_payload(NetBiosMessageType::Keepalive, Vec::new())
    }

    /// Reason of a negative session response, if this is one
    pub fn refusal(&self) -> Option<SessionRefusal> {
        if self.header.message_type != NetBiosMessageType::NegativeResponse {
            return None;
        }
        Some(
            self.payload
                .first()
                .copied()
                .map(SessionRefusal::from)
                .unwrap_or(SessionRefusal::Unspecified(0)),
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NetBiosHeader::SIZE + self.payload.len());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = NetBiosHeader::parse(buf)?;

        let total_len = NetBiosHeader::SIZE + header.length as usize;
        if buf.len() < total_len {
            return Err(Error::BufferTooSmall {
                need: total_len,
                have: buf.len(),
            });
        }

        let payload = buf[NetBiosHeader::SIZE..total_len].to_vec();
        Ok(Self { header, payload })
    }
}

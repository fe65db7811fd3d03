//! NetBIOS names and service suffixes
//!
//! A NetBIOS name is 15 characters padded with spaces plus a one-byte
//! service suffix. On the wire it is "first-level" encoded (RFC 1001 §14.1):
//! every byte is split into two nibbles, each added to `'A'`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Maximum NetBIOS name length (before padding)
pub const NETBIOS_NAME_MAX_LEN: usize = 15;

/// NetBIOS name length after padding, suffix included
pub const NETBIOS_NAME_LEN: usize = 16;

/// NetBIOS encoded name length (after encoding, each byte becomes 2 bytes)
pub const NETBIOS_ENCODED_NAME_LEN: usize = 32;

/// Name used as the called name when the server's own name is unknown
pub const SMBSERVER_NAME: &str = "*SMBSERVER";

/// Service advertised under a NetBIOS name, identified by the name's suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    Workstation,
    Messenger,
    FileServer,
    DomainMaster,
}

impl ServiceType {
    /// Classify a suffix byte. Unknown suffixes yield `None`.
    pub fn from_wire(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(ServiceType::Workstation),
            0x03 => Some(ServiceType::Messenger),
            0x20 => Some(ServiceType::FileServer),
            0x1B => Some(ServiceType::DomainMaster),
            _ => None,
        }
    }

    /// The suffix byte registered for this service
    pub fn wire_code(self) -> u8 {
        match self {
            ServiceType::Workstation => 0x00,
            ServiceType::Messenger => 0x03,
            ServiceType::FileServer => 0x20,
            ServiceType::DomainMaster => 0x1B,
        }
    }

    /// Ranking used when a node advertises several services; higher wins
    pub(crate) fn preference(self) -> u8 {
        match self {
            ServiceType::FileServer => 3,
            ServiceType::DomainMaster => 2,
            ServiceType::Workstation => 1,
            ServiceType::Messenger => 0,
        }
    }
}

impl TryFrom<u8> for ServiceType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        ServiceType::from_wire(value).ok_or(value)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceType::Workstation => "workstation",
            ServiceType::Messenger => "messenger",
            ServiceType::FileServer => "file server",
            ServiceType::DomainMaster => "domain master browser",
        };
        f.write_str(s)
    }
}

/// A NetBIOS name with its service suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetBiosName {
    name: String,
    suffix: u8,
}

impl NetBiosName {
    /// Build a name, upper-casing it. Names are limited to 15 ASCII bytes.
    pub fn new(name: &str, suffix: u8) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidNetBiosName("empty name".into()));
        }
        if !name.is_ascii() {
            return Err(Error::InvalidNetBiosName(format!(
                "Name '{}' contains non-ASCII characters",
                name
            )));
        }
        if name.len() > NETBIOS_NAME_MAX_LEN {
            return Err(Error::InvalidNetBiosName(format!(
                "Name '{}' exceeds maximum length {}",
                name, NETBIOS_NAME_MAX_LEN
            )));
        }
        Ok(Self {
            name: name.to_ascii_uppercase(),
            suffix,
        })
    }

    /// The `*` name used by node status queries
    pub fn wildcard() -> Self {
        Self {
            name: "*".to_string(),
            suffix: 0x00,
        }
    }

    /// Name as carried raw (unencoded) in a node status answer
    pub fn from_raw(raw: &[u8; NETBIOS_NAME_LEN]) -> Self {
        let name = String::from_utf8_lossy(&raw[..NETBIOS_NAME_MAX_LEN])
            .trim_end_matches([' ', '\0'])
            .to_string();
        Self {
            name,
            suffix: raw[NETBIOS_NAME_MAX_LEN],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn suffix(&self) -> u8 {
        self.suffix
    }

    pub fn service_type(&self) -> Option<ServiceType> {
        ServiceType::from_wire(self.suffix)
    }

    /// Padded 16-byte form; the wildcard pads with NULs instead of spaces
    pub fn to_raw(&self) -> [u8; NETBIOS_NAME_LEN] {
        let pad = if self.name == "*" { 0x00 } else { b' ' };
        let mut raw = [pad; NETBIOS_NAME_LEN];
        raw[..self.name.len()].copy_from_slice(self.name.as_bytes());
        raw[NETBIOS_NAME_MAX_LEN] = self.suffix;
        raw
    }

    /// First-level encoding of the padded name
    pub fn encode(&self) -> [u8; NETBIOS_ENCODED_NAME_LEN] {
        let mut encoded = [0u8; NETBIOS_ENCODED_NAME_LEN];
        for (i, byte) in self.to_raw().iter().enumerate() {
            encoded[i * 2] = b'A' + (byte >> 4);
            encoded[i * 2 + 1] = b'A' + (byte & 0x0F);
        }
        encoded
    }

    /// Reverse of [`NetBiosName::encode`]
    pub fn decode(encoded: &[u8]) -> Result<Self> {
        if encoded.len() != NETBIOS_ENCODED_NAME_LEN {
            return Err(Error::InvalidNetBiosName(format!(
                "Encoded name length {} != {}",
                encoded.len(),
                NETBIOS_ENCODED_NAME_LEN
            )));
        }

        let mut raw = [0u8; NETBIOS_NAME_LEN];
        for (i, pair) in encoded.chunks_exact(2).enumerate() {
            let (high, low) = (pair[0], pair[1]);
            if !(b'A'..=b'P').contains(&high) || !(b'A'..=b'P').contains(&low) {
                return Err(Error::InvalidNetBiosName(format!(
                    "Invalid encoded characters at position {}",
                    i
                )));
            }
            raw[i] = ((high - b'A') << 4) | (low - b'A');
        }
        Ok(Self::from_raw(&raw))
    }

    /// Length-prefixed encoded name followed by the scope labels, as used by
    /// both the session service and the name service
    pub fn to_wire(&self, scope: &str) -> Vec<u8> {
        let encoded_scope = encode_netbios_scope(scope);
        let mut out = Vec::with_capacity(1 + NETBIOS_ENCODED_NAME_LEN + encoded_scope.len());
        out.push(NETBIOS_ENCODED_NAME_LEN as u8);
        out.extend_from_slice(&self.encode());
        out.extend_from_slice(&encoded_scope);
        out
    }
}

impl fmt::Display for NetBiosName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{:02X}>", self.name, self.suffix)
    }
}

/// Encode a NetBIOS scope identifier as DNS-style labels
pub fn encode_netbios_scope(scope: &str) -> Vec<u8> {
    let mut encoded = Vec::new();
    for part in scope.split('.').filter(|p| !p.is_empty() && p.len() <= 63) {
        encoded.push(part.len() as u8);
        encoded.extend_from_slice(part.as_bytes());
    }
    encoded.push(0);
    encoded
}

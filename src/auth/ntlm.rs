//! NTLM authentication implementation
//!
//! Message codecs for the three NTLMSSP legs and a client context that
//! produces NTLMv2 responses.

use super::ntlm_crypto::{
    generate_challenge, lmv2_response, ntlmv2_hash, ntlmv2_response, windows_timestamp, NtlmV2Blob,
};
use super::{AuthMechanism, Credentials};
use crate::error::{Error, Result};
use crate::protocol::messages::common::{utf16le_bytes, utf16le_string};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io::{self, Read};
use tracing::debug;

/// NTLM signature - "NTLMSSP\0"
pub const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_FIXED: usize = 32;
const CHALLENGE_FIXED: usize = 48;
const AUTHENTICATE_FIXED: usize = 64;

/// NTLM message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NtlmMessageType {
    /// Type 1: Negotiate message (client -> server)
    Negotiate = 0x00000001,
    /// Type 2: Challenge message (server -> client)
    Challenge = 0x00000002,
    /// Type 3: Authenticate message (client -> server)
    Authenticate = 0x00000003,
}

impl TryFrom<u32> for NtlmMessageType {
    type Error = Error;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00000001 => Ok(Self::Negotiate),
            0x00000002 => Ok(Self::Challenge),
            0x00000003 => Ok(Self::Authenticate),
            _ => Err(Error::ParseError(format!(
                "Invalid NTLM message type: {}",
                value
            ))),
        }
    }
}

bitflags! {
    /// NTLM negotiation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NtlmFlags: u32 {
        const NEGOTIATE_UNICODE = 0x00000001;
        const NEGOTIATE_OEM = 0x00000002;
        const REQUEST_TARGET = 0x00000004;
        const NEGOTIATE_SIGN = 0x00000010;
        const NEGOTIATE_SEAL = 0x00000020;
        const NEGOTIATE_NTLM = 0x00000200;
        const NEGOTIATE_ANONYMOUS = 0x00000800;
        const NEGOTIATE_DOMAIN_SUPPLIED = 0x00001000;
        const NEGOTIATE_WORKSTATION_SUPPLIED = 0x00002000;
        const NEGOTIATE_ALWAYS_SIGN = 0x00008000;
        const TARGET_TYPE_DOMAIN = 0x00010000;
        const TARGET_TYPE_SERVER = 0x00020000;
        /// Extended session security
        const NEGOTIATE_EXTENDED_SECURITY = 0x00080000;
        const NEGOTIATE_TARGET_INFO = 0x00800000;
        const NEGOTIATE_VERSION = 0x02000000;
        const NEGOTIATE_128 = 0x20000000;
        const NEGOTIATE_KEY_EXCHANGE = 0x40000000;
        const NEGOTIATE_56 = 0x80000000;
    }
}

/// Length/offset descriptor for a variable field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityBuffer {
    pub length: u16,
    pub max_length: u16,
    /// Offset from the beginning of the NTLM message
    pub offset: u32,
}

impl SecurityBuffer {
    pub fn with_data(data_len: usize, offset: usize) -> Self {
        Self {
            length: data_len as u16,
            max_length: data_len as u16,
            offset: offset as u32,
        }
    }

    pub fn parse(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            length: cursor.read_u16::<LittleEndian>()?,
            max_length: cursor.read_u16::<LittleEndian>()?,
            offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u16::<LittleEndian>(self.length)?;
        buf.write_u16::<LittleEndian>(self.max_length)?;
        buf.write_u32::<LittleEndian>(self.offset)?;
        Ok(())
    }

    pub fn extract_data<'a>(&self, message: &'a [u8]) -> Result<&'a [u8]> {
        if self.length == 0 {
            return Ok(&[]);
        }
        let start = self.offset as usize;
        let end = start + self.length as usize;
        message
            .get(start..end)
            .ok_or_else(|| Error::ParseError("Security buffer extends beyond message".into()))
    }
}

/// Lays out variable fields after a fixed header and records their descriptors
struct PayloadWriter {
    offset: usize,
    payload: Vec<u8>,
}

impl PayloadWriter {
    fn new(fixed_len: usize) -> Self {
        Self {
            offset: fixed_len,
            payload: Vec::new(),
        }
    }

    fn push(&mut self, data: &[u8]) -> SecurityBuffer {
        if data.is_empty() {
            return SecurityBuffer::with_data(0, self.offset);
        }
        let buffer = SecurityBuffer::with_data(data.len(), self.offset);
        self.offset += data.len();
        self.payload.extend_from_slice(data);
        buffer
    }
}

fn read_header(cursor: &mut io::Cursor<&[u8]>, expected: NtlmMessageType) -> Result<()> {
    let mut signature = [0u8; 8];
    cursor
        .read_exact(&mut signature)
        .map_err(|_| Error::ParseError("NTLM message too short".into()))?;
    if &signature != NTLMSSP_SIGNATURE {
        return Err(Error::ParseError("Invalid NTLM signature".into()));
    }
    let message_type = NtlmMessageType::try_from(cursor.read_u32::<LittleEndian>()?)?;
    if message_type != expected {
        return Err(Error::ParseError(format!(
            "Expected NTLM {:?} message, got {:?}",
            expected, message_type
        )));
    }
    Ok(())
}

fn decode_text(bytes: &[u8], flags: NtlmFlags) -> String {
    if flags.contains(NtlmFlags::NEGOTIATE_UNICODE) {
        utf16le_string(bytes)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn encode_text(text: &str, flags: NtlmFlags) -> Vec<u8> {
    if flags.contains(NtlmFlags::NEGOTIATE_UNICODE) {
        utf16le_bytes(text)
    } else {
        text.as_bytes().to_vec()
    }
}

/// NTLM Type 1 Message - Negotiate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmNegotiateMessage {
    pub flags: NtlmFlags,
    /// OEM encoded, as Type 1 fields always are
    pub domain_name: String,
    pub workstation_name: String,
}

impl NtlmNegotiateMessage {
    pub fn new(domain: impl Into<String>, workstation: impl Into<String>) -> Self {
        let domain_name = domain.into();
        let workstation_name = workstation.into();
        let mut flags = NtlmFlags::NEGOTIATE_UNICODE
            | NtlmFlags::NEGOTIATE_OEM
            | NtlmFlags::REQUEST_TARGET
            | NtlmFlags::NEGOTIATE_NTLM
            | NtlmFlags::NEGOTIATE_ALWAYS_SIGN
            | NtlmFlags::NEGOTIATE_EXTENDED_SECURITY
            | NtlmFlags::NEGOTIATE_128
            | NtlmFlags::NEGOTIATE_56;
        if !domain_name.is_empty() {
            flags |= NtlmFlags::NEGOTIATE_DOMAIN_SUPPLIED;
        }
        if !workstation_name.is_empty() {
            flags |= NtlmFlags::NEGOTIATE_WORKSTATION_SUPPLIED;
        }
        Self {
            flags,
            domain_name,
            workstation_name,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < NEGOTIATE_FIXED {
            return Err(Error::ParseError("NTLM negotiate message too short".into()));
        }

        let mut cursor = io::Cursor::new(data);
        read_header(&mut cursor, NtlmMessageType::Negotiate)?;

        let flags = NtlmFlags::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let domain = SecurityBuffer::parse(&mut cursor)?;
        let workstation = SecurityBuffer::parse(&mut cursor)?;

        Ok(Self {
            flags,
            domain_name: String::from_utf8_lossy(domain.extract_data(data)?).into_owned(),
            workstation_name: String::from_utf8_lossy(workstation.extract_data(data)?)
                .into_owned(),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload = PayloadWriter::new(NEGOTIATE_FIXED);
        let domain = payload.push(self.domain_name.as_bytes());
        let workstation = payload.push(self.workstation_name.as_bytes());

        let mut buf = Vec::with_capacity(NEGOTIATE_FIXED + payload.payload.len());
        buf.extend_from_slice(NTLMSSP_SIGNATURE);
        buf.write_u32::<LittleEndian>(NtlmMessageType::Negotiate as u32)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        domain.serialize(&mut buf)?;
        workstation.serialize(&mut buf)?;
        buf.extend_from_slice(&payload.payload);
        Ok(buf)
    }
}

/// AV_PAIR identifiers used in target info
mod av_id {
    pub const EOL: u16 = 0x0000;
    pub const NB_COMPUTER_NAME: u16 = 0x0001;
    pub const NB_DOMAIN_NAME: u16 = 0x0002;
    pub const TIMESTAMP: u16 = 0x0007;
}

/// Build the target info AV_PAIR list a server advertises
pub fn build_target_info(domain: &str, computer: &str) -> Result<Vec<u8>> {
    let mut info = Vec::new();
    for (id, value) in [
        (av_id::NB_DOMAIN_NAME, utf16le_bytes(domain)),
        (av_id::NB_COMPUTER_NAME, utf16le_bytes(computer)),
    ] {
        info.write_u16::<LittleEndian>(id)?;
        info.write_u16::<LittleEndian>(value.len() as u16)?;
        info.extend_from_slice(&value);
    }
    info.write_u16::<LittleEndian>(av_id::TIMESTAMP)?;
    info.write_u16::<LittleEndian>(8)?;
    info.write_u64::<LittleEndian>(windows_timestamp())?;
    info.write_u16::<LittleEndian>(av_id::EOL)?;
    info.write_u16::<LittleEndian>(0)?;
    Ok(info)
}

/// NTLM Type 2 Message - Challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmChallengeMessage {
    pub flags: NtlmFlags,
    pub challenge: [u8; 8],
    pub target_name: String,
    pub target_info: Vec<u8>,
}

impl NtlmChallengeMessage {
    pub fn new(target_name: impl Into<String>, challenge: [u8; 8]) -> Self {
        Self {
            flags: NtlmFlags::NEGOTIATE_UNICODE
                | NtlmFlags::REQUEST_TARGET
                | NtlmFlags::NEGOTIATE_NTLM
                | NtlmFlags::TARGET_TYPE_SERVER
                | NtlmFlags::NEGOTIATE_EXTENDED_SECURITY
                | NtlmFlags::NEGOTIATE_TARGET_INFO
                | NtlmFlags::NEGOTIATE_128
                | NtlmFlags::NEGOTIATE_56,
            challenge,
            target_name: target_name.into(),
            target_info: Vec::new(),
        }
    }

    pub fn with_target_info(mut self, target_info: Vec<u8>) -> Self {
        self.target_info = target_info;
        self
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < CHALLENGE_FIXED {
            return Err(Error::ParseError("NTLM challenge message too short".into()));
        }

        let mut cursor = io::Cursor::new(data);
        read_header(&mut cursor, NtlmMessageType::Challenge)?;

        let target_name = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let mut challenge = [0u8; 8];
        cursor.read_exact(&mut challenge)?;
        let _context = cursor.read_u64::<LittleEndian>()?;
        let target_info = SecurityBuffer::parse(&mut cursor)?;

        Ok(Self {
            flags,
            challenge,
            target_name: decode_text(target_name.extract_data(data)?, flags),
            target_info: target_info.extract_data(data)?.to_vec(),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload = PayloadWriter::new(CHALLENGE_FIXED);
        let target_name = payload.push(&encode_text(&self.target_name, self.flags));
        let target_info = payload.push(&self.target_info);

        let mut buf = Vec::with_capacity(CHALLENGE_FIXED + payload.payload.len());
        buf.extend_from_slice(NTLMSSP_SIGNATURE);
        buf.write_u32::<LittleEndian>(NtlmMessageType::Challenge as u32)?;
        target_name.serialize(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.extend_from_slice(&self.challenge);
        buf.write_u64::<LittleEndian>(0)?;
        target_info.serialize(&mut buf)?;
        buf.extend_from_slice(&payload.payload);
        Ok(buf)
    }
}

/// NTLM Type 3 Message - Authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmAuthenticateMessage {
    pub flags: NtlmFlags,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain_name: String,
    pub user_name: String,
    pub workstation: String,
    pub session_key: Vec<u8>,
}

impl NtlmAuthenticateMessage {
    /// Anonymous when no user and no NT response were supplied
    pub fn is_anonymous(&self) -> bool {
        self.user_name.is_empty() && self.nt_response.is_empty()
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < AUTHENTICATE_FIXED {
            return Err(Error::ParseError(
                "NTLM authenticate message too short".into(),
            ));
        }

        let mut cursor = io::Cursor::new(data);
        read_header(&mut cursor, NtlmMessageType::Authenticate)?;

        let lm_response = SecurityBuffer::parse(&mut cursor)?;
        let nt_response = SecurityBuffer::parse(&mut cursor)?;
        let domain = SecurityBuffer::parse(&mut cursor)?;
        let user = SecurityBuffer::parse(&mut cursor)?;
        let workstation = SecurityBuffer::parse(&mut cursor)?;
        let session_key = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);

        Ok(Self {
            flags,
            lm_response: lm_response.extract_data(data)?.to_vec(),
            nt_response: nt_response.extract_data(data)?.to_vec(),
            domain_name: decode_text(domain.extract_data(data)?, flags),
            user_name: decode_text(user.extract_data(data)?, flags),
            workstation: decode_text(workstation.extract_data(data)?, flags),
            session_key: session_key.extract_data(data)?.to_vec(),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload = PayloadWriter::new(AUTHENTICATE_FIXED);
        let lm_response = payload.push(&self.lm_response);
        let nt_response = payload.push(&self.nt_response);
        let domain = payload.push(&encode_text(&self.domain_name, self.flags));
        let user = payload.push(&encode_text(&self.user_name, self.flags));
        let workstation = payload.push(&encode_text(&self.workstation, self.flags));
        let session_key = payload.push(&self.session_key);

        let mut buf = Vec::with_capacity(AUTHENTICATE_FIXED + payload.payload.len());
        buf.extend_from_slice(NTLMSSP_SIGNATURE);
        buf.write_u32::<LittleEndian>(NtlmMessageType::Authenticate as u32)?;
        for field in [lm_response, nt_response, domain, user, workstation, session_key] {
            field.serialize(&mut buf)?;
        }
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.extend_from_slice(&payload.payload);
        Ok(buf)
    }
}

/// Client-side handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtlmState {
    Initial,
    NegotiateSent,
    AuthenticateSent,
}

/// Client context for one NTLM exchange
#[derive(Debug, Clone)]
pub struct NtlmClient {
    credentials: Credentials,
    workstation: String,
    state: NtlmState,
}

impl NtlmClient {
    pub fn new(credentials: Credentials, workstation: impl Into<String>) -> Self {
        Self {
            credentials,
            workstation: workstation.into(),
            state: NtlmState::Initial,
        }
    }

    pub fn state(&self) -> NtlmState {
        self.state
    }

    /// Type 1 message
    pub fn create_negotiate_message(&mut self) -> Result<Vec<u8>> {
        let msg = NtlmNegotiateMessage::new(self.credentials.domain.clone(), self.workstation.clone());
        self.state = NtlmState::NegotiateSent;
        msg.serialize()
    }

    /// Type 3 message answering the server's Type 2
    pub fn create_authenticate_message(&mut self, challenge_data: &[u8]) -> Result<Vec<u8>> {
        if self.state != NtlmState::NegotiateSent {
            return Err(Error::AuthenticationError(
                "Challenge received before negotiate was sent".into(),
            ));
        }

        let challenge = NtlmChallengeMessage::parse(challenge_data)?;
        let Credentials {
            username,
            password,
            domain,
        } = &self.credentials;

        let key = ntlmv2_hash(username, domain, password)?;
        let client_challenge = generate_challenge();
        let blob = NtlmV2Blob::new(
            windows_timestamp(),
            client_challenge,
            challenge.target_info.clone(),
        );

        let auth = NtlmAuthenticateMessage {
            flags: challenge.flags & !NtlmFlags::NEGOTIATE_TARGET_INFO,
            lm_response: lmv2_response(&key, &challenge.challenge, &client_challenge)?,
            nt_response: ntlmv2_response(&key, &challenge.challenge, &blob)?,
            domain_name: domain.clone(),
            user_name: username.clone(),
            workstation: self.workstation.clone(),
            session_key: Vec::new(),
        };

        debug!("NTLM authenticate for {}\\{}", domain, username);
        self.state = NtlmState::AuthenticateSent;
        auth.serialize()
    }
}

impl AuthMechanism for NtlmClient {
    fn initial_token(&mut self) -> Result<Vec<u8>> {
        self.create_negotiate_message()
    }

    fn challenge_response(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        self.create_authenticate_message(challenge)
    }
}

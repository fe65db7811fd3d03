//! SMB2 SESSION_SETUP and LOGOFF

use super::common::{check_structure_size, variable_buffer, SmbMessage};
use crate::error::Result;
use crate::protocol::smb2_constants::{structure_size, SecurityMode, SMB2_HEADER_SIZE};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;

bitflags! {
    /// Flags the server sets on an established session
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFlags: u16 {
        const IS_GUEST = 0x0001;
        const IS_NULL = 0x0002;
        const ENCRYPT_DATA = 0x0004;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SessionSetupRequest {
    pub flags: u8,
    pub security_mode: SecurityMode,
    pub previous_session_id: u64,
    pub security_blob: Vec<u8>,
}

const SESSION_SETUP_REQUEST_FIXED: usize = 24;

impl Smb2SessionSetupRequest {
    pub fn new(security_blob: Vec<u8>) -> Self {
        Self {
            flags: 0,
            security_mode: SecurityMode::SIGNING_ENABLED,
            previous_session_id: 0,
            security_blob,
        }
    }
}

impl SmbMessage for Smb2SessionSetupRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(
            &mut cursor,
            structure_size::SESSION_SETUP_REQUEST,
            "session setup request",
        )?;

        let flags = cursor.read_u8()?;
        let security_mode = SecurityMode::from_bits_truncate(cursor.read_u8()? as u16);
        let _capabilities = cursor.read_u32::<LittleEndian>()?;
        let _channel = cursor.read_u32::<LittleEndian>()?;
        let blob_offset = cursor.read_u16::<LittleEndian>()?;
        let blob_length = cursor.read_u16::<LittleEndian>()?;
        let previous_session_id = cursor.read_u64::<LittleEndian>()?;

        Ok(Self {
            flags,
            security_mode,
            previous_session_id,
            security_blob: variable_buffer(buf, blob_offset as u32, blob_length as u32)?.to_vec(),
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::SESSION_SETUP_REQUEST)?;
        buf.write_u8(self.flags)?;
        buf.write_u8(self.security_mode.bits() as u8)?;
        buf.write_u32::<LittleEndian>(0)?; // capabilities
        buf.write_u32::<LittleEndian>(0)?; // channel
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + SESSION_SETUP_REQUEST_FIXED) as u16)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u64::<LittleEndian>(self.previous_session_id)?;
        buf.extend_from_slice(&self.security_blob);
        Ok(buf)
    }

    fn size(&self) -> usize {
        SESSION_SETUP_REQUEST_FIXED + self.security_blob.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SessionSetupResponse {
    pub session_flags: SessionFlags,
    pub security_blob: Vec<u8>,
}

const SESSION_SETUP_RESPONSE_FIXED: usize = 8;

impl Smb2SessionSetupResponse {
    pub fn new(session_flags: SessionFlags, security_blob: Vec<u8>) -> Self {
        Self {
            session_flags,
            security_blob,
        }
    }
}

impl SmbMessage for Smb2SessionSetupResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(
            &mut cursor,
            structure_size::SESSION_SETUP_RESPONSE,
            "session setup response",
        )?;

        let session_flags = SessionFlags::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let blob_offset = cursor.read_u16::<LittleEndian>()?;
        let blob_length = cursor.read_u16::<LittleEndian>()?;

        Ok(Self {
            session_flags,
            security_blob: variable_buffer(buf, blob_offset as u32, blob_length as u32)?.to_vec(),
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::SESSION_SETUP_RESPONSE)?;
        buf.write_u16::<LittleEndian>(self.session_flags.bits())?;
        let blob_offset = if self.security_blob.is_empty() {
            0
        } else {
            (SMB2_HEADER_SIZE + SESSION_SETUP_RESPONSE_FIXED) as u16
        };
        buf.write_u16::<LittleEndian>(blob_offset)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        if self.security_blob.is_empty() {
            buf.write_u8(0)?;
        } else {
            buf.extend_from_slice(&self.security_blob);
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        SESSION_SETUP_RESPONSE_FIXED + self.security_blob.len().max(1)
    }
}

/// LOGOFF request and response share the same 4-byte body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Smb2Logoff;

impl SmbMessage for Smb2Logoff {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::LOGOFF, "logoff")?;
        Ok(Self)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(4);
        buf.write_u16::<LittleEndian>(structure_size::LOGOFF)?;
        buf.write_u16::<LittleEndian>(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        4
    }
}

//! SMB2 NEGOTIATE

use super::common::{check_structure_size, variable_buffer, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{
    structure_size, SecurityMode, Smb2Capabilities, Smb2Dialect, SMB2_HEADER_SIZE,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io::{self, Read, Write};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2NegotiateRequest {
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub client_guid: Uuid,
    pub dialects: Vec<Smb2Dialect>,
}

impl Smb2NegotiateRequest {
    pub fn new(dialects: Vec<Smb2Dialect>, client_guid: Uuid) -> Self {
        Self {
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::empty(),
            client_guid,
            dialects,
        }
    }
}

impl SmbMessage for Smb2NegotiateRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::NEGOTIATE_REQUEST, "negotiate request")?;

        let dialect_count = cursor.read_u16::<LittleEndian>()?;
        let security_mode = SecurityMode::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let capabilities = Smb2Capabilities::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);

        let mut guid_bytes = [0u8; 16];
        cursor.read_exact(&mut guid_bytes)?;
        let _client_start_time = cursor.read_u64::<LittleEndian>()?;

        // Dialects this codec does not model are skipped, not rejected
        let mut dialects = Vec::with_capacity(dialect_count as usize);
        for _ in 0..dialect_count {
            if let Ok(dialect) = Smb2Dialect::try_from(cursor.read_u16::<LittleEndian>()?) {
                dialects.push(dialect);
            }
        }

        Ok(Self {
            security_mode,
            capabilities,
            client_guid: Uuid::from_bytes(guid_bytes),
            dialects,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::NEGOTIATE_REQUEST)?;
        buf.write_u16::<LittleEndian>(self.dialects.len() as u16)?;
        buf.write_u16::<LittleEndian>(self.security_mode.bits())?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_all(self.client_guid.as_bytes())?;
        buf.write_u64::<LittleEndian>(0)?;
        for dialect in &self.dialects {
            buf.write_u16::<LittleEndian>(dialect.to_u16())?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        36 + self.dialects.len() * 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2NegotiateResponse {
    pub security_mode: SecurityMode,
    pub dialect_revision: Smb2Dialect,
    pub server_guid: Uuid,
    pub capabilities: Smb2Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: u64,
    pub server_start_time: u64,
    pub security_blob: Vec<u8>,
}

impl Smb2NegotiateResponse {
    pub fn new(dialect: Smb2Dialect) -> Self {
        Self {
            security_mode: SecurityMode::SIGNING_ENABLED,
            dialect_revision: dialect,
            server_guid: Uuid::new_v4(),
            capabilities: Smb2Capabilities::empty(),
            max_transact_size: 1 << 20,
            max_read_size: 1 << 20,
            max_write_size: 1 << 20,
            system_time: 0,
            server_start_time: 0,
            security_blob: Vec::new(),
        }
    }
}

const NEGOTIATE_RESPONSE_FIXED: usize = 64;

impl SmbMessage for Smb2NegotiateResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < NEGOTIATE_RESPONSE_FIXED {
            return Err(Error::ParseError("Negotiate response too short".into()));
        }

        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::NEGOTIATE_RESPONSE, "negotiate response")?;

        let security_mode = SecurityMode::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let dialect_revision = Smb2Dialect::try_from(cursor.read_u16::<LittleEndian>()?)?;
        let _negotiate_context_count = cursor.read_u16::<LittleEndian>()?;

        let mut guid_bytes = [0u8; 16];
        cursor.read_exact(&mut guid_bytes)?;

        let capabilities = Smb2Capabilities::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let max_transact_size = cursor.read_u32::<LittleEndian>()?;
        let max_read_size = cursor.read_u32::<LittleEndian>()?;
        let max_write_size = cursor.read_u32::<LittleEndian>()?;
        let system_time = cursor.read_u64::<LittleEndian>()?;
        let server_start_time = cursor.read_u64::<LittleEndian>()?;
        let blob_offset = cursor.read_u16::<LittleEndian>()?;
        let blob_length = cursor.read_u16::<LittleEndian>()?;

        let security_blob = variable_buffer(buf, blob_offset as u32, blob_length as u32)?.to_vec();

        Ok(Self {
            security_mode,
            dialect_revision,
            server_guid: Uuid::from_bytes(guid_bytes),
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            system_time,
            server_start_time,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::NEGOTIATE_RESPONSE)?;
        buf.write_u16::<LittleEndian>(self.security_mode.bits())?;
        buf.write_u16::<LittleEndian>(self.dialect_revision.to_u16())?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_all(self.server_guid.as_bytes())?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_u32::<LittleEndian>(self.max_transact_size)?;
        buf.write_u32::<LittleEndian>(self.max_read_size)?;
        buf.write_u32::<LittleEndian>(self.max_write_size)?;
        buf.write_u64::<LittleEndian>(self.system_time)?;
        buf.write_u64::<LittleEndian>(self.server_start_time)?;

        let blob_offset = if self.security_blob.is_empty() {
            0
        } else {
            (SMB2_HEADER_SIZE + NEGOTIATE_RESPONSE_FIXED) as u16
        };
        buf.write_u16::<LittleEndian>(blob_offset)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_all(&self.security_blob)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        NEGOTIATE_RESPONSE_FIXED + self.security_blob.len()
    }
}

//! SMB2 TREE_CONNECT and TREE_DISCONNECT

use super::common::{check_structure_size, utf16le_bytes, utf16le_string, variable_buffer, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{structure_size, DesiredAccess, SMB2_HEADER_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io;

const TREE_CONNECT_REQUEST_FIXED: usize = 8;

/// Request for a `\\server\share` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2TreeConnectRequest {
    pub flags: u16,
    pub path: String,
}

impl Smb2TreeConnectRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            flags: 0,
            path: path.into(),
        }
    }

    /// The share component of the UNC path, if any
    pub fn share_name(&self) -> Option<&str> {
        self.path
            .trim_start_matches('\\')
            .split('\\')
            .nth(1)
            .filter(|s| !s.is_empty())
    }
}

impl SmbMessage for Smb2TreeConnectRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(
            &mut cursor,
            structure_size::TREE_CONNECT_REQUEST,
            "tree connect request",
        )?;

        let flags = cursor.read_u16::<LittleEndian>()?;
        let path_offset = cursor.read_u16::<LittleEndian>()?;
        let path_length = cursor.read_u16::<LittleEndian>()?;
        let path = utf16le_string(variable_buffer(buf, path_offset as u32, path_length as u32)?);

        Ok(Self { flags, path })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let path_bytes = utf16le_bytes(&self.path);
        let mut buf = Vec::with_capacity(TREE_CONNECT_REQUEST_FIXED + path_bytes.len());
        buf.write_u16::<LittleEndian>(structure_size::TREE_CONNECT_REQUEST)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + TREE_CONNECT_REQUEST_FIXED) as u16)?;
        buf.write_u16::<LittleEndian>(path_bytes.len() as u16)?;
        buf.extend_from_slice(&path_bytes);
        Ok(buf)
    }

    fn size(&self) -> usize {
        TREE_CONNECT_REQUEST_FIXED + self.path.encode_utf16().count() * 2
    }
}

/// Share types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShareType {
    Disk = 0x01,
    Pipe = 0x02,
    Print = 0x03,
}

impl TryFrom<u8> for ShareType {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Disk),
            0x02 => Ok(Self::Pipe),
            0x03 => Ok(Self::Print),
            _ => Err(Error::ParseError(format!("Invalid share type: {}", value))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2TreeConnectResponse {
    pub share_type: ShareType,
    pub share_flags: u32,
    pub capabilities: u32,
    pub maximal_access: DesiredAccess,
}

impl Smb2TreeConnectResponse {
    pub fn new(share_type: ShareType) -> Self {
        Self {
            share_type,
            share_flags: 0,
            capabilities: 0,
            maximal_access: DesiredAccess::FILE_GENERIC_READ
                | DesiredAccess::FILE_GENERIC_WRITE
                | DesiredAccess::DELETE,
        }
    }
}

impl SmbMessage for Smb2TreeConnectResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(
            &mut cursor,
            structure_size::TREE_CONNECT_RESPONSE,
            "tree connect response",
        )?;

        let share_type = ShareType::try_from(cursor.read_u8()?)?;
        let _reserved = cursor.read_u8()?;
        let share_flags = cursor.read_u32::<LittleEndian>()?;
        let capabilities = cursor.read_u32::<LittleEndian>()?;
        let maximal_access = DesiredAccess::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);

        Ok(Self {
            share_type,
            share_flags,
            capabilities,
            maximal_access,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(16);
        buf.write_u16::<LittleEndian>(structure_size::TREE_CONNECT_RESPONSE)?;
        buf.write_u8(self.share_type as u8)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.share_flags)?;
        buf.write_u32::<LittleEndian>(self.capabilities)?;
        buf.write_u32::<LittleEndian>(self.maximal_access.bits())?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        16
    }
}

/// TREE_DISCONNECT request and response share the same 4-byte body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Smb2TreeDisconnect;

impl SmbMessage for Smb2TreeDisconnect {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::TREE_DISCONNECT, "tree disconnect")?;
        Ok(Self)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(4);
        buf.write_u16::<LittleEndian>(structure_size::TREE_DISCONNECT)?;
        buf.write_u16::<LittleEndian>(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        4
    }
}

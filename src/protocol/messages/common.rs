//! Types shared by every SMB2 message

use crate::error::{Error, NtStatus, Result};
use crate::protocol::smb2_constants::{header_flags, structure_size, Smb2Command, SMB2_HEADER_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io::{self, Read};

/// A message body that can be parsed from and serialized to bytes.
///
/// Bodies start right after the 64-byte header; offsets inside a body are
/// relative to the start of the header, as on the wire.
pub trait SmbMessage: Sized {
    fn parse(buf: &[u8]) -> Result<Self>;

    fn serialize(&self) -> Result<Vec<u8>>;

    /// Size of the serialized body
    fn size(&self) -> usize;
}

/// SMB2 Protocol ID (0xFE 'S' 'M' 'B')
pub const SMB2_PROTOCOL_ID: u32 = 0x424D53FE;

/// SMB2 sync header (64 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Header {
    pub protocol_id: u32,
    pub structure_size: u16,
    pub credit_charge: u16,
    pub status: u32,
    pub command: Smb2Command,
    pub credits: u16,
    pub flags: u32,
    pub next_command: u32,
    pub message_id: u64,
    pub reserved: u32,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    pub fn new(command: Smb2Command) -> Self {
        Self {
            protocol_id: SMB2_PROTOCOL_ID,
            structure_size: 64,
            credit_charge: 0,
            status: 0,
            command,
            credits: 1,
            flags: 0,
            next_command: 0,
            message_id: 0,
            reserved: 0,
            tree_id: 0,
            session_id: 0,
            signature: [0; 16],
        }
    }

    /// Response header mirroring a request's identifiers
    pub fn response_to(request: &Smb2Header, status: NtStatus) -> Self {
        Self {
            status: status as u32,
            flags: header_flags::RESPONSE,
            credits: request.credits.max(1),
            message_id: request.message_id,
            tree_id: request.tree_id,
            session_id: request.session_id,
            ..Self::new(request.command)
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SMB2_HEADER_SIZE {
            return Err(Error::InvalidHeader(format!(
                "SMB2 message of {} bytes is shorter than its header",
                buf.len()
            )));
        }

        let mut cursor = io::Cursor::new(buf);
        let protocol_id = cursor.read_u32::<LittleEndian>()?;
        if protocol_id != SMB2_PROTOCOL_ID {
            return Err(Error::InvalidHeader(format!(
                "Invalid protocol ID: 0x{:08x}",
                protocol_id
            )));
        }

        let structure_size = cursor.read_u16::<LittleEndian>()?;
        let credit_charge = cursor.read_u16::<LittleEndian>()?;
        let status = cursor.read_u32::<LittleEndian>()?;
        let command = Smb2Command::try_from(cursor.read_u16::<LittleEndian>()?)?;
        let credits = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u32::<LittleEndian>()?;
        let next_command = cursor.read_u32::<LittleEndian>()?;
        let message_id = cursor.read_u64::<LittleEndian>()?;
        let reserved = cursor.read_u32::<LittleEndian>()?;
        let tree_id = cursor.read_u32::<LittleEndian>()?;
        let session_id = cursor.read_u64::<LittleEndian>()?;

        let mut signature = [0u8; 16];
        cursor.read_exact(&mut signature)?;

        Ok(Self {
            protocol_id,
            structure_size,
            credit_charge,
            status,
            command,
            credits,
            flags,
            next_command,
            message_id,
            reserved,
            tree_id,
            session_id,
            signature,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(SMB2_HEADER_SIZE);
        buf.write_u32::<LittleEndian>(self.protocol_id)?;
        buf.write_u16::<LittleEndian>(self.structure_size)?;
        buf.write_u16::<LittleEndian>(self.credit_charge)?;
        buf.write_u32::<LittleEndian>(self.status)?;
        buf.write_u16::<LittleEndian>(self.command as u16)?;
        buf.write_u16::<LittleEndian>(self.credits)?;
        buf.write_u32::<LittleEndian>(self.flags)?;
        buf.write_u32::<LittleEndian>(self.next_command)?;
        buf.write_u64::<LittleEndian>(self.message_id)?;
        buf.write_u32::<LittleEndian>(self.reserved)?;
        buf.write_u32::<LittleEndian>(self.tree_id)?;
        buf.write_u64::<LittleEndian>(self.session_id)?;
        buf.extend_from_slice(&self.signature);
        Ok(buf)
    }

    pub fn is_response(&self) -> bool {
        self.flags & header_flags::RESPONSE != 0
    }

    pub fn is_async(&self) -> bool {
        self.flags & header_flags::ASYNC_COMMAND != 0
    }

    pub fn nt_status(&self) -> NtStatus {
        NtStatus::from_u32(self.status)
    }
}

/// Header followed by a serialized body
pub fn encode_message<M: SmbMessage>(header: &Smb2Header, body: &M) -> Result<Vec<u8>> {
    let mut buf = header.serialize()?;
    buf.reserve(body.size());
    buf.extend_from_slice(&body.serialize()?);
    Ok(buf)
}

/// Split a raw message into its header and body
pub fn decode_message(buf: &[u8]) -> Result<(Smb2Header, &[u8])> {
    let header = Smb2Header::parse(buf)?;
    Ok((header, &buf[SMB2_HEADER_SIZE..]))
}

/// Persistent and volatile halves of an open handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    pub fn with_values(persistent: u64, volatile: u64) -> Self {
        Self {
            persistent,
            volatile,
        }
    }

    pub(crate) fn read(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        let persistent = cursor.read_u64::<LittleEndian>()?;
        let volatile = cursor.read_u64::<LittleEndian>()?;
        Ok(Self::with_values(persistent, volatile))
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u64::<LittleEndian>(self.persistent)?;
        buf.write_u64::<LittleEndian>(self.volatile)?;
        Ok(())
    }
}

/// Body of a failed response (structure size 9)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smb2ErrorResponse {
    pub error_data: Vec<u8>,
}

impl SmbMessage for Smb2ErrorResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::ERROR_RESPONSE, "error response")?;
        let _context_count = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let byte_count = cursor.read_u32::<LittleEndian>()? as usize;
        let start = cursor.position() as usize;
        let error_data = buf
            .get(start..start + byte_count)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        Ok(Self { error_data })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::ERROR_RESPONSE)?;
        buf.write_u8(0)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.error_data.len() as u32)?;
        if self.error_data.is_empty() {
            buf.write_u8(0)?;
        } else {
            buf.extend_from_slice(&self.error_data);
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        8 + self.error_data.len().max(1)
    }
}

/// Read and verify the leading StructureSize field
pub(crate) fn check_structure_size(
    cursor: &mut io::Cursor<&[u8]>,
    expected: u16,
    what: &str,
) -> Result<()> {
    let actual = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| Error::ParseError(format!("{} too short", what)))?;
    if actual != expected {
        return Err(Error::ParseError(format!(
            "Invalid {} structure size: {}",
            what, actual
        )));
    }
    Ok(())
}

/// Slice a variable-length buffer addressed relative to the header start
pub(crate) fn variable_buffer(body: &[u8], offset: u32, length: u32) -> Result<&[u8]> {
    if length == 0 {
        return Ok(&[]);
    }
    let start = (offset as usize)
        .checked_sub(SMB2_HEADER_SIZE)
        .ok_or_else(|| Error::ParseError(format!("Buffer offset {} inside header", offset)))?;
    let end = start + length as usize;
    body.get(start..end).ok_or_else(|| {
        Error::ParseError(format!(
            "Buffer {}..{} extends beyond {}-byte body",
            start,
            end,
            body.len()
        ))
    })
}

/// UTF-16LE encoding used for every name on the wire
pub fn utf16le_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

pub fn utf16le_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

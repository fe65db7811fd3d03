//! SMB2 File Operation messages (Create, Close, Read, Write)

use super::common::{
    check_structure_size, utf16le_bytes, utf16le_string, variable_buffer, FileId, SmbMessage,
};
use crate::error::Result;
use crate::protocol::smb2_constants::{
    impersonation_level, oplock_level, structure_size, CloseFlags, CreateAction,
    CreateDisposition, CreateOptions, DesiredAccess, FileAttributes, ShareAccess,
    SMB2_HEADER_SIZE,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io;

const CREATE_REQUEST_FIXED: usize = 56;
const CREATE_RESPONSE_FIXED: usize = 88;
const READ_REQUEST_FIXED: usize = 48;
const READ_RESPONSE_FIXED: usize = 16;
const WRITE_REQUEST_FIXED: usize = 48;

/// SMB2 Create (Open) Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CreateRequest {
    pub requested_oplock_level: u8,
    pub impersonation_level: u32,
    pub desired_access: DesiredAccess,
    pub file_attributes: FileAttributes,
    pub share_access: ShareAccess,
    pub create_disposition: CreateDisposition,
    pub create_options: CreateOptions,
    /// Share-relative path with backslash separators; empty names the share root
    pub file_name: String,
}

impl Smb2CreateRequest {
    /// Open an existing object for reading
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            requested_oplock_level: oplock_level::NONE,
            impersonation_level: impersonation_level::IMPERSONATION,
            desired_access: DesiredAccess::FILE_GENERIC_READ,
            file_attributes: FileAttributes::empty(),
            share_access: ShareAccess::FILE_SHARE_READ
                | ShareAccess::FILE_SHARE_WRITE
                | ShareAccess::FILE_SHARE_DELETE,
            create_disposition: CreateDisposition::Open,
            create_options: CreateOptions::empty(),
            file_name: file_name.into(),
        }
    }

    pub fn with_access(mut self, access: DesiredAccess) -> Self {
        self.desired_access = access;
        self
    }

    pub fn with_disposition(mut self, disposition: CreateDisposition) -> Self {
        self.create_disposition = disposition;
        self
    }

    pub fn with_options(mut self, options: CreateOptions) -> Self {
        self.create_options = options;
        self
    }

    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.file_attributes = attributes;
        self
    }
}

impl SmbMessage for Smb2CreateRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::CREATE_REQUEST, "create request")?;

        let _security_flags = cursor.read_u8()?;
        let requested_oplock_level = cursor.read_u8()?;
        let impersonation_level = cursor.read_u32::<LittleEndian>()?;
        let _smb_create_flags = cursor.read_u64::<LittleEndian>()?;
        let _reserved = cursor.read_u64::<LittleEndian>()?;
        let desired_access = DesiredAccess::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let file_attributes = FileAttributes::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let share_access = ShareAccess::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let create_disposition = CreateDisposition::try_from(cursor.read_u32::<LittleEndian>()?)?;
        let create_options = CreateOptions::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let name_offset = cursor.read_u16::<LittleEndian>()?;
        let name_length = cursor.read_u16::<LittleEndian>()?;

        let file_name = utf16le_string(variable_buffer(buf, name_offset as u32, name_length as u32)?);

        Ok(Self {
            requested_oplock_level,
            impersonation_level,
            desired_access,
            file_attributes,
            share_access,
            create_disposition,
            create_options,
            file_name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let name_bytes = utf16le_bytes(&self.file_name);
        let mut buf = Vec::with_capacity(self.size());

        buf.write_u16::<LittleEndian>(structure_size::CREATE_REQUEST)?;
        buf.write_u8(0)?; // security flags
        buf.write_u8(self.requested_oplock_level)?;
        buf.write_u32::<LittleEndian>(self.impersonation_level)?;
        buf.write_u64::<LittleEndian>(0)?; // create flags
        buf.write_u64::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.desired_access.bits())?;
        buf.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buf.write_u32::<LittleEndian>(self.share_access.bits())?;
        buf.write_u32::<LittleEndian>(self.create_disposition as u32)?;
        buf.write_u32::<LittleEndian>(self.create_options.bits())?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + CREATE_REQUEST_FIXED) as u16)?;
        buf.write_u16::<LittleEndian>(name_bytes.len() as u16)?;
        buf.write_u32::<LittleEndian>(0)?; // create contexts offset
        buf.write_u32::<LittleEndian>(0)?; // create contexts length

        // The buffer must hold at least one byte even for the share root
        if name_bytes.is_empty() {
            buf.write_u8(0)?;
        } else {
            buf.extend_from_slice(&name_bytes);
        }

        Ok(buf)
    }

    fn size(&self) -> usize {
        CREATE_REQUEST_FIXED + (self.file_name.encode_utf16().count() * 2).max(1)
    }
}

/// SMB2 Create (Open) Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CreateResponse {
    pub oplock_level: u8,
    pub create_action: CreateAction,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
    pub file_id: FileId,
}

impl Smb2CreateResponse {
    pub fn new(file_id: FileId) -> Self {
        Self {
            oplock_level: oplock_level::NONE,
            create_action: CreateAction::Opened,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            change_time: 0,
            allocation_size: 0,
            end_of_file: 0,
            file_attributes: FileAttributes::NORMAL,
            file_id,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_attributes.contains(FileAttributes::DIRECTORY)
    }
}

impl SmbMessage for Smb2CreateResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::CREATE_RESPONSE, "create response")?;

        let oplock_level = cursor.read_u8()?;
        let _flags = cursor.read_u8()?;
        let create_action = CreateAction::from_u32(cursor.read_u32::<LittleEndian>()?);
        let creation_time = cursor.read_u64::<LittleEndian>()?;
        let last_access_time = cursor.read_u64::<LittleEndian>()?;
        let last_write_time = cursor.read_u64::<LittleEndian>()?;
        let change_time = cursor.read_u64::<LittleEndian>()?;
        let allocation_size = cursor.read_u64::<LittleEndian>()?;
        let end_of_file = cursor.read_u64::<LittleEndian>()?;
        let file_attributes = FileAttributes::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let _reserved2 = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read(&mut cursor)?;

        Ok(Self {
            oplock_level,
            create_action,
            creation_time,
            last_access_time,
            last_write_time,
            change_time,
            allocation_size,
            end_of_file,
            file_attributes,
            file_id,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::CREATE_RESPONSE)?;
        buf.write_u8(self.oplock_level)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.create_action as u32)?;
        buf.write_u64::<LittleEndian>(self.creation_time)?;
        buf.write_u64::<LittleEndian>(self.last_access_time)?;
        buf.write_u64::<LittleEndian>(self.last_write_time)?;
        buf.write_u64::<LittleEndian>(self.change_time)?;
        buf.write_u64::<LittleEndian>(self.allocation_size)?;
        buf.write_u64::<LittleEndian>(self.end_of_file)?;
        buf.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buf.write_u32::<LittleEndian>(0)?;
        self.file_id.write(&mut buf)?;
        buf.write_u32::<LittleEndian>(0)?; // create contexts offset
        buf.write_u32::<LittleEndian>(0)?; // create contexts length
        Ok(buf)
    }

    fn size(&self) -> usize {
        CREATE_RESPONSE_FIXED
    }
}

/// SMB2 Close Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CloseRequest {
    pub flags: CloseFlags,
    pub file_id: FileId,
}

impl Smb2CloseRequest {
    pub fn new(file_id: FileId) -> Self {
        Self {
            flags: CloseFlags::empty(),
            file_id,
        }
    }
}

impl SmbMessage for Smb2CloseRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::CLOSE_REQUEST, "close request")?;

        let flags = CloseFlags::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read(&mut cursor)?;

        Ok(Self { flags, file_id })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(24);
        buf.write_u16::<LittleEndian>(structure_size::CLOSE_REQUEST)?;
        buf.write_u16::<LittleEndian>(self.flags.bits())?;
        buf.write_u32::<LittleEndian>(0)?;
        self.file_id.write(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        24
    }
}

/// SMB2 Close Response; attributes are only filled in when the request
/// asked for POSTQUERY_ATTRIB
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smb2CloseResponse {
    pub flags: u16,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_attributes: u32,
}

impl SmbMessage for Smb2CloseResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::CLOSE_RESPONSE, "close response")?;

        let flags = cursor.read_u16::<LittleEndian>()?;
        let _reserved = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            flags,
            creation_time: cursor.read_u64::<LittleEndian>()?,
            last_access_time: cursor.read_u64::<LittleEndian>()?,
            last_write_time: cursor.read_u64::<LittleEndian>()?,
            change_time: cursor.read_u64::<LittleEndian>()?,
            allocation_size: cursor.read_u64::<LittleEndian>()?,
            end_of_file: cursor.read_u64::<LittleEndian>()?,
            file_attributes: cursor.read_u32::<LittleEndian>()?,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(60);
        buf.write_u16::<LittleEndian>(structure_size::CLOSE_RESPONSE)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u64::<LittleEndian>(self.creation_time)?;
        buf.write_u64::<LittleEndian>(self.last_access_time)?;
        buf.write_u64::<LittleEndian>(self.last_write_time)?;
        buf.write_u64::<LittleEndian>(self.change_time)?;
        buf.write_u64::<LittleEndian>(self.allocation_size)?;
        buf.write_u64::<LittleEndian>(self.end_of_file)?;
        buf.write_u32::<LittleEndian>(self.file_attributes)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        60
    }
}

/// SMB2 Read Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2ReadRequest {
    pub length: u32,
    pub offset: u64,
    pub file_id: FileId,
    pub minimum_count: u32,
}

impl Smb2ReadRequest {
    pub fn new(file_id: FileId, offset: u64, length: u32) -> Self {
        Self {
            length,
            offset,
            file_id,
            minimum_count: 0,
        }
    }
}

impl SmbMessage for Smb2ReadRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::READ_REQUEST, "read request")?;

        let _padding = cursor.read_u8()?;
        let _flags = cursor.read_u8()?;
        let length = cursor.read_u32::<LittleEndian>()?;
        let offset = cursor.read_u64::<LittleEndian>()?;
        let file_id = FileId::read(&mut cursor)?;
        let minimum_count = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            length,
            offset,
            file_id,
            minimum_count,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::READ_REQUEST)?;
        buf.write_u8(0x50)?; // padding: place data right after the response's fixed part
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.length)?;
        buf.write_u64::<LittleEndian>(self.offset)?;
        self.file_id.write(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.minimum_count)?;
        buf.write_u32::<LittleEndian>(0)?; // channel
        buf.write_u32::<LittleEndian>(0)?; // remaining bytes
        buf.write_u16::<LittleEndian>(0)?; // channel info offset
        buf.write_u16::<LittleEndian>(0)?; // channel info length
        buf.write_u8(0)?; // variable buffer
        Ok(buf)
    }

    fn size(&self) -> usize {
        READ_REQUEST_FIXED + 1
    }
}

/// SMB2 Read Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2ReadResponse {
    pub data_remaining: u32,
    pub data: Vec<u8>,
}

impl Smb2ReadResponse {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data_remaining: 0,
            data,
        }
    }
}

impl SmbMessage for Smb2ReadResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::READ_RESPONSE, "read response")?;

        let data_offset = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let data_length = cursor.read_u32::<LittleEndian>()?;
        let data_remaining = cursor.read_u32::<LittleEndian>()?;

        let data = variable_buffer(buf, data_offset as u32, data_length)?.to_vec();

        Ok(Self {
            data_remaining,
            data,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::READ_RESPONSE)?;
        buf.write_u8((SMB2_HEADER_SIZE + READ_RESPONSE_FIXED) as u8)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.data.len() as u32)?;
        buf.write_u32::<LittleEndian>(self.data_remaining)?;
        buf.write_u32::<LittleEndian>(0)?;
        if self.data.is_empty() {
            buf.write_u8(0)?;
        } else {
            buf.extend_from_slice(&self.data);
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        READ_RESPONSE_FIXED + self.data.len().max(1)
    }
}

/// SMB2 Write Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2WriteRequest {
    pub offset: u64,
    pub file_id: FileId,
    pub data: Vec<u8>,
}

impl Smb2WriteRequest {
    pub fn new(file_id: FileId, offset: u64, data: Vec<u8>) -> Self {
        Self {
            offset,
            file_id,
            data,
        }
    }
}

impl SmbMessage for Smb2WriteRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::WRITE_REQUEST, "write request")?;

        let data_offset = cursor.read_u16::<LittleEndian>()?;
        let length = cursor.read_u32::<LittleEndian>()?;
        let offset = cursor.read_u64::<LittleEndian>()?;
        let file_id = FileId::read(&mut cursor)?;

        let data = variable_buffer(buf, data_offset as u32, length)?.to_vec();

        Ok(Self {
            offset,
            file_id,
            data,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::WRITE_REQUEST)?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + WRITE_REQUEST_FIXED) as u16)?;
        buf.write_u32::<LittleEndian>(self.data.len() as u32)?;
        buf.write_u64::<LittleEndian>(self.offset)?;
        self.file_id.write(&mut buf)?;
        buf.write_u32::<LittleEndian>(0)?; // channel
        buf.write_u32::<LittleEndian>(0)?; // remaining bytes
        buf.write_u16::<LittleEndian>(0)?; // channel info offset
        buf.write_u16::<LittleEndian>(0)?; // channel info length
        buf.write_u32::<LittleEndian>(0)?; // flags
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    fn size(&self) -> usize {
        WRITE_REQUEST_FIXED + self.data.len()
    }
}

/// SMB2 Write Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smb2WriteResponse {
    pub count: u32,
}

impl Smb2WriteResponse {
    pub fn new(count: u32) -> Self {
        Self { count }
    }
}

impl SmbMessage for Smb2WriteResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::WRITE_RESPONSE, "write response")?;
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let count = cursor.read_u32::<LittleEndian>()?;
        Ok(Self { count })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(16);
        buf.write_u16::<LittleEndian>(structure_size::WRITE_RESPONSE)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.count)?;
        buf.write_u32::<LittleEndian>(0)?; // remaining
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        16
    }
}

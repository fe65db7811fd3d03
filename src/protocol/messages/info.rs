//! SMB2 Query/Set Info messages

use super::common::{check_structure_size, variable_buffer, FileId, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{structure_size, SMB2_HEADER_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io;

const QUERY_INFO_REQUEST_FIXED: usize = 40;
const QUERY_INFO_RESPONSE_FIXED: usize = 8;
const SET_INFO_REQUEST_FIXED: usize = 32;

/// Info types for QueryInfo/SetInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InfoType {
    File = 0x01,
    FileSystem = 0x02,
    Security = 0x03,
    Quota = 0x04,
}

impl TryFrom<u8> for InfoType {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(InfoType::File),
            0x02 => Ok(InfoType::FileSystem),
            0x03 => Ok(InfoType::Security),
            0x04 => Ok(InfoType::Quota),
            _ => Err(Error::InvalidParameter(format!(
                "Invalid info type: {}",
                value
            ))),
        }
    }
}

/// File information classes this client reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileInfoClass {
    DirectoryInformation = 0x01,
    BasicInformation = 0x04,
    StandardInformation = 0x05,
    RenameInformation = 0x0A,
    DispositionInformation = 0x0D,
    EndOfFileInformation = 0x14,
}

impl TryFrom<u8> for FileInfoClass {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FileInfoClass::DirectoryInformation),
            0x04 => Ok(FileInfoClass::BasicInformation),
            0x05 => Ok(FileInfoClass::StandardInformation),
            0x0A => Ok(FileInfoClass::RenameInformation),
            0x0D => Ok(FileInfoClass::DispositionInformation),
            0x14 => Ok(FileInfoClass::EndOfFileInformation),
            _ => Err(Error::InvalidParameter(format!(
                "Unsupported file info class: {}",
                value
            ))),
        }
    }
}

/// SMB2 QUERY_INFO Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2QueryInfoRequest {
    pub info_type: InfoType,
    pub file_info_class: FileInfoClass,
    pub output_buffer_length: u32,
    pub additional_information: u32,
    pub flags: u32,
    pub file_id: FileId,
    pub input_buffer: Vec<u8>,
}

impl Smb2QueryInfoRequest {
    pub fn file_info(file_id: FileId, class: FileInfoClass, output_buffer_length: u32) -> Self {
        Self {
            info_type: InfoType::File,
            file_info_class: class,
            output_buffer_length,
            additional_information: 0,
            flags: 0,
            file_id,
            input_buffer: Vec::new(),
        }
    }
}

impl SmbMessage for Smb2QueryInfoRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::QUERY_INFO_REQUEST, "query info request")?;

        let info_type = InfoType::try_from(cursor.read_u8()?)?;
        let file_info_class = FileInfoClass::try_from(cursor.read_u8()?)?;
        let output_buffer_length = cursor.read_u32::<LittleEndian>()?;
        let input_buffer_offset = cursor.read_u16::<LittleEndian>()?;
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let input_buffer_length = cursor.read_u32::<LittleEndian>()?;
        let additional_information = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read(&mut cursor)?;

        let input_buffer =
            variable_buffer(buf, input_buffer_offset as u32, input_buffer_length)?.to_vec();

        Ok(Self {
            info_type,
            file_info_class,
            output_buffer_length,
            additional_information,
            flags,
            file_id,
            input_buffer,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());

        buf.write_u16::<LittleEndian>(structure_size::QUERY_INFO_REQUEST)?;
        buf.write_u8(self.info_type as u8)?;
        buf.write_u8(self.file_info_class as u8)?;
        buf.write_u32::<LittleEndian>(self.output_buffer_length)?;

        let input_buffer_offset = if self.input_buffer.is_empty() {
            0
        } else {
            (SMB2_HEADER_SIZE + QUERY_INFO_REQUEST_FIXED) as u16
        };

        buf.write_u16::<LittleEndian>(input_buffer_offset)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.input_buffer.len() as u32)?;
        buf.write_u32::<LittleEndian>(self.additional_information)?;
        buf.write_u32::<LittleEndian>(self.flags)?;
        self.file_id.write(&mut buf)?;
        buf.extend_from_slice(&self.input_buffer);

        Ok(buf)
    }

    fn size(&self) -> usize {
        QUERY_INFO_REQUEST_FIXED + self.input_buffer.len()
    }
}

/// SMB2 QUERY_INFO Response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smb2QueryInfoResponse {
    pub output_buffer: Vec<u8>,
}

impl Smb2QueryInfoResponse {
    pub fn new(output_buffer: Vec<u8>) -> Self {
        Self { output_buffer }
    }
}

impl SmbMessage for Smb2QueryInfoResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::QUERY_INFO_RESPONSE, "query info response")?;

        let offset = cursor.read_u16::<LittleEndian>()?;
        let length = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            output_buffer: variable_buffer(buf, offset as u32, length)?.to_vec(),
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::QUERY_INFO_RESPONSE)?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + QUERY_INFO_RESPONSE_FIXED) as u16)?;
        buf.write_u32::<LittleEndian>(self.output_buffer.len() as u32)?;
        if self.output_buffer.is_empty() {
            buf.write_u8(0)?;
        } else {
            buf.extend_from_slice(&self.output_buffer);
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        QUERY_INFO_RESPONSE_FIXED + self.output_buffer.len().max(1)
    }
}

/// SMB2 SET_INFO Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SetInfoRequest {
    pub info_type: InfoType,
    pub file_info_class: FileInfoClass,
    pub additional_information: u32,
    pub file_id: FileId,
    pub buffer: Vec<u8>,
}

impl Smb2SetInfoRequest {
    pub fn file_info(file_id: FileId, class: FileInfoClass, buffer: Vec<u8>) -> Self {
        Self {
            info_type: InfoType::File,
            file_info_class: class,
            additional_information: 0,
            file_id,
            buffer,
        }
    }
}

impl SmbMessage for Smb2SetInfoRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::SET_INFO_REQUEST, "set info request")?;

        let info_type = InfoType::try_from(cursor.read_u8()?)?;
        let file_info_class = FileInfoClass::try_from(cursor.read_u8()?)?;
        let buffer_length = cursor.read_u32::<LittleEndian>()?;
        let buffer_offset = cursor.read_u16::<LittleEndian>()?;
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let additional_information = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read(&mut cursor)?;

        let buffer = variable_buffer(buf, buffer_offset as u32, buffer_length)?.to_vec();

        Ok(Self {
            info_type,
            file_info_class,
            additional_information,
            file_id,
            buffer,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());

        buf.write_u16::<LittleEndian>(structure_size::SET_INFO_REQUEST)?;
        buf.write_u8(self.info_type as u8)?;
        buf.write_u8(self.file_info_class as u8)?;
        buf.write_u32::<LittleEndian>(self.buffer.len() as u32)?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + SET_INFO_REQUEST_FIXED) as u16)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.additional_information)?;
        self.file_id.write(&mut buf)?;
        buf.extend_from_slice(&self.buffer);

        Ok(buf)
    }

    fn size(&self) -> usize {
        SET_INFO_REQUEST_FIXED + self.buffer.len()
    }
}

/// SMB2 SET_INFO Response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Smb2SetInfoResponse;

impl SmbMessage for Smb2SetInfoResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(&mut cursor, structure_size::SET_INFO_RESPONSE, "set info response")?;
        Ok(Self)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(2);
        buf.write_u16::<LittleEndian>(structure_size::SET_INFO_RESPONSE)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        2
    }
}

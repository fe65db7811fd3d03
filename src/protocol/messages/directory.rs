//! SMB2 QUERY_DIRECTORY

use super::common::{
    check_structure_size, utf16le_bytes, utf16le_string, variable_buffer, FileId, SmbMessage,
};
use super::info::FileInfoClass;
use crate::error::Result;
use crate::protocol::smb2_constants::{structure_size, SMB2_HEADER_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io;

const QUERY_DIRECTORY_REQUEST_FIXED: usize = 32;
const QUERY_DIRECTORY_RESPONSE_FIXED: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2QueryDirectoryRequest {
    pub file_information_class: FileInfoClass,
    pub flags: u8,
    pub file_index: u32,
    pub file_id: FileId,
    pub output_buffer_length: u32,
    /// Search pattern, `*` for every entry
    pub file_name: String,
}

impl Smb2QueryDirectoryRequest {
    pub fn new(file_id: FileId, pattern: impl Into<String>, output_buffer_length: u32) -> Self {
        Self {
            file_information_class: FileInfoClass::DirectoryInformation,
            flags: 0,
            file_index: 0,
            file_id,
            output_buffer_length,
            file_name: pattern.into(),
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }
}

impl SmbMessage for Smb2QueryDirectoryRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(
            &mut cursor,
            structure_size::QUERY_DIRECTORY_REQUEST,
            "query directory request",
        )?;

        let file_information_class = FileInfoClass::try_from(cursor.read_u8()?)?;
        let flags = cursor.read_u8()?;
        let file_index = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read(&mut cursor)?;
        let name_offset = cursor.read_u16::<LittleEndian>()?;
        let name_length = cursor.read_u16::<LittleEndian>()?;
        let output_buffer_length = cursor.read_u32::<LittleEndian>()?;

        let file_name = utf16le_string(variable_buffer(buf, name_offset as u32, name_length as u32)?);

        Ok(Self {
            file_information_class,
            flags,
            file_index,
            file_id,
            output_buffer_length,
            file_name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let name_bytes = utf16le_bytes(&self.file_name);
        let mut buf = Vec::with_capacity(QUERY_DIRECTORY_REQUEST_FIXED + name_bytes.len());

        buf.write_u16::<LittleEndian>(structure_size::QUERY_DIRECTORY_REQUEST)?;
        buf.write_u8(self.file_information_class as u8)?;
        buf.write_u8(self.flags)?;
        buf.write_u32::<LittleEndian>(self.file_index)?;
        self.file_id.write(&mut buf)?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + QUERY_DIRECTORY_REQUEST_FIXED) as u16)?;
        buf.write_u16::<LittleEndian>(name_bytes.len() as u16)?;
        buf.write_u32::<LittleEndian>(self.output_buffer_length)?;
        buf.extend_from_slice(&name_bytes);

        Ok(buf)
    }

    fn size(&self) -> usize {
        QUERY_DIRECTORY_REQUEST_FIXED + self.file_name.encode_utf16().count() * 2
    }
}

/// Carries a run of packed directory entries, see
/// [`parse_directory_entries`](super::file_info::parse_directory_entries)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smb2QueryDirectoryResponse {
    pub output_buffer: Vec<u8>,
}

impl Smb2QueryDirectoryResponse {
    pub fn new(output_buffer: Vec<u8>) -> Self {
        Self { output_buffer }
    }
}

impl SmbMessage for Smb2QueryDirectoryResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(buf);
        check_structure_size(
            &mut cursor,
            structure_size::QUERY_DIRECTORY_RESPONSE,
            "query directory response",
        )?;

        let offset = cursor.read_u16::<LittleEndian>()?;
        let length = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            output_buffer: variable_buffer(buf, offset as u32, length)?.to_vec(),
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());

        buf.write_u16::<LittleEndian>(structure_size::QUERY_DIRECTORY_RESPONSE)?;
        buf.write_u16::<LittleEndian>((SMB2_HEADER_SIZE + QUERY_DIRECTORY_RESPONSE_FIXED) as u16)?;
        buf.write_u32::<LittleEndian>(self.output_buffer.len() as u32)?;
        if self.output_buffer.is_empty() {
            buf.write_u8(0)?;
        } else {
            buf.extend_from_slice(&self.output_buffer);
        }

        Ok(buf)
    }

    fn size(&self) -> usize {
        QUERY_DIRECTORY_RESPONSE_FIXED + self.output_buffer.len().max(1)
    }
}

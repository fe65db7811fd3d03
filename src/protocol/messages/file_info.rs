//! File information structures carried in QUERY_DIRECTORY, QUERY_INFO
//! and SET_INFO buffers

use super::common::{utf16le_bytes, utf16le_string};
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::FileAttributes;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use std::io::{self, Read};

/// 100ns intervals between 1601-01-01 and the Unix epoch
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Convert a Windows FILETIME; zero means "not set"
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let since_unix = filetime as i64 - FILETIME_UNIX_EPOCH as i64;
    let secs = since_unix.div_euclid(10_000_000);
    let nanos = (since_unix.rem_euclid(10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

pub fn datetime_to_filetime(time: DateTime<Utc>) -> u64 {
    let hundreds = time.timestamp() * 10_000_000 + (time.timestamp_subsec_nanos() / 100) as i64;
    (hundreds + FILETIME_UNIX_EPOCH as i64).max(0) as u64
}

const DIRECTORY_INFO_FIXED: usize = 64;

/// One FileDirectoryInformation entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDirectoryInfo {
    pub file_index: u32,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub file_attributes: FileAttributes,
    pub file_name: String,
}

impl FileDirectoryInfo {
    pub fn new(file_name: impl Into<String>, is_directory: bool, size: u64, modified: u64) -> Self {
        Self {
            file_index: 0,
            creation_time: modified,
            last_access_time: modified,
            last_write_time: modified,
            change_time: modified,
            end_of_file: if is_directory { 0 } else { size },
            allocation_size: if is_directory { 0 } else { (size + 4095) & !4095 },
            file_attributes: if is_directory {
                FileAttributes::DIRECTORY
            } else {
                FileAttributes::ARCHIVE
            },
            file_name: file_name.into(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_attributes.contains(FileAttributes::DIRECTORY)
    }

    /// Serialize with a zero NextEntryOffset; the listing builder patches it
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let name = utf16le_bytes(&self.file_name);
        let mut buffer = Vec::with_capacity(DIRECTORY_INFO_FIXED + name.len());

        buffer.write_u32::<LittleEndian>(0)?;
        buffer.write_u32::<LittleEndian>(self.file_index)?;
        buffer.write_u64::<LittleEndian>(self.creation_time)?;
        buffer.write_u64::<LittleEndian>(self.last_access_time)?;
        buffer.write_u64::<LittleEndian>(self.last_write_time)?;
        buffer.write_u64::<LittleEndian>(self.change_time)?;
        buffer.write_u64::<LittleEndian>(self.end_of_file)?;
        buffer.write_u64::<LittleEndian>(self.allocation_size)?;
        buffer.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buffer.write_u32::<LittleEndian>(name.len() as u32)?;
        buffer.extend_from_slice(&name);

        Ok(buffer)
    }

    fn parse_one(entry: &[u8]) -> Result<(u32, Self)> {
        if entry.len() < DIRECTORY_INFO_FIXED {
            return Err(Error::BufferTooSmall {
                need: DIRECTORY_INFO_FIXED,
                have: entry.len(),
            });
        }

        let mut cursor = io::Cursor::new(entry);
        let next_entry_offset = cursor.read_u32::<LittleEndian>()?;
        let file_index = cursor.read_u32::<LittleEndian>()?;
        let creation_time = cursor.read_u64::<LittleEndian>()?;
        let last_access_time = cursor.read_u64::<LittleEndian>()?;
        let last_write_time = cursor.read_u64::<LittleEndian>()?;
        let change_time = cursor.read_u64::<LittleEndian>()?;
        let end_of_file = cursor.read_u64::<LittleEndian>()?;
        let allocation_size = cursor.read_u64::<LittleEndian>()?;
        let file_attributes = FileAttributes::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        let name_length = cursor.read_u32::<LittleEndian>()? as usize;

        let name = entry
            .get(DIRECTORY_INFO_FIXED..DIRECTORY_INFO_FIXED + name_length)
            .ok_or_else(|| Error::ParseError("Directory entry name extends beyond buffer".into()))?;

        Ok((
            next_entry_offset,
            Self {
                file_index,
                creation_time,
                last_access_time,
                last_write_time,
                change_time,
                end_of_file,
                allocation_size,
                file_attributes,
                file_name: utf16le_string(name),
            },
        ))
    }
}

/// Walk a packed FileDirectoryInformation buffer
pub fn parse_directory_entries(buffer: &[u8]) -> Result<Vec<FileDirectoryInfo>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < buffer.len() {
        let (next, entry) = FileDirectoryInfo::parse_one(&buffer[offset..])?;
        entries.push(entry);
        if next == 0 {
            break;
        }
        offset += next as usize;
    }

    Ok(entries)
}

/// Pack entries with 8-byte aligned NextEntryOffset chaining
pub fn build_directory_listing(entries: &[FileDirectoryInfo]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let last = entries.len().saturating_sub(1);

    for (i, entry) in entries.iter().enumerate() {
        let mut entry_buf = entry.serialize()?;
        if i < last {
            let aligned_size = (entry_buf.len() + 7) & !7;
            entry_buf[0..4].copy_from_slice(&(aligned_size as u32).to_le_bytes());
            entry_buf.resize(aligned_size, 0);
        }
        buffer.extend_from_slice(&entry_buf);
    }

    Ok(buffer)
}

/// FileStandardInformation (class 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStandardInfo {
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub number_of_links: u32,
    pub delete_pending: bool,
    pub directory: bool,
}

impl FileStandardInfo {
    pub const SIZE: usize = 24;

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                need: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut cursor = io::Cursor::new(buf);
        Ok(Self {
            allocation_size: cursor.read_u64::<LittleEndian>()?,
            end_of_file: cursor.read_u64::<LittleEndian>()?,
            number_of_links: cursor.read_u32::<LittleEndian>()?,
            delete_pending: cursor.read_u8()? != 0,
            directory: cursor.read_u8()? != 0,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u64::<LittleEndian>(self.allocation_size)?;
        buf.write_u64::<LittleEndian>(self.end_of_file)?;
        buf.write_u32::<LittleEndian>(self.number_of_links)?;
        buf.write_u8(self.delete_pending as u8)?;
        buf.write_u8(self.directory as u8)?;
        buf.write_u16::<LittleEndian>(0)?;
        Ok(buf)
    }
}

/// FileRenameInformation (class 10), SMB2 layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRenameInfo {
    pub replace_if_exists: bool,
    /// Target path relative to the share root
    pub file_name: String,
}

impl FileRenameInfo {
    const FIXED: usize = 20;

    pub fn new(file_name: impl Into<String>, replace_if_exists: bool) -> Self {
        Self {
            replace_if_exists,
            file_name: file_name.into(),
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::FIXED {
            return Err(Error::BufferTooSmall {
                need: Self::FIXED,
                have: buf.len(),
            });
        }
        let mut cursor = io::Cursor::new(buf);
        let replace_if_exists = cursor.read_u8()? != 0;
        let mut reserved = [0u8; 7];
        cursor.read_exact(&mut reserved)?;
        let _root_directory = cursor.read_u64::<LittleEndian>()?;
        let name_length = cursor.read_u32::<LittleEndian>()? as usize;
        let name = buf
            .get(Self::FIXED..Self::FIXED + name_length)
            .ok_or_else(|| Error::ParseError("Rename target extends beyond buffer".into()))?;

        Ok(Self {
            replace_if_exists,
            file_name: utf16le_string(name),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let name = utf16le_bytes(&self.file_name);
        let mut buf = Vec::with_capacity(Self::FIXED + name.len());
        buf.write_u8(self.replace_if_exists as u8)?;
        buf.extend_from_slice(&[0u8; 7]);
        buf.write_u64::<LittleEndian>(0)?; // root directory
        buf.write_u32::<LittleEndian>(name.len() as u32)?;
        buf.extend_from_slice(&name);
        Ok(buf)
    }
}

/// FileDispositionInformation (class 13)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDispositionInfo {
    pub delete_pending: bool,
}

impl FileDispositionInfo {
    pub fn delete() -> Self {
        Self {
            delete_pending: true,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let flag = buf.first().ok_or(Error::BufferTooSmall { need: 1, have: 0 })?;
        Ok(Self {
            delete_pending: *flag != 0,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        vec![self.delete_pending as u8]
    }
}

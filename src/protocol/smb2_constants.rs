//! SMB2 protocol constants

use crate::error::Error;
use bitflags::bitflags;
use std::convert::TryFrom;
use std::fmt;

/// SMB2 magic as bytes
pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// SMB2 header size
pub const SMB2_HEADER_SIZE: usize = 64;

/// Largest read or write this client issues in one request
pub const MAX_IO_CHUNK: u32 = 64 * 1024;

/// Fixed structure sizes (the StructureSize field of each body)
pub mod structure_size {
    pub const ERROR_RESPONSE: u16 = 9;
    pub const NEGOTIATE_REQUEST: u16 = 36;
    pub const NEGOTIATE_RESPONSE: u16 = 65;
    pub const SESSION_SETUP_REQUEST: u16 = 25;
    pub const SESSION_SETUP_RESPONSE: u16 = 9;
    pub const LOGOFF: u16 = 4;
    pub const TREE_CONNECT_REQUEST: u16 = 9;
    pub const TREE_CONNECT_RESPONSE: u16 = 16;
    pub const TREE_DISCONNECT: u16 = 4;
    pub const CREATE_REQUEST: u16 = 57;
    pub const CREATE_RESPONSE: u16 = 89;
    pub const CLOSE_REQUEST: u16 = 24;
    pub const CLOSE_RESPONSE: u16 = 60;
    pub const READ_REQUEST: u16 = 49;
    pub const READ_RESPONSE: u16 = 17;
    pub const WRITE_REQUEST: u16 = 49;
    pub const WRITE_RESPONSE: u16 = 17;
    pub const QUERY_DIRECTORY_REQUEST: u16 = 33;
    pub const QUERY_DIRECTORY_RESPONSE: u16 = 9;
    pub const QUERY_INFO_REQUEST: u16 = 41;
    pub const QUERY_INFO_RESPONSE: u16 = 9;
    pub const SET_INFO_REQUEST: u16 = 33;
    pub const SET_INFO_RESPONSE: u16 = 2;
}

/// SMB2 header flags
pub mod header_flags {
    pub const RESPONSE: u32 = 0x00000001;
    pub const ASYNC_COMMAND: u32 = 0x00000002;
    pub const RELATED_OPERATIONS: u32 = 0x00000004;
    pub const SIGNED: u32 = 0x00000008;
}

bitflags! {
    /// File attributes (MS-FSCC 2.6)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u32 {
        const READONLY            = 0x00000001;
        const HIDDEN              = 0x00000002;
        const SYSTEM              = 0x00000004;
        const DIRECTORY           = 0x00000010;
        const ARCHIVE             = 0x00000020;
        const NORMAL              = 0x00000080;
        const TEMPORARY           = 0x00000100;
        const SPARSE_FILE         = 0x00000200;
        const REPARSE_POINT       = 0x00000400;
        const COMPRESSED          = 0x00000800;
        const OFFLINE             = 0x00001000;
        const NOT_CONTENT_INDEXED = 0x00002000;
        const ENCRYPTED           = 0x00004000;
    }
}

bitflags! {
    /// File access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DesiredAccess: u32 {
        const FILE_READ_DATA        = 0x00000001;
        const FILE_WRITE_DATA       = 0x00000002;
        const FILE_APPEND_DATA      = 0x00000004;
        const FILE_READ_EA          = 0x00000008;
        const FILE_WRITE_EA         = 0x00000010;
        const FILE_EXECUTE          = 0x00000020;
        const FILE_DELETE_CHILD     = 0x00000040;
        const FILE_READ_ATTRIBUTES  = 0x00000080;
        const FILE_WRITE_ATTRIBUTES = 0x00000100;
        const DELETE                = 0x00010000;
        const READ_CONTROL          = 0x00020000;
        const SYNCHRONIZE           = 0x00100000;
        const GENERIC_WRITE         = 0x40000000;
        const GENERIC_READ          = 0x80000000;

        const FILE_GENERIC_READ     = Self::SYNCHRONIZE.bits()
                                    | Self::FILE_READ_DATA.bits()
                                    | Self::FILE_READ_ATTRIBUTES.bits()
                                    | Self::FILE_READ_EA.bits()
                                    | Self::READ_CONTROL.bits();

        const FILE_GENERIC_WRITE    = Self::SYNCHRONIZE.bits()
                                    | Self::FILE_WRITE_DATA.bits()
                                    | Self::FILE_WRITE_ATTRIBUTES.bits()
                                    | Self::FILE_WRITE_EA.bits()
                                    | Self::FILE_APPEND_DATA.bits()
                                    | Self::READ_CONTROL.bits();
    }
}

bitflags! {
    /// Share access granted to other openers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShareAccess: u32 {
        const FILE_SHARE_READ   = 0x00000001;
        const FILE_SHARE_WRITE  = 0x00000002;
        const FILE_SHARE_DELETE = 0x00000004;
    }
}

bitflags! {
    /// File create options
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateOptions: u32 {
        const FILE_DIRECTORY_FILE          = 0x00000001;
        const FILE_WRITE_THROUGH           = 0x00000002;
        const FILE_SEQUENTIAL_ONLY         = 0x00000004;
        const FILE_SYNCHRONOUS_IO_NONALERT = 0x00000020;
        const FILE_NON_DIRECTORY_FILE      = 0x00000040;
        const FILE_RANDOM_ACCESS           = 0x00000800;
        const FILE_DELETE_ON_CLOSE         = 0x00001000;
        const FILE_OPEN_REPARSE_POINT      = 0x00200000;
    }
}

/// What CREATE does when the target does or does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CreateDisposition {
    /// Replace if present, create otherwise
    Supersede = 0x00000000,
    /// Open if present, fail otherwise
    Open = 0x00000001,
    /// Fail if present, create otherwise
    Create = 0x00000002,
    /// Open if present, create otherwise
    OpenIf = 0x00000003,
    /// Truncate if present, fail otherwise
    Overwrite = 0x00000004,
    /// Truncate if present, create otherwise
    OverwriteIf = 0x00000005,
}

impl TryFrom<u32> for CreateDisposition {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x00000000 => Ok(Self::Supersede),
            0x00000001 => Ok(Self::Open),
            0x00000002 => Ok(Self::Create),
            0x00000003 => Ok(Self::OpenIf),
            0x00000004 => Ok(Self::Overwrite),
            0x00000005 => Ok(Self::OverwriteIf),
            _ => Err(Error::ParseError(format!(
                "Invalid create disposition: {}",
                value
            ))),
        }
    }
}

/// Outcome reported in a CREATE response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CreateAction {
    Superseded = 0x00000000,
    Opened = 0x00000001,
    Created = 0x00000002,
    Overwritten = 0x00000003,
}

impl CreateAction {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x00000000 => Self::Superseded,
            0x00000002 => Self::Created,
            0x00000003 => Self::Overwritten,
            _ => Self::Opened,
        }
    }
}

pub mod impersonation_level {
    pub const IMPERSONATION: u32 = 0x00000002;
}

pub mod oplock_level {
    pub const NONE: u8 = 0x00;
}

/// QUERY_DIRECTORY flags
pub mod query_directory_flags {
    pub const RESTART_SCANS: u8 = 0x01;
    pub const RETURN_SINGLE_ENTRY: u8 = 0x02;
    pub const INDEX_SPECIFIED: u8 = 0x04;
    pub const REOPEN: u8 = 0x10;
}

/// SMB2 commands (opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Smb2Command {
    Negotiate = 0x00,
    SessionSetup = 0x01,
    Logoff = 0x02,
    TreeConnect = 0x03,
    TreeDisconnect = 0x04,
    Create = 0x05,
    Close = 0x06,
    Flush = 0x07,
    Read = 0x08,
    Write = 0x09,
    Lock = 0x0A,
    Ioctl = 0x0B,
    Cancel = 0x0C,
    Echo = 0x0D,
    QueryDirectory = 0x0E,
    ChangeNotify = 0x0F,
    QueryInfo = 0x10,
    SetInfo = 0x11,
    OplockBreak = 0x12,
}

impl TryFrom<u16> for Smb2Command {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let command = match value {
            0x00 => Self::Negotiate,
            0x01 => Self::SessionSetup,
            0x02 => Self::Logoff,
            0x03 => Self::TreeConnect,
            0x04 => Self::TreeDisconnect,
            0x05 => Self::Create,
            0x06 => Self::Close,
            0x07 => Self::Flush,
            0x08 => Self::Read,
            0x09 => Self::Write,
            0x0A => Self::Lock,
            0x0B => Self::Ioctl,
            0x0C => Self::Cancel,
            0x0D => Self::Echo,
            0x0E => Self::QueryDirectory,
            0x0F => Self::ChangeNotify,
            0x10 => Self::QueryInfo,
            0x11 => Self::SetInfo,
            0x12 => Self::OplockBreak,
            _ => {
                return Err(Error::InvalidHeader(format!(
                    "Invalid SMB2 command: 0x{:04x}",
                    value
                )))
            }
        };
        Ok(command)
    }
}

bitflags! {
    /// Negotiate security mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityMode: u16 {
        const SIGNING_ENABLED = 0x0001;
        const SIGNING_REQUIRED = 0x0002;
    }
}

bitflags! {
    /// Global capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Smb2Capabilities: u32 {
        const DFS = 0x00000001;
        const LEASING = 0x00000002;
        const LARGE_MTU = 0x00000004;
        const MULTI_CHANNEL = 0x00000008;
        const PERSISTENT_HANDLES = 0x00000010;
        const DIRECTORY_LEASING = 0x00000020;
        const ENCRYPTION = 0x00000040;
    }
}

/// SMB2 dialect revisions this client can speak without signing or
/// encryption contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Smb2Dialect {
    Smb202 = 0x0202,
    Smb210 = 0x0210,
    Smb300 = 0x0300,
    Smb302 = 0x0302,
}

impl TryFrom<u16> for Smb2Dialect {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0202 => Ok(Self::Smb202),
            0x0210 => Ok(Self::Smb210),
            0x0300 => Ok(Self::Smb300),
            0x0302 => Ok(Self::Smb302),
            _ => Err(Error::UnsupportedProtocol(format!(
                "Unknown SMB2 dialect: 0x{:04x}",
                value
            ))),
        }
    }
}

impl Smb2Dialect {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse the `2.1` / `3.0.2` notation used in configuration
    pub fn from_version_str(s: &str) -> Option<Self> {
        match s.trim() {
            "2.0.2" | "2.02" => Some(Self::Smb202),
            "2.1" | "2.1.0" | "2.10" => Some(Self::Smb210),
            "3.0" | "3.0.0" => Some(Self::Smb300),
            "3.0.2" | "3.02" => Some(Self::Smb302),
            _ => None,
        }
    }
}

impl fmt::Display for Smb2Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Smb202 => "SMB 2.0.2",
            Self::Smb210 => "SMB 2.1",
            Self::Smb300 => "SMB 3.0",
            Self::Smb302 => "SMB 3.0.2",
        };
        f.write_str(s)
    }
}

bitflags! {
    /// CLOSE request flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CloseFlags: u16 {
        const POSTQUERY_ATTRIB = 0x0001;
    }
}

//! Error types for the SMB client engine
//!
//! Two layers live here. [`Error`] is the internal error produced by the wire
//! codecs, the transport and the protocol exchanges. [`ErrorCode`] and
//! [`SmbError`] form the closed, caller-facing taxonomy: every public session,
//! share and transfer operation fails with exactly one code and a readable
//! message. The layer that issued the I/O picks the fallback code with
//! [`Error::into_smb_error`].

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for internal SMB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Internal error type for protocol, transport and codec failures
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Protocol parsing error
    #[error("Protocol parsing error: {0}")]
    ParseError(String),

    /// Invalid SMB header
    #[error("Invalid SMB header: {0}")]
    InvalidHeader(String),

    /// Unsupported protocol version
    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocol(String),

    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Authentication exchange could not be carried out
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// State machine error
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Buffer too small
    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// Timeout occurred
    #[error("Operation timed out")]
    Timeout,

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Cryptographic primitive failure
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid NetBIOS name
    #[error("Invalid NetBIOS name: {0}")]
    InvalidNetBiosName(String),

    /// NetBIOS name could not be resolved
    #[error("Name resolution failed: {0}")]
    NameResolution(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The server answered with a non-success status
    #[error("Server returned {0}")]
    Status(NtStatus),

    /// An error that has already been translated for the caller
    #[error(transparent)]
    Smb(#[from] SmbError),
}

impl Error {
    /// Errors after which the byte stream can no longer be trusted
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Timeout
                | Error::ConnectionClosed
                | Error::ConnectionError(_)
                | Error::InvalidHeader(_)
        )
    }

    /// Server statuses worth retrying on the same handle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Status(NtStatus::InsufficientResources | NtStatus::IoTimeout)
        )
    }

    /// The code this error maps to, or `fallback` when nothing more precise applies
    pub fn error_code(&self, fallback: ErrorCode) -> ErrorCode {
        match self {
            Error::Smb(e) => e.code(),
            Error::Status(status) => match status {
                NtStatus::ObjectNameNotFound
                | NtStatus::ObjectPathNotFound
                | NtStatus::NoSuchFile => ErrorCode::FileNotFound,
                NtStatus::LogonFailure
                | NtStatus::AccountDisabled
                | NtStatus::AccountRestriction
                | NtStatus::PasswordExpired => ErrorCode::AuthenticationFailed,
                NtStatus::BadNetworkName | NtStatus::NetworkNameDeleted => {
                    ErrorCode::ShareConnectionFailed
                }
                _ => fallback,
            },
            Error::Io(e) if e.kind() == io::ErrorKind::NetworkUnreachable => ErrorCode::NotOnWiFi,
            Error::NameResolution(_) | Error::InvalidNetBiosName(_) => {
                ErrorCode::UnableToResolveAddress
            }
            Error::FileNotFound(_) => ErrorCode::FileNotFound,
            Error::AuthenticationFailed(_) => ErrorCode::AuthenticationFailed,
            _ => fallback,
        }
    }

    /// Translate into the caller-facing error
    pub fn into_smb_error(self, fallback: ErrorCode) -> SmbError {
        match self {
            Error::Smb(e) => e,
            other => SmbError::with_detail(other.error_code(fallback), other.to_string()),
        }
    }
}

/// NT status codes carried in the SMB2 header (subset of NTSTATUS)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NtStatus {
    Success = 0x00000000,
    Pending = 0x00000103,
    NoMoreFiles = 0x80000006,
    Unsuccessful = 0xC0000001,
    NotImplemented = 0xC0000002,
    InvalidHandle = 0xC0000008,
    InvalidParameter = 0xC000000D,
    NoSuchFile = 0xC000000F,
    EndOfFile = 0xC0000011,
    MoreProcessingRequired = 0xC0000016,
    AccessDenied = 0xC0000022,
    BufferTooSmall = 0xC0000023,
    ObjectNameInvalid = 0xC0000033,
    ObjectNameNotFound = 0xC0000034,
    ObjectNameCollision = 0xC0000035,
    ObjectPathNotFound = 0xC000003A,
    SharingViolation = 0xC0000043,
    DeletePending = 0xC0000056,
    LogonFailure = 0xC000006D,
    AccountRestriction = 0xC000006E,
    PasswordExpired = 0xC0000071,
    AccountDisabled = 0xC0000072,
    InsufficientResources = 0xC000009A,
    IoTimeout = 0xC00000B5,
    FileIsADirectory = 0xC00000BA,
    NotSupported = 0xC00000BB,
    BadNetworkPath = 0xC00000BE,
    NetworkNameDeleted = 0xC00000C9,
    NetworkAccessDenied = 0xC00000CA,
    BadNetworkName = 0xC00000CC,
    DirectoryNotEmpty = 0xC0000101,
    NotADirectory = 0xC0000103,
    UserSessionDeleted = 0xC0000203,
    HostUnreachable = 0xC000023D,
}

impl TryFrom<u32> for NtStatus {
    type Error = u32;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        let status = match value {
            0x00000000 => NtStatus::Success,
            0x00000103 => NtStatus::Pending,
            0x80000006 => NtStatus::NoMoreFiles,
            0xC0000001 => NtStatus::Unsuccessful,
            0xC0000002 => NtStatus::NotImplemented,
            0xC0000008 => NtStatus::InvalidHandle,
            0xC000000D => NtStatus::InvalidParameter,
            0xC000000F => NtStatus::NoSuchFile,
            0xC0000011 => NtStatus::EndOfFile,
            0xC0000016 => NtStatus::MoreProcessingRequired,
            0xC0000022 => NtStatus::AccessDenied,
            0xC0000023 => NtStatus::BufferTooSmall,
            0xC0000033 => NtStatus::ObjectNameInvalid,
            0xC0000034 => NtStatus::ObjectNameNotFound,
            0xC0000035 => NtStatus::ObjectNameCollision,
            0xC000003A => NtStatus::ObjectPathNotFound,
            0xC0000043 => NtStatus::SharingViolation,
            0xC0000056 => NtStatus::DeletePending,
            0xC000006D => NtStatus::LogonFailure,
            0xC000006E => NtStatus::AccountRestriction,
            0xC0000071 => NtStatus::PasswordExpired,
            0xC0000072 => NtStatus::AccountDisabled,
            0xC000009A => NtStatus::InsufficientResources,
            0xC00000B5 => NtStatus::IoTimeout,
            0xC00000BA => NtStatus::FileIsADirectory,
            0xC00000BB => NtStatus::NotSupported,
            0xC00000BE => NtStatus::BadNetworkPath,
            0xC00000C9 => NtStatus::NetworkNameDeleted,
            0xC00000CA => NtStatus::NetworkAccessDenied,
            0xC00000CC => NtStatus::BadNetworkName,
            0xC0000101 => NtStatus::DirectoryNotEmpty,
            0xC0000103 => NtStatus::NotADirectory,
            0xC0000203 => NtStatus::UserSessionDeleted,
            0xC000023D => NtStatus::HostUnreachable,
            other => return Err(other),
        };
        Ok(status)
    }
}

impl NtStatus {
    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == NtStatus::Success
    }

    /// Check if this is an error status
    pub fn is_error(self) -> bool {
        (self as u32) & 0xC0000000 == 0xC0000000
    }

    /// Check if this is a warning status
    pub fn is_warning(self) -> bool {
        (self as u32) & 0x80000000 == 0x80000000 && !self.is_error()
    }

    /// Create from a raw header value. Codes outside the known subset
    /// collapse to `Unsuccessful` unless they are in the success range.
    pub fn from_u32(value: u32) -> Self {
        match NtStatus::try_from(value) {
            Ok(status) => status,
            Err(raw) if raw & 0xC0000000 == 0 => NtStatus::Success,
            Err(_) => NtStatus::Unsuccessful,
        }
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NtStatus::Success => "Success",
            NtStatus::Pending => "Pending",
            NtStatus::NoMoreFiles => "No more files",
            NtStatus::Unsuccessful => "Unsuccessful",
            NtStatus::NotImplemented => "Not implemented",
            NtStatus::InvalidHandle => "Invalid handle",
            NtStatus::InvalidParameter => "Invalid parameter",
            NtStatus::NoSuchFile => "No such file",
            NtStatus::EndOfFile => "End of file",
            NtStatus::MoreProcessingRequired => "More processing required",
            NtStatus::AccessDenied => "Access denied",
            NtStatus::BufferTooSmall => "Buffer too small",
            NtStatus::ObjectNameInvalid => "Object name invalid",
            NtStatus::ObjectNameNotFound => "Object name not found",
            NtStatus::ObjectNameCollision => "Object name collision",
            NtStatus::ObjectPathNotFound => "Object path not found",
            NtStatus::SharingViolation => "Sharing violation",
            NtStatus::DeletePending => "Delete pending",
            NtStatus::LogonFailure => "Logon failure",
            NtStatus::AccountRestriction => "Account restriction",
            NtStatus::PasswordExpired => "Password expired",
            NtStatus::AccountDisabled => "Account disabled",
            NtStatus::InsufficientResources => "Insufficient resources",
            NtStatus::IoTimeout => "I/O timeout",
            NtStatus::FileIsADirectory => "File is a directory",
            NtStatus::NotSupported => "Not supported",
            NtStatus::BadNetworkPath => "Bad network path",
            NtStatus::NetworkNameDeleted => "Network name deleted",
            NtStatus::NetworkAccessDenied => "Network access denied",
            NtStatus::BadNetworkName => "Bad network name",
            NtStatus::DirectoryNotEmpty => "Directory not empty",
            NtStatus::NotADirectory => "Not a directory",
            NtStatus::UserSessionDeleted => "User session deleted",
            NtStatus::HostUnreachable => "Host unreachable",
        };
        write!(f, "{} (0x{:08X})", msg, *self as u32)
    }
}

/// Caller-facing failure codes. The numeric values are stable identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    Unknown = 0,
    NotOnWiFi = 1000,
    UnableToResolveAddress = 1001,
    UnableToConnect = 1002,
    AuthenticationFailed = 1003,
    ShareConnectionFailed = 1004,
    FileNotFound = 1005,
    DirectoryDownloaded = 1006,
    UnableToMoveFile = 1007,
    UnableToCreateDirectory = 1008,
    UnableToDeleteItem = 1009,
    DirectoryUploaded = 1010,
    FailToUpload = 1011,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 13] = [
        ErrorCode::Unknown,
        ErrorCode::NotOnWiFi,
        ErrorCode::UnableToResolveAddress,
        ErrorCode::UnableToConnect,
        ErrorCode::AuthenticationFailed,
        ErrorCode::ShareConnectionFailed,
        ErrorCode::FileNotFound,
        ErrorCode::DirectoryDownloaded,
        ErrorCode::UnableToMoveFile,
        ErrorCode::UnableToCreateDirectory,
        ErrorCode::UnableToDeleteItem,
        ErrorCode::DirectoryUploaded,
        ErrorCode::FailToUpload,
    ];

    /// Numeric identity of the code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Human readable description of the failure
    pub fn localized_description(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "An unknown error occurred.",
            ErrorCode::NotOnWiFi => "The device isn't connected to a local network.",
            ErrorCode::UnableToResolveAddress => "Unable to resolve the address of the device.",
            ErrorCode::UnableToConnect => "Unable to connect to the device.",
            ErrorCode::AuthenticationFailed => {
                "The username or password was rejected and guest access is unavailable."
            }
            ErrorCode::ShareConnectionFailed => "Unable to connect to the shared folder.",
            ErrorCode::FileNotFound => "Unable to locate the requested file.",
            ErrorCode::DirectoryDownloaded => "A directory cannot be downloaded as a file.",
            ErrorCode::UnableToMoveFile => "Unable to move the file.",
            ErrorCode::UnableToCreateDirectory => "Unable to create the directory.",
            ErrorCode::UnableToDeleteItem => "Unable to delete the item.",
            ErrorCode::DirectoryUploaded => "A directory cannot be uploaded as a file.",
            ErrorCode::FailToUpload => "Unable to upload the file.",
        }
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = i32;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        ErrorCode::ALL
            .iter()
            .copied()
            .find(|code| code.code() == value)
            .ok_or(value)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.localized_description())
    }
}

/// Failure reported by every public session, share and transfer operation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct SmbError {
    code: ErrorCode,
    message: String,
    detail: Option<String>,
}

impl SmbError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.localized_description().to_string(),
            detail: None,
        }
    }

    /// Attach a diagnostic string; it never replaces the user-facing message
    pub fn with_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(code)
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl From<ErrorCode> for SmbError {
    fn from(code: ErrorCode) -> Self {
        SmbError::new(code)
    }
}

/// Build the caller-facing error for a code
pub fn error_for_code(code: ErrorCode) -> SmbError {
    SmbError::new(code)
}

//! SMB2 wire format

pub mod constants;
pub mod messages;
pub mod smb2_constants;

pub use constants::NetBiosMessageType;

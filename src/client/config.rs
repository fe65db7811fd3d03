//! Client configuration

use crate::auth::Credentials;
use crate::protocol::smb2_constants::{Smb2Dialect, MAX_IO_CHUNK};
use std::time::Duration;
use uuid::Uuid;

/// Settings shared by every exchange of a session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client GUID sent in NEGOTIATE
    pub client_guid: Uuid,
    /// Dialects offered, lowest first
    pub dialects: Vec<Smb2Dialect>,
    /// Credentials used by [`Session::open`](super::Session::open)
    pub credentials: Option<Credentials>,
    /// Fall back to the guest account when credentials are absent or rejected
    pub allow_guest: bool,
    /// Workstation name carried in NTLM messages and the NetBIOS session request
    pub workstation: String,
    /// Wrap NTLMSSP tokens in SPNEGO
    pub use_spnego: bool,
    /// Run the NetBIOS session request even when the port is not 139
    pub netbios_session: bool,
    pub connect_timeout: Duration,
    /// Stall bound for one request/response exchange
    pub io_timeout: Duration,
    /// Retries of a transient read or write failure
    pub max_retries: u32,
    /// Upper bound for one READ or WRITE; the server's limits may lower it
    pub chunk_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_guid: Uuid::new_v4(),
            dialects: vec![
                Smb2Dialect::Smb202,
                Smb2Dialect::Smb210,
                Smb2Dialect::Smb300,
                Smb2Dialect::Smb302,
            ],
            credentials: None,
            allow_guest: false,
            workstation: String::from("SMB-TRANSFER"),
            use_spnego: true,
            netbios_session: false,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
            max_retries: 3,
            chunk_size: MAX_IO_CHUNK,
        }
    }
}

impl ClientConfig {
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_guest(mut self, allow_guest: bool) -> Self {
        self.allow_guest = allow_guest;
        self
    }
}

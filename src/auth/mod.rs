//! Authentication mechanisms for SMB

pub mod ntlm;
pub mod ntlm_crypto;
pub mod spnego;

use crate::error::Result;
use std::fmt;

pub use ntlm::NtlmClient;
pub use spnego::Spnego;

/// User name the client presents when falling back to guest access
pub const GUEST_USER: &str = "Guest";

/// Produces the security blobs for a two-leg SESSION_SETUP exchange
pub trait AuthMechanism: Send {
    /// Blob for the first SESSION_SETUP request
    fn initial_token(&mut self) -> Result<Vec<u8>>;

    /// Blob answering the server's challenge
    fn challenge_response(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// User name, password and domain for NTLM
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: domain.into(),
        }
    }

    /// The guest account with an empty password
    pub fn guest() -> Self {
        Self::new(GUEST_USER, "", "")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Client mechanism for `credentials`, optionally SPNEGO wrapped
pub fn client_mechanism(
    credentials: Credentials,
    workstation: &str,
    use_spnego: bool,
) -> Box<dyn AuthMechanism> {
    let ntlm = NtlmClient::new(credentials, workstation);
    if use_spnego {
        Box::new(Spnego::new(ntlm))
    } else {
        Box::new(ntlm)
    }
}

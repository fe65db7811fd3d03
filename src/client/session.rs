//! Session negotiation: connect, dialect negotiation and authentication
//!
//! A [`Session`] moves forward through `NetBiosOk → DialectOk → SessionOk`.
//! Any fault moves it to `Error`, which is terminal: every later operation
//! fails with the stored code and never touches the network again.
//! Reconnecting means building a new session from the same [`Endpoint`].

use super::config::ClientConfig;
use super::connection::Connection;
use crate::auth::{client_mechanism, Credentials};
use crate::error::{Error, ErrorCode, NtStatus, Result, SmbError};
use crate::netbios::ns::SMB_NETBIOS_PORT;
use crate::netbios::{Endpoint, NetBiosName, ServiceType};
use crate::protocol::messages::{
    SessionFlags, Smb2Header, Smb2Logoff, Smb2NegotiateRequest, Smb2NegotiateResponse,
    Smb2SessionSetupRequest, Smb2SessionSetupResponse, Smb2TreeConnectRequest,
    Smb2TreeConnectResponse, Smb2TreeDisconnect, SmbMessage,
};
use crate::protocol::smb2_constants::{Smb2Command, Smb2Dialect};
use crate::transport::{SmbTransport, TcpTransport};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Name the server answers to when the caller only knows an address
const SMBSERVER_NAME: &str = "*SMBSERVER";

/// Where a session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport connected
    NetBiosOk,
    /// Dialect negotiated
    DialectOk,
    /// Authenticated; shares may be connected
    SessionOk,
    /// Terminal failure carrying the code every later call reports
    Error(ErrorCode),
}

impl SessionState {
    /// Forward steps and any step into `Error`; nothing leaves `Error`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Error(_), _) => false,
            (_, Error(_)) => true,
            (NetBiosOk, DialectOk) | (DialectOk, SessionOk) => true,
            _ => false,
        }
    }

    pub fn error_code(self) -> Option<ErrorCode> {
        match self {
            SessionState::Error(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::NetBiosOk => f.write_str("netbios-ok"),
            SessionState::DialectOk => f.write_str("dialect-ok"),
            SessionState::SessionOk => f.write_str("session-ok"),
            SessionState::Error(code) => write!(f, "error ({:?})", code),
        }
    }
}

/// Parameters settled by NEGOTIATE
#[derive(Debug, Clone, Copy)]
struct Negotiated {
    dialect: Smb2Dialect,
    max_read_size: u32,
    max_write_size: u32,
}

/// State guarded by the per-session request lock
struct Inner {
    connection: Option<Connection>,
    trees: HashSet<u32>,
    credentials: Option<Credentials>,
}

struct Shared {
    endpoint: Endpoint,
    config: ClientConfig,
    state: watch::Sender<SessionState>,
    negotiated: OnceLock<Negotiated>,
    is_guest: AtomicBool,
    inner: Mutex<Inner>,
}

/// One connection to a file server. Clones share the same connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Open the transport to `endpoint`. The new session is `NetBiosOk`.
    pub async fn connect(endpoint: Endpoint, config: ClientConfig) -> std::result::Result<Self, SmbError> {
        match open_transport(&endpoint, &config).await {
            Ok(transport) => {
                info!("Connected to {}", endpoint);
                Ok(Self::with_transport(endpoint, config, transport))
            }
            Err(e) => {
                let code = match e.error_code(ErrorCode::UnableToConnect) {
                    ErrorCode::NotOnWiFi => ErrorCode::NotOnWiFi,
                    _ => ErrorCode::UnableToConnect,
                };
                warn!("Connection to {} failed: {}", endpoint, e);
                Err(SmbError::with_detail(code, e.to_string()))
            }
        }
    }

    /// Session over an already connected transport
    pub fn with_transport(
        endpoint: Endpoint,
        config: ClientConfig,
        transport: Box<dyn SmbTransport>,
    ) -> Self {
        let connection = Connection::new(transport, config.io_timeout);
        let (state, _) = watch::channel(SessionState::NetBiosOk);
        Self {
            shared: Arc::new(Shared {
                endpoint,
                config,
                state,
                negotiated: OnceLock::new(),
                is_guest: AtomicBool::new(false),
                inner: Mutex::new(Inner {
                    connection: Some(connection),
                    trees: HashSet::new(),
                    credentials: None,
                }),
            }),
        }
    }

    /// Connect, negotiate and authenticate with the configured credentials
    pub async fn open(endpoint: Endpoint, config: ClientConfig) -> std::result::Result<Self, SmbError> {
        let credentials = config.credentials.clone();
        let session = Self::connect(endpoint, config).await?;
        session.negotiate_dialect().await?;
        session.authenticate(credentials).await?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn dialect(&self) -> Option<Smb2Dialect> {
        self.shared.negotiated.get().map(|n| n.dialect)
    }

    /// Whether the server admitted this session as a guest
    pub fn is_guest(&self) -> bool {
        self.shared.is_guest.load(Ordering::Acquire)
    }

    /// Credentials the session authenticated with
    pub async fn credentials(&self) -> Option<Credentials> {
        self.shared.inner.lock().await.credentials.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.inner.lock().await.connection.is_some()
    }

    /// Wire requests sent on this session so far
    pub async fn exchanges(&self) -> u64 {
        let inner = self.shared.inner.lock().await;
        inner.connection.as_ref().map(Connection::exchanges).unwrap_or(0)
    }

    /// Largest READ this session issues
    pub fn max_read_size(&self) -> u32 {
        let negotiated = self.shared.negotiated.get().map(|n| n.max_read_size);
        clamp_chunk(self.shared.config.chunk_size, negotiated)
    }

    /// Largest WRITE this session issues
    pub fn max_write_size(&self) -> u32 {
        let negotiated = self.shared.negotiated.get().map(|n| n.max_write_size);
        clamp_chunk(self.shared.config.chunk_size, negotiated)
    }

    /// SMB2 NEGOTIATE. `NetBiosOk → DialectOk`; any fault is terminal.
    pub async fn negotiate_dialect(&self) -> std::result::Result<Smb2Dialect, SmbError> {
        let mut inner = self.shared.inner.lock().await;
        self.expect_state(SessionState::NetBiosOk, ErrorCode::UnableToConnect)?;
        let connection = self.live_connection(&mut inner)?;

        let offered = self.shared.config.dialects.clone();
        let request = Smb2NegotiateRequest::new(offered.clone(), self.shared.config.client_guid);
        let result = connection
            .exchange::<_, Smb2NegotiateResponse>(Smb2Command::Negotiate, 0, &request)
            .await
            .and_then(|(_, response)| {
                if offered.contains(&response.dialect_revision) {
                    Ok(response)
                } else {
                    Err(Error::UnsupportedProtocol(format!(
                        "Server chose {} which was not offered",
                        response.dialect_revision
                    )))
                }
            });

        match result {
            Ok(response) => {
                let negotiated = Negotiated {
                    dialect: response.dialect_revision,
                    max_read_size: response.max_read_size,
                    max_write_size: response.max_write_size,
                };
                let _ = self.shared.negotiated.set(negotiated);
                self.advance(SessionState::DialectOk);
                info!("Negotiated {}", negotiated.dialect);
                Ok(negotiated.dialect)
            }
            Err(e) => Err(self.fail(&mut inner, ErrorCode::UnableToConnect, e).await),
        }
    }

    /// NTLMv2 SESSION_SETUP. `DialectOk → SessionOk`, with one guest attempt
    /// when the credentials are absent or rejected and guest access is
    /// allowed. Rejected credentials are never retried.
    pub async fn authenticate(
        &self,
        credentials: Option<Credentials>,
    ) -> std::result::Result<(), SmbError> {
        let mut inner = self.shared.inner.lock().await;
        self.expect_state(SessionState::DialectOk, ErrorCode::AuthenticationFailed)?;
        let allow_guest = self.shared.config.allow_guest;

        if credentials.is_none() && !allow_guest {
            let e = Error::AuthenticationFailed("no credentials and guest access is disabled".into());
            return Err(self.fail(&mut inner, ErrorCode::AuthenticationFailed, e).await);
        }

        let mut rejection = None;
        if let Some(credentials) = credentials {
            let connection = self.live_connection(&mut inner)?;
            match self.session_setup(connection, credentials.clone()).await {
                Ok(flags) => {
                    let guest = flags.contains(SessionFlags::IS_GUEST);
                    return Ok(self.established(&mut inner, credentials, guest));
                }
                Err(e) if e.is_transport_fault() => {
                    return Err(self.fail(&mut inner, ErrorCode::UnableToConnect, e).await);
                }
                Err(e) => {
                    debug!("Credentials for {} rejected: {}", credentials.username, e);
                    rejection = Some(e);
                }
            }
        }

        if allow_guest {
            let connection = self.live_connection(&mut inner)?;
            connection.set_session_id(0);
            match self.session_setup(connection, Credentials::guest()).await {
                Ok(_) => return Ok(self.established(&mut inner, Credentials::guest(), true)),
                Err(e) if e.is_transport_fault() => {
                    return Err(self.fail(&mut inner, ErrorCode::UnableToConnect, e).await);
                }
                Err(e) => {
                    debug!("Guest access refused: {}", e);
                    rejection = Some(e);
                }
            }
        }

        let e = rejection
            .unwrap_or_else(|| Error::AuthenticationFailed("credentials rejected".into()));
        Err(self.fail(&mut inner, ErrorCode::AuthenticationFailed, e).await)
    }

    async fn session_setup(
        &self,
        connection: &mut Connection,
        credentials: Credentials,
    ) -> Result<SessionFlags> {
        let config = &self.shared.config;
        let mut mechanism = client_mechanism(credentials, &config.workstation, config.use_spnego);

        let request = Smb2SessionSetupRequest::new(mechanism.initial_token()?);
        let (header, response) = connection
            .exchange::<_, Smb2SessionSetupResponse>(Smb2Command::SessionSetup, 0, &request)
            .await?;
        connection.set_session_id(header.session_id);
        if header.nt_status().is_success() {
            return Ok(response.session_flags);
        }

        let request = Smb2SessionSetupRequest::new(mechanism.challenge_response(&response.security_blob)?);
        let (header, response) = connection
            .exchange::<_, Smb2SessionSetupResponse>(Smb2Command::SessionSetup, 0, &request)
            .await?;
        if header.nt_status() != NtStatus::Success {
            return Err(Error::AuthenticationError(format!(
                "Session setup did not complete: {}",
                header.nt_status()
            )));
        }
        Ok(response.session_flags)
    }

    fn established(&self, inner: &mut Inner, credentials: Credentials, guest: bool) {
        self.shared.is_guest.store(guest, Ordering::Release);
        info!(
            "Session established as {}{}",
            credentials.username,
            if guest { " (guest)" } else { "" }
        );
        inner.credentials = Some(credentials);
        self.advance(SessionState::SessionOk);
    }

    /// LOGOFF and close. Idempotent; the session cannot be used afterwards.
    pub async fn disconnect(&self) {
        let mut inner = self.shared.inner.lock().await;
        let Some(mut connection) = inner.connection.take() else {
            return;
        };

        if self.state() == SessionState::SessionOk {
            for tree_id in inner.trees.drain() {
                let _ = connection
                    .exchange::<_, Smb2TreeDisconnect>(Smb2Command::TreeDisconnect, tree_id, &Smb2TreeDisconnect)
                    .await;
            }
            if let Err(e) = connection
                .exchange::<_, Smb2Logoff>(Smb2Command::Logoff, 0, &Smb2Logoff)
                .await
            {
                debug!("Logoff failed: {}", e);
            }
        }
        inner.trees.clear();
        let _ = connection.close().await;
        info!("Disconnected from {}", self.shared.endpoint);
    }

    /// TREE_CONNECT to `\\host\share`
    pub(crate) async fn tree_connect(&self, share: &str) -> Result<u32> {
        let mut inner = self.shared.inner.lock().await;
        self.usable()?;
        let path = format!("\\\\{}\\{}", self.shared.endpoint.host_name(), share);
        let request = Smb2TreeConnectRequest::new(path);
        let (header, _) = self
            .exchange_locked::<_, Smb2TreeConnectResponse>(&mut inner, Smb2Command::TreeConnect, 0, &request)
            .await?;
        inner.trees.insert(header.tree_id);
        Ok(header.tree_id)
    }

    /// TREE_DISCONNECT; a tree that is already gone is not an error
    pub(crate) async fn tree_disconnect(&self, tree_id: u32) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        if !inner.trees.remove(&tree_id) || self.usable().is_err() {
            return Ok(());
        }
        self.exchange_locked::<_, Smb2TreeDisconnect>(&mut inner, Smb2Command::TreeDisconnect, tree_id, &Smb2TreeDisconnect)
            .await?;
        Ok(())
    }

    pub(crate) async fn is_tree_connected(&self, tree_id: u32) -> bool {
        let inner = self.shared.inner.lock().await;
        self.usable().is_ok() && inner.trees.contains(&tree_id)
    }

    /// One exchange on a connected tree, holding the request lock
    pub(crate) async fn request<Req, Resp>(
        &self,
        command: Smb2Command,
        tree_id: u32,
        request: &Req,
    ) -> Result<(Smb2Header, Resp)>
    where
        Req: SmbMessage,
        Resp: SmbMessage,
    {
        let mut inner = self.shared.inner.lock().await;
        self.usable()?;
        if !inner.trees.contains(&tree_id) {
            return Err(SmbError::with_detail(
                ErrorCode::ShareConnectionFailed,
                format!("tree {} is not connected", tree_id),
            )
            .into());
        }
        self.exchange_locked(&mut inner, command, tree_id, request).await
    }

    async fn exchange_locked<Req, Resp>(
        &self,
        inner: &mut Inner,
        command: Smb2Command,
        tree_id: u32,
        request: &Req,
    ) -> Result<(Smb2Header, Resp)>
    where
        Req: SmbMessage,
        Resp: SmbMessage,
    {
        let connection = self.live_connection(inner)?;
        match connection.exchange(command, tree_id, request).await {
            Err(e) if e.is_transport_fault() => {
                Err(self.fail(inner, ErrorCode::UnableToConnect, e).await.into())
            }
            other => other,
        }
    }

    /// Fails with the stored code in `Error`, and when not yet authenticated
    fn usable(&self) -> std::result::Result<(), SmbError> {
        match self.state() {
            SessionState::SessionOk => Ok(()),
            SessionState::Error(code) => Err(SmbError::new(code)),
            other => Err(SmbError::with_detail(
                ErrorCode::ShareConnectionFailed,
                format!("session is {}", other),
            )),
        }
    }

    fn expect_state(
        &self,
        expected: SessionState,
        fallback: ErrorCode,
    ) -> std::result::Result<(), SmbError> {
        match self.state() {
            SessionState::Error(code) => Err(SmbError::new(code)),
            current if current == expected => Ok(()),
            current => Err(Error::InvalidStateTransition(format!(
                "session is {}, expected {}",
                current, expected
            ))
            .into_smb_error(fallback)),
        }
    }

    fn live_connection<'a>(
        &self,
        inner: &'a mut Inner,
    ) -> std::result::Result<&'a mut Connection, SmbError> {
        inner.connection.as_mut().ok_or_else(|| {
            SmbError::with_detail(ErrorCode::UnableToConnect, "session is disconnected")
        })
    }

    fn advance(&self, next: SessionState) -> bool {
        self.shared.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                debug!("Session {} -> {}", state, next);
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Enter `Error(code)`, drop the connection and every tree
    async fn fail(&self, inner: &mut Inner, code: ErrorCode, cause: Error) -> SmbError {
        warn!("Session with {} failed: {}", self.shared.endpoint, cause);
        self.advance(SessionState::Error(code));
        inner.trees.clear();
        if let Some(mut connection) = inner.connection.take() {
            let _ = connection.close().await;
        }
        SmbError::with_detail(code, cause.to_string())
    }
}

fn clamp_chunk(configured: u32, negotiated: Option<u32>) -> u32 {
    match negotiated {
        Some(limit) if limit > 0 => configured.min(limit).max(1),
        _ => configured.max(1),
    }
}

async fn open_transport(endpoint: &Endpoint, config: &ClientConfig) -> Result<Box<dyn SmbTransport>> {
    let addr = endpoint.addr();
    let mut transport =
        TcpTransport::new().with_timeouts(Some(config.connect_timeout), Some(config.io_timeout));

    if addr.port() == SMB_NETBIOS_PORT || config.netbios_session {
        let called = match endpoint.host_name().parse::<IpAddr>() {
            Ok(_) => NetBiosName::new(SMBSERVER_NAME, ServiceType::FileServer.wire_code())?,
            Err(_) => NetBiosName::new(endpoint.host_name(), ServiceType::FileServer.wire_code())
                .or_else(|_| NetBiosName::new(SMBSERVER_NAME, ServiceType::FileServer.wire_code()))?,
        };
        let calling = NetBiosName::new(&config.workstation, ServiceType::Workstation.wire_code())
            .or_else(|_| NetBiosName::new("SMB-TRANSFER", ServiceType::Workstation.wire_code()))?;
        transport.connect_with_netbios(addr, &called, &calling).await?;
    } else {
        transport.connect(addr).await?;
    }
    Ok(Box::new(transport))
}

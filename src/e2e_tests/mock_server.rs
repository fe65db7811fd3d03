//! In-process SMB2 file server and NetBIOS name responder
//!
//! The server speaks just enough SMB2 over loopback TCP for the client to run
//! real sessions: NEGOTIATE, NTLMv2 SESSION_SETUP (raw or SPNEGO), trees,
//! CREATE/CLOSE, READ/WRITE, QUERY_DIRECTORY, QUERY_INFO and SET_INFO on an
//! in-memory file system. Faults can be injected per command.

use super::ntlm_server::{NtlmServer, NtlmVerdict};
use crate::auth::spnego::{extract_ntlmssp, server_neg_token_resp, NegState};
use crate::error::{NtStatus, Result};
use crate::netbios::ns::{NodeStatusEntry, NsPacket};
use crate::netbios::NetBiosName;
use crate::protocol::messages::file_info::datetime_to_filetime;
use crate::protocol::messages::*;
use crate::protocol::smb2_constants::{
    query_directory_flags, CreateAction, CreateDisposition, CreateOptions, FileAttributes,
    Smb2Command, Smb2Dialect,
};
use crate::netbios::NetBiosMessage;
use crate::protocol::NetBiosMessageType;
use crate::transport::tcp::TcpTransport;
use crate::transport::SmbTransport;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

pub const SERVER_NAME: &str = "FILESERVER01";

/// One file system object
#[derive(Debug, Clone)]
pub enum Node {
    File { data: Vec<u8>, modified: u64 },
    Directory { modified: u64 },
}

impl Node {
    fn is_directory(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    fn size(&self) -> u64 {
        match self {
            Node::File { data, .. } => data.len() as u64,
            Node::Directory { .. } => 0,
        }
    }

    fn modified(&self) -> u64 {
        match self {
            Node::File { modified, .. } | Node::Directory { modified } => *modified,
        }
    }
}

/// In-memory tree keyed by backslash separated share-relative path.
/// The root is the empty path.
#[derive(Debug)]
pub struct MockFs {
    nodes: BTreeMap<String, Node>,
}

fn now_filetime() -> u64 {
    datetime_to_filetime(chrono::Utc::now())
}

fn key(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\\")
}

fn parent(path: &str) -> &str {
    path.rsplit_once('\\').map(|(dir, _)| dir).unwrap_or("")
}

impl Default for MockFs {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), Node::Directory { modified: now_filetime() });
        Self { nodes }
    }
}

impl MockFs {
    pub fn add_dir(&mut self, path: &str) {
        let path = key(path);
        let mut current = String::new();
        for part in path.split('\\').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('\\');
            }
            current.push_str(part);
            self.nodes
                .entry(current.clone())
                .or_insert(Node::Directory { modified: now_filetime() });
        }
    }

    pub fn add_file(&mut self, path: &str, data: Vec<u8>) {
        let path = key(path);
        self.add_dir(parent(&path));
        self.nodes.insert(
            path,
            Node::File {
                data,
                modified: now_filetime(),
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<&Node> {
        self.nodes.get(&key(path))
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        match self.get(path)? {
            Node::File { data, .. } => Some(data),
            Node::Directory { .. } => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(&key(path))
    }

    fn children(&self, dir: &str) -> Vec<(String, Node)> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}\\", dir)
        };
        self.nodes
            .iter()
            .filter(|(path, _)| !path.is_empty() && path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('\\'))
            .map(|(path, node)| (path[prefix.len()..].to_string(), node.clone()))
            .collect()
    }

    fn rename(&mut self, from: &str, to: &str) {
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|path| *path == from || path.starts_with(&format!("{}\\", from)))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = self.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                self.nodes.insert(new, node);
            }
        }
    }
}

/// Faults applied to upcoming requests
#[derive(Debug, Default)]
pub struct Faults {
    /// Never answer this command
    pub stall_on: Option<Smb2Command>,
    /// Fail the next matching requests with the given status
    pub fail_next: VecDeque<(Smb2Command, NtStatus)>,
    /// Delay before each READ response
    pub read_delay: Duration,
    /// Delay before each WRITE response
    pub write_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct MockServerConfig {
    pub users: HashMap<String, String>,
    pub allow_guest: bool,
    pub shares: Vec<String>,
    pub dialect: Smb2Dialect,
    pub max_io_size: u32,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            users: HashMap::from([("alice".to_string(), "s3cret".to_string())]),
            allow_guest: false,
            shares: vec!["public".to_string()],
            dialect: Smb2Dialect::Smb302,
            max_io_size: 64 * 1024,
        }
    }
}

/// State shared by every connection of one server
#[derive(Debug, Default)]
pub struct ServerState {
    pub config: MockServerConfig,
    pub fs: Mutex<MockFs>,
    pub faults: Mutex<Faults>,
    pub requests: AtomicU64,
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub connections: AtomicU64,
}

impl ServerState {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

/// A listening mock server
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ServerState {
            config,
            ..ServerState::default()
        });

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                debug!("Mock server accepted {}", peer);
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let mut connection = ServerConnection::new(state);
                    if let Err(e) = connection.serve(TcpTransport::from_stream(stream)).await {
                        trace!("Mock connection ended: {}", e);
                    }
                });
            }
        });

        Ok(Self { addr, state, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn fs(&self) -> std::sync::MutexGuard<'_, MockFs> {
        self.state.fs.lock().unwrap()
    }

    pub fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.state.faults.lock().unwrap()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug)]
struct Open {
    path: String,
    listed: bool,
    delete_pending: bool,
}

type Reply = std::result::Result<Vec<u8>, NtStatus>;

struct ServerConnection {
    state: Arc<ServerState>,
    session_id: u64,
    ntlm: Option<NtlmServer>,
    authenticated: bool,
    trees: HashMap<u32, String>,
    opens: HashMap<u64, Open>,
    connected_tree: Option<u32>,
    next_id: u64,
}

impl ServerConnection {
    fn new(state: Arc<ServerState>) -> Self {
        Self {
            state,
            session_id: 0,
            ntlm: None,
            authenticated: false,
            trees: HashMap::new(),
            opens: HashMap::new(),
            connected_tree: None,
            next_id: 1,
        }
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn serve(&mut self, mut transport: TcpTransport) -> Result<()> {
        loop {
            let packet = transport.receive_packet().await?;
            match packet.header.message_type {
                NetBiosMessageType::SessionRequest => {
                    transport.send_packet(&NetBiosMessage::positive_response()?).await?;
                    continue;
                }
                NetBiosMessageType::SessionMessage => {}
                _ => continue,
            }

            self.state.requests.fetch_add(1, Ordering::SeqCst);
            let (request, body) = decode_message(&packet.payload)?;
            trace!("Mock server <- {:?} mid={}", request.command, request.message_id);

            let (stall, injected) = {
                let mut faults = self.state.faults.lock().unwrap();
                let stall = faults.stall_on == Some(request.command);
                let injected = match faults.fail_next.front() {
                    Some((command, status)) if *command == request.command => {
                        let status = *status;
                        faults.fail_next.pop_front();
                        Some(status)
                    }
                    _ => None,
                };
                (stall, injected)
            };
            if stall {
                continue;
            }

            let (status, reply) = match injected {
                Some(status) => (status, None),
                None => self.dispatch(&request, body).await,
            };
            let mut header = Smb2Header::response_to(&request, status);
            header.session_id = self.session_id;
            if let Some(tree_id) = self.connected_tree.take() {
                header.tree_id = tree_id;
            }
            let bytes = match reply {
                Some(body) if status == NtStatus::Success || status == NtStatus::MoreProcessingRequired => {
                    let mut bytes = header.serialize()?;
                    bytes.extend_from_slice(&body);
                    bytes
                }
                _ => encode_message(&header, &Smb2ErrorResponse::default())?,
            };
            transport.send_message(&bytes).await?;
        }
    }

    async fn dispatch(&mut self, request: &Smb2Header, body: &[u8]) -> (NtStatus, Option<Vec<u8>>) {
        let result = match request.command {
            Smb2Command::Negotiate => self.negotiate(body),
            Smb2Command::SessionSetup => return self.session_setup(body),
            command if !self.authenticated => {
                debug!("Mock server refusing {:?} before authentication", command);
                Err(NtStatus::AccessDenied)
            }
            Smb2Command::Logoff => {
                self.authenticated = false;
                Smb2Logoff.serialize().map_err(internal)
            }
            Smb2Command::TreeConnect => self.tree_connect(body),
            Smb2Command::TreeDisconnect => {
                self.trees.remove(&request.tree_id);
                Smb2TreeDisconnect.serialize().map_err(internal)
            }
            command if !self.trees.contains_key(&request.tree_id) => {
                debug!("Mock server refusing {:?} on unknown tree", command);
                Err(NtStatus::NetworkNameDeleted)
            }
            Smb2Command::Create => self.create(body),
            Smb2Command::Close => self.close(body),
            Smb2Command::Read => {
                let delay = self.state.faults.lock().unwrap().read_delay;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.read(body)
            }
            Smb2Command::Write => {
                let delay = self.state.faults.lock().unwrap().write_delay;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.write(body)
            }
            Smb2Command::QueryDirectory => self.query_directory(body),
            Smb2Command::QueryInfo => self.query_info(body),
            Smb2Command::SetInfo => self.set_info(body),
            _ => Err(NtStatus::NotSupported),
        };
        match result {
            Ok(reply) => (NtStatus::Success, Some(reply)),
            Err(status) => (status, None),
        }
    }

    fn negotiate(&mut self, body: &[u8]) -> Reply {
        let request = Smb2NegotiateRequest::parse(body).map_err(internal)?;
        let dialect = self.state.config.dialect;
        if !request.dialects.contains(&dialect) {
            return Err(NtStatus::NotSupported);
        }
        let mut response = Smb2NegotiateResponse::new(dialect);
        response.max_read_size = self.state.config.max_io_size;
        response.max_write_size = self.state.config.max_io_size;
        response.serialize().map_err(internal)
    }

    fn session_setup(&mut self, body: &[u8]) -> (NtStatus, Option<Vec<u8>>) {
        let request = match Smb2SessionSetupRequest::parse(body) {
            Ok(request) => request,
            Err(_) => return (NtStatus::InvalidParameter, None),
        };
        let blob = &request.security_blob;
        let wrapped = !blob.starts_with(b"NTLMSSP\0");
        let Some(token) = extract_ntlmssp(blob) else {
            return (NtStatus::InvalidParameter, None);
        };
        let message_type = token.get(8).copied().unwrap_or(0);

        match message_type {
            1 => {
                let mut ntlm = NtlmServer::new(SERVER_NAME);
                let challenge = match ntlm.create_challenge_message(token) {
                    Ok(challenge) => challenge,
                    Err(_) => return (NtStatus::InvalidParameter, None),
                };
                self.ntlm = Some(ntlm);
                self.session_id = self.allocate() << 32 | 0x0001;
                let blob = if wrapped {
                    server_neg_token_resp(NegState::AcceptIncomplete, Some(&challenge))
                } else {
                    challenge
                };
                match Smb2SessionSetupResponse::new(SessionFlags::empty(), blob).serialize() {
                    Ok(bytes) => (NtStatus::MoreProcessingRequired, Some(bytes)),
                    Err(_) => (NtStatus::Unsuccessful, None),
                }
            }
            3 => {
                let Some(ntlm) = self.ntlm.take() else {
                    return (NtStatus::InvalidParameter, None);
                };
                let config = &self.state.config;
                let verdict = ntlm.verify_authenticate_message(token, |user| {
                    if config.allow_guest && user.eq_ignore_ascii_case("guest") {
                        return Some(String::new());
                    }
                    config.users.get(user).cloned()
                });
                let flags = match verdict {
                    Ok(NtlmVerdict::Authenticated { user, .. }) if user.eq_ignore_ascii_case("guest") => {
                        SessionFlags::IS_GUEST
                    }
                    Ok(NtlmVerdict::Authenticated { .. }) => SessionFlags::empty(),
                    Ok(NtlmVerdict::Anonymous) if config.allow_guest => SessionFlags::IS_GUEST,
                    _ => return (NtStatus::LogonFailure, None),
                };
                self.authenticated = true;
                let blob = if wrapped {
                    server_neg_token_resp(NegState::AcceptCompleted, None)
                } else {
                    Vec::new()
                };
                match Smb2SessionSetupResponse::new(flags, blob).serialize() {
                    Ok(bytes) => (NtStatus::Success, Some(bytes)),
                    Err(_) => (NtStatus::Unsuccessful, None),
                }
            }
            _ => (NtStatus::InvalidParameter, None),
        }
    }

    fn tree_connect(&mut self, body: &[u8]) -> Reply {
        let request = Smb2TreeConnectRequest::parse(body).map_err(internal)?;
        let share = request.share_name().ok_or(NtStatus::BadNetworkName)?;
        if !self
            .state
            .config
            .shares
            .iter()
            .any(|s| s.eq_ignore_ascii_case(share))
        {
            return Err(NtStatus::BadNetworkName);
        }
        let tree_id = self.allocate() as u32;
        self.trees.insert(tree_id, share.to_string());
        // The new id travels in the response header
        self.connected_tree = Some(tree_id);
        Smb2TreeConnectResponse::new(ShareType::Disk)
            .serialize()
            .map_err(internal)
    }

    fn create(&mut self, body: &[u8]) -> Reply {
        let request = Smb2CreateRequest::parse(body).map_err(internal)?;
        let path = key(&request.file_name);
        let wants_dir = request.create_options.contains(CreateOptions::FILE_DIRECTORY_FILE);
        let wants_file = request.create_options.contains(CreateOptions::FILE_NON_DIRECTORY_FILE);

        let mut fs = self.state.fs.lock().unwrap();
        let existing = fs.get(&path).cloned();
        let action = match (request.create_disposition, existing) {
            (CreateDisposition::Create, Some(_)) => return Err(NtStatus::ObjectNameCollision),
            (CreateDisposition::Open | CreateDisposition::Overwrite, None) => {
                return Err(missing(&fs, &path))
            }
            (_, Some(node)) => {
                if wants_dir && !node.is_directory() {
                    return Err(NtStatus::NotADirectory);
                }
                if wants_file && node.is_directory() {
                    return Err(NtStatus::FileIsADirectory);
                }
                match (request.create_disposition, node) {
                    (
                        CreateDisposition::OverwriteIf
                        | CreateDisposition::Overwrite
                        | CreateDisposition::Supersede,
                        Node::File { .. },
                    ) => {
                        fs.add_file(&path, Vec::new());
                        CreateAction::Overwritten
                    }
                    _ => CreateAction::Opened,
                }
            }
            (_, None) => {
                if !fs.get(parent(&path)).is_some_and(Node::is_directory) {
                    return Err(NtStatus::ObjectPathNotFound);
                }
                if wants_dir {
                    fs.add_dir(&path);
                } else {
                    fs.add_file(&path, Vec::new());
                }
                CreateAction::Created
            }
        };

        let node = fs.get(&path).cloned().ok_or(NtStatus::Unsuccessful)?;
        drop(fs);

        let volatile = self.allocate();
        self.opens.insert(
            volatile,
            Open {
                path,
                listed: false,
                delete_pending: false,
            },
        );

        let mut response = Smb2CreateResponse::new(FileId::with_values(volatile, volatile));
        response.create_action = action;
        response.end_of_file = node.size();
        response.allocation_size = node.size();
        response.last_write_time = node.modified();
        response.file_attributes = if node.is_directory() {
            FileAttributes::DIRECTORY
        } else {
            FileAttributes::ARCHIVE
        };
        response.serialize().map_err(internal)
    }

    fn open(&self, file_id: FileId) -> std::result::Result<&Open, NtStatus> {
        self.opens.get(&file_id.volatile).ok_or(NtStatus::InvalidHandle)
    }

    fn close(&mut self, body: &[u8]) -> Reply {
        let request = Smb2CloseRequest::parse(body).map_err(internal)?;
        let open = self
            .opens
            .remove(&request.file_id.volatile)
            .ok_or(NtStatus::InvalidHandle)?;
        if open.delete_pending {
            self.state.fs.lock().unwrap().nodes.remove(&open.path);
        }
        Smb2CloseResponse::default().serialize().map_err(internal)
    }

    fn read(&mut self, body: &[u8]) -> Reply {
        let request = Smb2ReadRequest::parse(body).map_err(internal)?;
        let path = self.open(request.file_id)?.path.clone();
        self.state.reads.fetch_add(1, Ordering::SeqCst);

        let fs = self.state.fs.lock().unwrap();
        let data = match fs.get(&path) {
            Some(Node::File { data, .. }) => data,
            Some(Node::Directory { .. }) => return Err(NtStatus::FileIsADirectory),
            None => return Err(NtStatus::ObjectNameNotFound),
        };
        let start = request.offset as usize;
        if start >= data.len() {
            return Err(NtStatus::EndOfFile);
        }
        let length = request.length.min(self.state.config.max_io_size) as usize;
        let end = (start + length).min(data.len());
        Smb2ReadResponse::new(data[start..end].to_vec())
            .serialize()
            .map_err(internal)
    }

    fn write(&mut self, body: &[u8]) -> Reply {
        let request = Smb2WriteRequest::parse(body).map_err(internal)?;
        let path = self.open(request.file_id)?.path.clone();
        self.state.writes.fetch_add(1, Ordering::SeqCst);

        let mut fs = self.state.fs.lock().unwrap();
        match fs.nodes.get_mut(&path) {
            Some(Node::File { data, modified }) => {
                let start = request.offset as usize;
                let end = start + request.data.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(&request.data);
                *modified = now_filetime();
            }
            Some(Node::Directory { .. }) => return Err(NtStatus::FileIsADirectory),
            None => return Err(NtStatus::ObjectNameNotFound),
        }
        Smb2WriteResponse::new(request.data.len() as u32)
            .serialize()
            .map_err(internal)
    }

    fn query_directory(&mut self, body: &[u8]) -> Reply {
        let request = Smb2QueryDirectoryRequest::parse(body).map_err(internal)?;
        let restart = request.flags & query_directory_flags::RESTART_SCANS != 0;
        let open = self
            .opens
            .get_mut(&request.file_id.volatile)
            .ok_or(NtStatus::InvalidHandle)?;
        if open.listed && !restart {
            return Err(NtStatus::NoMoreFiles);
        }
        open.listed = true;
        let path = open.path.clone();

        let fs = self.state.fs.lock().unwrap();
        let dir = fs.get(&path).ok_or(NtStatus::ObjectNameNotFound)?;
        if !dir.is_directory() {
            return Err(NtStatus::NotADirectory);
        }
        let mut entries = vec![
            FileDirectoryInfo::new(".", true, 0, dir.modified()),
            FileDirectoryInfo::new("..", true, 0, dir.modified()),
        ];
        entries.extend(
            fs.children(&path)
                .into_iter()
                .map(|(name, node)| FileDirectoryInfo::new(name, node.is_directory(), node.size(), node.modified())),
        );
        let listing = build_directory_listing(&entries).map_err(internal)?;
        Smb2QueryDirectoryResponse::new(listing)
            .serialize()
            .map_err(internal)
    }

    fn query_info(&mut self, body: &[u8]) -> Reply {
        let request = Smb2QueryInfoRequest::parse(body).map_err(internal)?;
        if request.file_info_class != FileInfoClass::StandardInformation {
            return Err(NtStatus::NotSupported);
        }
        let path = self.open(request.file_id)?.path.clone();
        let fs = self.state.fs.lock().unwrap();
        let node = fs.get(&path).ok_or(NtStatus::ObjectNameNotFound)?;
        let info = FileStandardInfo {
            allocation_size: node.size(),
            end_of_file: node.size(),
            number_of_links: 1,
            delete_pending: false,
            directory: node.is_directory(),
        };
        let buffer = info.serialize().map_err(internal)?;
        Smb2QueryInfoResponse::new(buffer).serialize().map_err(internal)
    }

    fn set_info(&mut self, body: &[u8]) -> Reply {
        let request = Smb2SetInfoRequest::parse(body).map_err(internal)?;
        let path = self.open(request.file_id)?.path.clone();

        match request.file_info_class {
            FileInfoClass::DispositionInformation => {
                let info = FileDispositionInfo::parse(&request.buffer).map_err(internal)?;
                let fs = self.state.fs.lock().unwrap();
                let node = fs.get(&path).ok_or(NtStatus::ObjectNameNotFound)?;
                if node.is_directory() && !fs.children(&path).is_empty() {
                    return Err(NtStatus::DirectoryNotEmpty);
                }
                drop(fs);
                if let Some(open) = self.opens.get_mut(&request.file_id.volatile) {
                    open.delete_pending = info.delete_pending;
                }
            }
            FileInfoClass::RenameInformation => {
                let info = FileRenameInfo::parse(&request.buffer).map_err(internal)?;
                let target = key(&info.file_name);
                let mut fs = self.state.fs.lock().unwrap();
                if fs.exists(&target) && !info.replace_if_exists {
                    return Err(NtStatus::ObjectNameCollision);
                }
                if !fs.get(parent(&target)).is_some_and(Node::is_directory) {
                    return Err(NtStatus::ObjectPathNotFound);
                }
                fs.rename(&path, &target);
                drop(fs);
                if let Some(open) = self.opens.get_mut(&request.file_id.volatile) {
                    open.path = target;
                }
            }
            FileInfoClass::EndOfFileInformation => {
                let size = request
                    .buffer
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .map(u64::from_le_bytes)
                    .ok_or(NtStatus::InvalidParameter)?;
                let mut fs = self.state.fs.lock().unwrap();
                match fs.nodes.get_mut(&path) {
                    Some(Node::File { data, .. }) => data.resize(size as usize, 0),
                    _ => return Err(NtStatus::InvalidParameter),
                }
            }
            _ => return Err(NtStatus::NotSupported),
        }
        Smb2SetInfoResponse.serialize().map_err(internal)
    }
}

fn internal<E: std::fmt::Display>(e: E) -> NtStatus {
    debug!("Mock server could not handle a request: {}", e);
    NtStatus::InvalidParameter
}

fn missing(fs: &MockFs, path: &str) -> NtStatus {
    if fs.get(parent(path)).is_some_and(Node::is_directory) {
        NtStatus::ObjectNameNotFound
    } else {
        NtStatus::ObjectPathNotFound
    }
}

/// Answers name queries for one host and node status queries with its names
pub struct NameResponder {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl NameResponder {
    pub async fn start(host: &str, address: Ipv4Addr) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let host = host.to_ascii_uppercase();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let Ok(query) = NsPacket::parse(&buf[..n]) else {
                    continue;
                };
                let Some(question) = query.questions.first() else {
                    continue;
                };
                let reply = if question.name == NetBiosName::wildcard() {
                    let entries: Vec<NodeStatusEntry> = [(0x00, false), (0x20, false), (0x00, true)]
                        .into_iter()
                        .filter_map(|(suffix, group)| {
                            let name = if group { "WORKGROUP" } else { host.as_str() };
                            NetBiosName::new(name, suffix)
                                .ok()
                                .map(|name| NodeStatusEntry { name, group })
                        })
                        .collect();
                    NsPacket::node_status_response(query.transaction_id, &entries)
                } else if question.name.name() == host {
                    NsPacket::name_query_response(query.transaction_id, question.name.clone(), &[address])
                } else {
                    NsPacket::negative_response(query.transaction_id, 3)
                };
                if let Ok(bytes) = reply.serialize() {
                    let _ = socket.send_to(&bytes, from).await;
                }
            }
        });

        Ok(Self { addr, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for NameResponder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

//! NetBIOS Name Service client (RFC 1002 §4.2)
//!
//! Names are resolved with a name query for the file-server suffix, sent
//! either to a configured name server or broadcast on the local segment.
//! Address literals are classified with a node status (NBSTAT) query.

use crate::error::{Error, ErrorCode, Result, SmbError};
use crate::netbios::name::{NetBiosName, ServiceType, NETBIOS_ENCODED_NAME_LEN, NETBIOS_NAME_LEN};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Well-known name service port
pub const NAME_SERVICE_PORT: u16 = 137;

/// Direct-hosted SMB port
pub const SMB_DIRECT_PORT: u16 = 445;

/// NetBIOS session service port
pub const SMB_NETBIOS_PORT: u16 = 139;

const TYPE_NB: u16 = 0x0020;
const TYPE_NBSTAT: u16 = 0x0021;
const CLASS_IN: u16 = 0x0001;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const FLAG_BROADCAST: u16 = 0x0010;
const FLAG_AUTHORITATIVE: u16 = 0x0400;

/// Group bit in a name's NB_FLAGS
const NB_FLAG_GROUP: u16 = 0x8000;

const MAX_DATAGRAM: usize = 2048;
/// Upper bound on queries per resolution, whatever `retries` says
const MAX_QUERY_ATTEMPTS: u32 = 16;

/// A resolved SMB server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host_name: String,
    addr: SocketAddr,
    service_type: ServiceType,
}

impl Endpoint {
    pub fn new(host_name: impl Into<String>, addr: SocketAddr, service_type: ServiceType) -> Self {
        Self {
            host_name: host_name.into(),
            addr,
            service_type,
        }
    }

    /// Endpoint for a known address, skipping name resolution
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr, ServiceType::FileServer)
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.host_name, self.addr, self.service_type)
    }
}

/// A question entry of a name service packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsQuestion {
    pub name: NetBiosName,
    pub qtype: u16,
}

/// A resource record of a name service packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsResource {
    pub name: NetBiosName,
    pub rtype: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

/// Name service packet; all fields are big-endian on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsPacket {
    pub transaction_id: u16,
    pub flags: u16,
    pub questions: Vec<NsQuestion>,
    pub answers: Vec<NsResource>,
}

impl NsPacket {
    /// Name query request for `name`
    pub fn name_query(transaction_id: u16, name: NetBiosName, broadcast: bool) -> Self {
        let mut flags = FLAG_RECURSION_DESIRED;
        if broadcast {
            flags |= FLAG_BROADCAST;
        }
        Self {
            transaction_id,
            flags,
            questions: vec![NsQuestion {
                name,
                qtype: TYPE_NB,
            }],
            answers: Vec::new(),
        }
    }

    /// Node status request for the wildcard name
    pub fn node_status_query(transaction_id: u16) -> Self {
        Self {
            transaction_id,
            flags: 0,
            questions: vec![NsQuestion {
                name: NetBiosName::wildcard(),
                qtype: TYPE_NBSTAT,
            }],
            answers: Vec::new(),
        }
    }

    /// Positive name query response carrying unique addresses
    pub fn name_query_response(transaction_id: u16, name: NetBiosName, addrs: &[Ipv4Addr]) -> Self {
        let mut rdata = Vec::with_capacity(addrs.len() * 6);
        for addr in addrs {
            rdata.extend_from_slice(&0u16.to_be_bytes());
            rdata.extend_from_slice(&addr.octets());
        }
        Self {
            transaction_id,
            flags: FLAG_RESPONSE | FLAG_AUTHORITATIVE | FLAG_RECURSION_DESIRED,
            questions: Vec::new(),
            answers: vec![NsResource {
                name,
                rtype: TYPE_NB,
                ttl: 300_000,
                rdata,
            }],
        }
    }

    /// Negative name query response with the given RCODE
    pub fn negative_response(transaction_id: u16, rcode: u8) -> Self {
        Self {
            transaction_id,
            flags: FLAG_RESPONSE | FLAG_AUTHORITATIVE | (rcode as u16 & 0x000F),
            questions: Vec::new(),
            answers: Vec::new(),
        }
    }

    /// Node status response listing the node's registered names
    pub fn node_status_response(transaction_id: u16, entries: &[NodeStatusEntry]) -> Self {
        let mut rdata = Vec::with_capacity(1 + entries.len() * 18 + 46);
        rdata.push(entries.len() as u8);
        for entry in entries {
            rdata.extend_from_slice(&entry.name.to_raw());
            let flags = (if entry.group { NB_FLAG_GROUP } else { 0 }) | 0x0400;
            rdata.extend_from_slice(&flags.to_be_bytes());
        }
        // Statistics block (unit id and counters)
        rdata.extend_from_slice(&[0u8; 46]);
        Self {
            transaction_id,
            flags: FLAG_RESPONSE | FLAG_AUTHORITATIVE,
            questions: Vec::new(),
            answers: vec![NsResource {
                name: NetBiosName::wildcard(),
                rtype: TYPE_NBSTAT,
                ttl: 0,
                rdata,
            }],
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & 0x000F) as u8
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        buf.write_u16::<BigEndian>(self.transaction_id)?;
        buf.write_u16::<BigEndian>(self.flags)?;
        buf.write_u16::<BigEndian>(self.questions.len() as u16)?;
        buf.write_u16::<BigEndian>(self.answers.len() as u16)?;
        buf.write_u16::<BigEndian>(0)?; // authority records
        buf.write_u16::<BigEndian>(0)?; // additional records

        for question in &self.questions {
            buf.extend_from_slice(&question.name.to_wire(""));
            buf.write_u16::<BigEndian>(question.qtype)?;
            buf.write_u16::<BigEndian>(CLASS_IN)?;
        }

        for answer in &self.answers {
            buf.extend_from_slice(&answer.name.to_wire(""));
            buf.write_u16::<BigEndian>(answer.rtype)?;
            buf.write_u16::<BigEndian>(CLASS_IN)?;
            buf.write_u32::<BigEndian>(answer.ttl)?;
            buf.write_u16::<BigEndian>(answer.rdata.len() as u16)?;
            buf.extend_from_slice(&answer.rdata);
        }

        Ok(buf)
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 12 {
            return Err(Error::BufferTooSmall {
                need: 12,
                have: buf.len(),
            });
        }

        let mut cursor = Cursor::new(buf);
        let transaction_id = cursor.read_u16::<BigEndian>()?;
        let flags = cursor.read_u16::<BigEndian>()?;
        let qdcount = cursor.read_u16::<BigEndian>()?;
        let ancount = cursor.read_u16::<BigEndian>()?;
        let _nscount = cursor.read_u16::<BigEndian>()?;
        let _arcount = cursor.read_u16::<BigEndian>()?;

        let mut questions = Vec::with_capacity(qdcount as usize);
        for _ in 0..qdcount {
            let name = read_name(buf, &mut cursor)?;
            let qtype = cursor.read_u16::<BigEndian>()?;
            let _qclass = cursor.read_u16::<BigEndian>()?;
            questions.push(NsQuestion { name, qtype });
        }

        let mut answers = Vec::with_capacity(ancount as usize);
        for _ in 0..ancount {
            let name = read_name(buf, &mut cursor)?;
            let rtype = cursor.read_u16::<BigEndian>()?;
            let _rclass = cursor.read_u16::<BigEndian>()?;
            let ttl = cursor.read_u32::<BigEndian>()?;
            let rdlength = cursor.read_u16::<BigEndian>()? as usize;
            let mut rdata = vec![0u8; rdlength];
            cursor
                .read_exact(&mut rdata)
                .map_err(|_| Error::ParseError("Truncated resource record".into()))?;
            answers.push(NsResource {
                name,
                rtype,
                ttl,
                rdata,
            });
        }

        Ok(Self {
            transaction_id,
            flags,
            questions,
            answers,
        })
    }
}

/// Read a possibly compressed name and skip its scope labels
fn read_name(packet: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<NetBiosName> {
    let len = cursor.read_u8()?;
    if len & 0xC0 == 0xC0 {
        let offset = (((len & 0x3F) as usize) << 8) | cursor.read_u8()? as usize;
        let mut target = Cursor::new(packet);
        target.set_position(offset as u64);
        if target.read_u8()? & 0xC0 == 0xC0 {
            return Err(Error::ParseError("Nested name pointer".into()));
        }
        target.set_position(offset as u64);
        return read_name(packet, &mut target);
    }

    if len as usize != NETBIOS_ENCODED_NAME_LEN {
        return Err(Error::ParseError(format!(
            "Unexpected encoded name length {}",
            len
        )));
    }
    let mut encoded = [0u8; NETBIOS_ENCODED_NAME_LEN];
    cursor.read_exact(&mut encoded)?;
    let name = NetBiosName::decode(&encoded)?;

    loop {
        let label = cursor.read_u8()?;
        if label == 0 {
            break;
        }
        if label & 0xC0 == 0xC0 {
            cursor.read_u8()?;
            break;
        }
        cursor.set_position(cursor.position() + label as u64);
    }

    Ok(name)
}

/// Unique IPv4 addresses of an NB answer
pub fn parse_nb_addresses(rdata: &[u8]) -> Vec<Ipv4Addr> {
    rdata
        .chunks_exact(6)
        .filter(|entry| u16::from_be_bytes([entry[0], entry[1]]) & NB_FLAG_GROUP == 0)
        .map(|entry| Ipv4Addr::new(entry[2], entry[3], entry[4], entry[5]))
        .collect()
}

/// One name from a node status answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatusEntry {
    pub name: NetBiosName,
    pub group: bool,
}

pub fn parse_node_status(rdata: &[u8]) -> Result<Vec<NodeStatusEntry>> {
    let mut cursor = Cursor::new(rdata);
    let count = cursor.read_u8()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut raw = [0u8; NETBIOS_NAME_LEN];
        cursor
            .read_exact(&mut raw)
            .map_err(|_| Error::ParseError("Truncated node status entry".into()))?;
        let flags = cursor.read_u16::<BigEndian>()?;
        entries.push(NodeStatusEntry {
            name: NetBiosName::from_raw(&raw),
            group: flags & NB_FLAG_GROUP != 0,
        });
    }
    Ok(entries)
}

/// Pick the best-ranked service among a node's unique names
fn classify(entries: &[NodeStatusEntry]) -> Option<(&NetBiosName, ServiceType)> {
    entries
        .iter()
        .filter(|entry| !entry.group)
        .filter_map(|entry| entry.name.service_type().map(|s| (&entry.name, s)))
        .max_by_key(|(_, service)| service.preference())
}

/// Name service settings
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Directed queries go here; `None` broadcasts on the local segment
    pub name_server: Option<SocketAddr>,
    pub broadcast_addr: Ipv4Addr,
    /// Port node status queries are sent to
    pub name_service_port: u16,
    /// Upper bound for one resolution, retransmissions included
    pub timeout: Duration,
    /// Retransmissions after the first query
    pub retries: u32,
    /// Port placed in the resolved endpoint
    pub smb_port: u16,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            name_server: None,
            broadcast_addr: Ipv4Addr::BROADCAST,
            name_service_port: NAME_SERVICE_PORT,
            timeout: Duration::from_secs(2),
            retries: 2,
            smb_port: SMB_DIRECT_PORT,
        }
    }
}

/// Resolves host names and addresses to [`Endpoint`]s
#[derive(Debug)]
pub struct NetBiosResolver {
    config: ResolverConfig,
    next_transaction_id: AtomicU16,
}

impl NetBiosResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            next_transaction_id: AtomicU16::new(rand::random()),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a NetBIOS name or an IP literal
    pub async fn resolve(&self, name_or_address: &str) -> std::result::Result<Endpoint, SmbError> {
        self.lookup(name_or_address).await.map_err(|e| {
            debug!("Resolution of {:?} failed: {}", name_or_address, e);
            e.into_smb_error(ErrorCode::UnableToResolveAddress)
        })
    }

    async fn lookup(&self, target: &str) -> Result<Endpoint> {
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::NameResolution("no name or address supplied".into()));
        }
        match target.parse::<IpAddr>() {
            Ok(ip) => self.query_node_status(ip).await,
            Err(_) => self.query_name(target).await,
        }
    }

    async fn query_name(&self, host: &str) -> Result<Endpoint> {
        let name = NetBiosName::new(host, ServiceType::FileServer.wire_code())?;
        let (dest, broadcast) = match self.config.name_server {
            Some(server) => (server, false),
            None => (
                SocketAddr::from((self.config.broadcast_addr, self.config.name_service_port)),
                true,
            ),
        };

        let query = NsPacket::name_query(self.transaction_id(), name.clone(), broadcast);
        let reply = self.exchange(&query, dest, broadcast).await?;
        if reply.rcode() != 0 {
            return Err(Error::NameResolution(format!(
                "{} is not registered (rcode {})",
                name,
                reply.rcode()
            )));
        }

        let answer = reply
            .answers
            .iter()
            .find(|answer| answer.rtype == TYPE_NB)
            .ok_or_else(|| Error::NameResolution(format!("no address record for {}", name)))?;
        let addr = parse_nb_addresses(&answer.rdata)
            .into_iter()
            .next()
            .ok_or_else(|| Error::NameResolution(format!("{} has no unique address", name)))?;
        let service = answer.name.service_type().unwrap_or(ServiceType::FileServer);

        debug!("Resolved {} to {} ({})", name, addr, service);
        Ok(Endpoint::new(
            name.name(),
            SocketAddr::new(IpAddr::V4(addr), self.config.smb_port),
            service,
        ))
    }

    async fn query_node_status(&self, ip: IpAddr) -> Result<Endpoint> {
        let dest = SocketAddr::new(ip, self.config.name_service_port);
        let query = NsPacket::node_status_query(self.transaction_id());
        let reply = self.exchange(&query, dest, false).await?;
        if reply.rcode() != 0 {
            return Err(Error::NameResolution(format!(
                "node status refused by {} (rcode {})",
                ip,
                reply.rcode()
            )));
        }

        let answer = reply
            .answers
            .iter()
            .find(|answer| answer.rtype == TYPE_NBSTAT)
            .ok_or_else(|| Error::NameResolution(format!("no node status from {}", ip)))?;
        let entries = parse_node_status(&answer.rdata)?;
        let (name, service) = classify(&entries)
            .ok_or_else(|| Error::NameResolution(format!("{} advertises no known service", ip)))?;

        debug!("Node {} is {} ({})", ip, name, service);
        Ok(Endpoint::new(
            name.name(),
            SocketAddr::new(ip, self.config.smb_port),
            service,
        ))
    }

    /// Queries sent per resolution, the first one included
    fn attempts(&self) -> u32 {
        self.config.retries.saturating_add(1).min(MAX_QUERY_ATTEMPTS)
    }

    fn transaction_id(&self) -> u16 {
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `query` and wait for the matching response, retransmitting on silence
    async fn exchange(&self, query: &NsPacket, dest: SocketAddr, broadcast: bool) -> Result<NsPacket> {
        let bind_addr: SocketAddr = if dest.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        if broadcast {
            socket.set_broadcast(true)?;
        }

        let bytes = query.serialize()?;
        let attempts = self.attempts();
        let per_attempt = self.config.timeout / attempts;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        for attempt in 1..=attempts {
            trace!(
                "Name query 0x{:04X} to {} (attempt {}/{})",
                query.transaction_id,
                dest,
                attempt,
                attempts
            );
            socket.send_to(&bytes, dest).await?;

            let deadline = Instant::now() + per_attempt;
            loop {
                let (n, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                    Err(_) => break,
                    Ok(received) => received?,
                };
                match NsPacket::parse(&buf[..n]) {
                    Ok(reply) if reply.is_response() && reply.transaction_id == query.transaction_id => {
                        return Ok(reply);
                    }
                    Ok(_) => trace!("Ignoring unrelated datagram from {}", from),
                    Err(e) => warn!("Malformed name service datagram from {}: {}", from, e),
                }
            }
        }

        Err(Error::NameResolution(format!("no answer from {}", dest)))
    }
}

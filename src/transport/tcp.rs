//! TCP transport with NetBIOS session framing

use super::SmbTransport;
use crate::error::{Error, Result};
use crate::netbios::{NetBiosHeader, NetBiosMessage, NetBiosName};
use crate::protocol::NetBiosMessageType;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

const READ_CHUNK: usize = 64 * 1024;

/// TCP transport for SMB
pub struct TcpTransport {
    stream: Option<TcpStream>,
    read_buffer: BytesMut,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            stream: None,
            read_buffer: BytesMut::with_capacity(READ_CHUNK),
            local_addr: None,
            remote_addr: None,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    /// Wrap an accepted stream
    pub fn from_stream(stream: TcpStream) -> Self {
        let local_addr = stream.local_addr().ok();
        let remote_addr = stream.peer_addr().ok();

        Self {
            stream: Some(stream),
            local_addr,
            remote_addr,
            ..Self::new()
        }
    }

    /// Bound connection establishment and every individual read or write.
    /// An expired bound surfaces as [`Error::Timeout`].
    pub fn with_timeouts(mut self, connect: Option<Duration>, io: Option<Duration>) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    /// Connect and run the NetBIOS session request handshake (port 139)
    pub async fn connect_with_netbios(
        &mut self,
        addr: SocketAddr,
        called: &NetBiosName,
        calling: &NetBiosName,
    ) -> Result<()> {
        self.connect(addr).await?;

        let request = NetBiosMessage::session_request(called, calling)?;
        self.write_bytes(&request.to_bytes()).await?;

        let response = self.receive_packet().await?;
        match response.header.message_type {
            NetBiosMessageType::PositiveResponse => Ok(()),
            NetBiosMessageType::NegativeResponse => {
                let reason = response
                    .refusal()
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                Err(Error::ConnectionError(format!(
                    "NetBIOS session request to {} rejected: {}",
                    called, reason
                )))
            }
            other => Err(Error::ConnectionError(format!(
                "Unexpected NetBIOS response type: {:?}",
                other
            ))),
        }
    }

    /// Read one NetBIOS packet of any type
    pub async fn receive_packet(&mut self) -> Result<NetBiosMessage> {
        while self.read_buffer.len() < NetBiosHeader::SIZE {
            self.read_more().await?;
        }

        let header = NetBiosHeader::parse(&self.read_buffer)
            .map_err(|e| Error::InvalidHeader(e.to_string()))?;
        let total_size = NetBiosHeader::SIZE + header.length as usize;

        while self.read_buffer.len() < total_size {
            self.read_more().await?;
        }

        let packet = self.read_buffer.split_to(total_size);
        NetBiosMessage::parse(&packet)
    }

    /// Write a prebuilt NetBIOS packet
    pub async fn send_packet(&mut self, packet: &NetBiosMessage) -> Result<()> {
        self.write_bytes(&packet.to_bytes()).await
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let limit = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        bounded(limit, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
    }

    async fn read_more(&mut self) -> Result<usize> {
        let limit = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        self.read_buffer.reserve(READ_CHUNK);
        let buffer = &mut self.read_buffer;
        let n = bounded(limit, stream.read_buf(buffer)).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(n)
    }
}

async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout),
        },
        None => Ok(fut.await?),
    }
}

#[async_trait]
impl SmbTransport for TcpTransport {
    async fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        let stream = bounded(self.connect_timeout, TcpStream::connect(addr)).await?;
        stream.set_nodelay(true)?;
        self.local_addr = Some(stream.local_addr()?);
        self.remote_addr = Some(stream.peer_addr()?);
        self.read_buffer.clear();
        self.stream = Some(stream);
        Ok(())
    }

    async fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        let header = NetBiosHeader::session_message(payload.len() as u32)?;
        let mut frame = BytesMut::with_capacity(NetBiosHeader::SIZE + payload.len());
        header.write_to(&mut frame)?;
        frame.put_slice(payload);
        self.write_bytes(&frame).await
    }

    async fn receive_message(&mut self) -> Result<Vec<u8>> {
        loop {
            let packet = self.receive_packet().await?;
            match packet.header.message_type {
                NetBiosMessageType::SessionMessage => return Ok(packet.payload),
                NetBiosMessageType::Keepalive => trace!("NetBIOS keepalive"),
                other => {
                    return Err(Error::InvalidHeader(format!(
                        "Unexpected NetBIOS packet {:?} inside a session",
                        other
                    )))
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone
            let _ = stream.shutdown().await;
        }
        self.local_addr = None;
        self.remote_addr = None;
        self.read_buffer.clear();
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr.ok_or(Error::ConnectionClosed)
    }

    fn remote_addr(&self) -> Result<SocketAddr> {
        self.remote_addr.ok_or(Error::ConnectionClosed)
    }
}

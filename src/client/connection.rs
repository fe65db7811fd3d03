//! Request/response plumbing over one transport

use crate::error::{Error, NtStatus, Result};
use crate::protocol::messages::{decode_message, encode_message, Smb2Header, SmbMessage};
use crate::protocol::smb2_constants::Smb2Command;
use crate::transport::SmbTransport;
use std::time::Duration;
use tracing::trace;

/// One SMB2 connection: numbers requests, stamps the session id and pairs
/// every request with its response. Callers serialize access.
pub struct Connection {
    transport: Box<dyn SmbTransport>,
    next_message_id: u64,
    session_id: u64,
    io_timeout: Duration,
    exchanges: u64,
}

impl Connection {
    pub fn new(transport: Box<dyn SmbTransport>, io_timeout: Duration) -> Self {
        Self {
            transport,
            next_message_id: 0,
            session_id: 0,
            io_timeout,
            exchanges: 0,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn set_session_id(&mut self, session_id: u64) {
        self.session_id = session_id;
    }

    /// Requests sent so far
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// Send `request` and wait for its response. A non-success status
    /// becomes [`Error::Status`], except MORE_PROCESSING_REQUIRED during
    /// SESSION_SETUP. The whole exchange is bounded by the I/O timeout.
    pub async fn exchange<Req, Resp>(
        &mut self,
        command: Smb2Command,
        tree_id: u32,
        request: &Req,
    ) -> Result<(Smb2Header, Resp)>
    where
        Req: SmbMessage,
        Resp: SmbMessage,
    {
        let limit = self.io_timeout;
        match tokio::time::timeout(limit, self.round_trip(command, tree_id, request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn round_trip<Req, Resp>(
        &mut self,
        command: Smb2Command,
        tree_id: u32,
        request: &Req,
    ) -> Result<(Smb2Header, Resp)>
    where
        Req: SmbMessage,
        Resp: SmbMessage,
    {
        let mut header = Smb2Header::new(command);
        header.message_id = self.next_message_id;
        header.session_id = self.session_id;
        header.tree_id = tree_id;
        self.next_message_id += 1;
        self.exchanges += 1;

        let bytes = encode_message(&header, request)?;
        trace!(
            "-> {:?} mid={} tid={} ({} bytes)",
            command,
            header.message_id,
            tree_id,
            bytes.len()
        );
        self.transport.send_message(&bytes).await?;

        loop {
            let raw = self.transport.receive_message().await?;
            let (reply, body) = decode_message(&raw)?;

            if !reply.is_response()
                || reply.message_id != header.message_id
                || reply.command != command
            {
                return Err(Error::InvalidHeader(format!(
                    "Expected response to {:?} mid={}, got {:?} mid={}",
                    command, header.message_id, reply.command, reply.message_id
                )));
            }

            let status = reply.nt_status();
            trace!("<- {:?} mid={} {}", command, reply.message_id, status);
            match status {
                NtStatus::Pending if reply.is_async() => continue,
                NtStatus::Success => {}
                NtStatus::MoreProcessingRequired if command == Smb2Command::SessionSetup => {}
                other => return Err(Error::Status(other)),
            }

            let body = Resp::parse(body)?;
            return Ok((reply, body));
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

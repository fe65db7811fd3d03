//! Transport layer for SMB
//!
//! A transport moves whole SMB2 messages. Framing, timeouts and the optional
//! NetBIOS session handshake live in the implementation; the session layer
//! only sees complete payloads.

use crate::error::Result;
use async_trait::async_trait;
use std::net::SocketAddr;

pub mod tcp;

pub use tcp::TcpTransport;

/// Message-oriented connection to an SMB peer
#[async_trait]
pub trait SmbTransport: Send + Sync {
    /// Connect to a remote SMB server
    async fn connect(&mut self, addr: SocketAddr) -> Result<()>;

    /// Send one complete SMB2 message
    async fn send_message(&mut self, payload: &[u8]) -> Result<()>;

    /// Receive the next complete SMB2 message
    async fn receive_message(&mut self) -> Result<Vec<u8>>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Get the remote address
    fn remote_addr(&self) -> Result<SocketAddr>;
}

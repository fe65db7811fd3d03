//! SMB client session engine in Rust
//!
//! Resolves hosts over NetBIOS, drives an SMB2 session through dialect
//! negotiation and NTLMv2 authentication, connects to shares and runs file
//! operations as cancellable, resumable transfer tasks.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod error;
pub mod netbios;
pub mod protocol;
pub mod transport;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "client")]
pub mod transfer;

#[cfg(all(test, feature = "client"))]
pub mod e2e_tests;

pub use error::{error_for_code, Error, ErrorCode, Result, SmbError};
pub use netbios::{Endpoint, NetBiosResolver, ResolverConfig, ServiceType};

#[cfg(feature = "client")]
pub use client::{ClientConfig, Session, SessionState, TreeHandle};

#[cfg(feature = "client")]
pub use transfer::{
    PartialPolicy, ResumePoint, TransferOutcome, TransferProgress, TransferRequest, TransferTask,
    TransferTaskState,
};

//! Test context for end-to-end testing
//!
//! Bundles a running mock server, a local scratch directory and helpers for
//! opening sessions and shares against it.

use super::mock_server::{MockServer, MockServerConfig, SERVER_NAME};
use crate::auth::Credentials;
use crate::client::{ClientConfig, Session, TreeHandle};
use crate::netbios::{Endpoint, ServiceType};
use crate::transfer::{TransferProgress, TransferTask};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Size of the document used by the download scenarios
pub const REPORT_SIZE: usize = 2_048_000;

pub fn alice() -> Credentials {
    Credentials::new("alice", "s3cret", "WORKGROUP")
}

/// Deterministic, non-repeating-per-chunk content
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 65536) as u8).collect()
}

pub struct TestContext {
    pub server: MockServer,
    pub local_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(MockServerConfig::default()).await
    }

    pub async fn with_config(config: MockServerConfig) -> Self {
        let server = MockServer::start(config).await.expect("mock server");
        server.fs().add_file("docs/report.pdf", pattern(REPORT_SIZE));
        Self {
            server,
            local_dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(SERVER_NAME, self.server.addr(), ServiceType::FileServer)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            io_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
        .with_credentials(alice())
    }

    pub async fn session(&self) -> Session {
        Session::open(self.endpoint(), self.client_config())
            .await
            .expect("session")
    }

    pub async fn share(&self) -> TreeHandle {
        self.session()
            .await
            .connect_share("public")
            .await
            .expect("share")
    }

    pub fn local(&self, name: &str) -> PathBuf {
        self.local_dir.path().join(name)
    }
}

/// Wait until the task has moved at least `bytes`
pub async fn wait_for_progress(task: &TransferTask, bytes: u64) -> TransferProgress {
    let mut progress = task.subscribe_progress();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(10),
        progress.wait_for(|p| p.bytes_transferred >= bytes),
    )
    .await
    .expect("progress timed out")
    .expect("progress channel closed");
    *snapshot
}

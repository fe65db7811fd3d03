//! Session lifecycle against the mock server

use super::mock_server::MockServerConfig;
use super::test_context::{alice, TestContext};
use crate::auth::Credentials;
use crate::client::{Session, SessionState};
use crate::error::{ErrorCode, NtStatus};
use crate::netbios::{Endpoint, ServiceType};
use crate::protocol::smb2_constants::{Smb2Command, Smb2Dialect};
use std::time::Duration;

#[tokio::test]
async fn test_session_state_sequence() {
    let ctx = TestContext::new().await;
    let session = Session::connect(ctx.endpoint(), ctx.client_config())
        .await
        .unwrap();
    let mut states = session.subscribe();
    assert_eq!(session.state(), SessionState::NetBiosOk);

    let dialect = session.negotiate_dialect().await.unwrap();
    assert_eq!(dialect, Smb2Dialect::Smb302);
    assert_eq!(session.dialect(), Some(Smb2Dialect::Smb302));
    assert_eq!(*states.borrow_and_update(), SessionState::DialectOk);

    session.authenticate(Some(alice())).await.unwrap();
    assert_eq!(*states.borrow_and_update(), SessionState::SessionOk);
    assert!(!session.is_guest());

    let tree = session.connect_share("public").await.unwrap();
    assert_eq!(tree.share_name(), "public");
    assert!(tree.is_connected().await);

    session.disconnect().await;
    assert!(!session.is_connected().await);
    assert!(!tree.is_connected().await);
    // Idempotent
    session.disconnect().await;
}

#[tokio::test]
async fn test_invalid_password_without_guest() {
    let ctx = TestContext::new().await;
    let session = Session::connect(ctx.endpoint(), ctx.client_config())
        .await
        .unwrap();
    session.negotiate_dialect().await.unwrap();

    let err = session
        .authenticate(Some(Credentials::new("alice", "wrong", "WORKGROUP")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationFailed);
    assert_eq!(session.state(), SessionState::Error(ErrorCode::AuthenticationFailed));

    // The error state is absorbing and costs no I/O
    let requests = ctx.server.state().requests();
    let err = session.authenticate(Some(alice())).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationFailed);
    let err = session.negotiate_dialect().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationFailed);
    let err = session.connect_share("public").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationFailed);
    assert_eq!(ctx.server.state().requests(), requests);
}

#[tokio::test]
async fn test_guest_fallback() {
    let ctx = TestContext::with_config(MockServerConfig {
        allow_guest: true,
        ..MockServerConfig::default()
    })
    .await;
    let config = ctx
        .client_config()
        .with_credentials(Credentials::new("mallory", "guess", "WORKGROUP"))
        .with_guest(true);

    let session = Session::open(ctx.endpoint(), config).await.unwrap();
    assert_eq!(session.state(), SessionState::SessionOk);
    assert!(session.is_guest());
    assert_eq!(
        session.credentials().await.map(|c| c.username),
        Some("Guest".to_string())
    );
    session.connect_share("public").await.unwrap();
}

#[tokio::test]
async fn test_guest_refused_by_server() {
    let ctx = TestContext::new().await;
    let config = ctx.client_config().with_guest(true);
    let session = Session::connect(ctx.endpoint(), config).await.unwrap();
    session.negotiate_dialect().await.unwrap();

    let err = session.authenticate(None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationFailed);
    assert!(!session.is_guest());
}

#[tokio::test]
async fn test_raw_ntlmssp_without_spnego() {
    let ctx = TestContext::new().await;
    let config = crate::client::ClientConfig {
        use_spnego: false,
        ..ctx.client_config()
    };
    let session = Session::open(ctx.endpoint(), config).await.unwrap();
    assert_eq!(session.state(), SessionState::SessionOk);
}

#[tokio::test]
async fn test_netbios_session_request() {
    let ctx = TestContext::new().await;
    let config = crate::client::ClientConfig {
        netbios_session: true,
        ..ctx.client_config()
    };
    let session = Session::open(ctx.endpoint(), config).await.unwrap();
    assert_eq!(session.state(), SessionState::SessionOk);
}

#[tokio::test]
async fn test_out_of_order_call_keeps_state() {
    let ctx = TestContext::new().await;
    let session = Session::connect(ctx.endpoint(), ctx.client_config())
        .await
        .unwrap();

    assert!(session.authenticate(Some(alice())).await.is_err());
    assert_eq!(session.state(), SessionState::NetBiosOk);
    assert!(session.connect_share("public").await.is_err());
    assert_eq!(session.state(), SessionState::NetBiosOk);
    assert_eq!(ctx.server.state().requests(), 0);

    // The session is still usable in order
    session.negotiate_dialect().await.unwrap();
    session.authenticate(Some(alice())).await.unwrap();
}

#[tokio::test]
async fn test_unoffered_dialect_is_unable_to_connect() {
    let ctx = TestContext::new().await;
    let config = crate::client::ClientConfig {
        dialects: vec![Smb2Dialect::Smb202],
        ..ctx.client_config()
    };
    let session = Session::connect(ctx.endpoint(), config).await.unwrap();
    let err = session.negotiate_dialect().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnableToConnect);
    assert_eq!(session.state(), SessionState::Error(ErrorCode::UnableToConnect));
}

#[tokio::test]
async fn test_stalled_server_fails_session() {
    let ctx = TestContext::new().await;
    ctx.server.faults().stall_on = Some(Smb2Command::TreeConnect);
    let config = crate::client::ClientConfig {
        io_timeout: Duration::from_millis(300),
        ..ctx.client_config()
    };
    let session = Session::open(ctx.endpoint(), config).await.unwrap();

    let err = session.connect_share("public").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnableToConnect);
    assert_eq!(session.state(), SessionState::Error(ErrorCode::UnableToConnect));
    assert!(!session.is_connected().await);
}

#[tokio::test]
async fn test_missing_share() {
    let ctx = TestContext::new().await;
    let session = ctx.session().await;

    let err = session.connect_share("private").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ShareConnectionFailed);
    assert_eq!(session.state(), SessionState::SessionOk);
}

#[tokio::test]
async fn test_refused_connection() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = Endpoint::new("GONE", addr, ServiceType::FileServer);
    let err = Session::connect(endpoint, crate::client::ClientConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnableToConnect);
}

#[tokio::test]
async fn test_refused_tree_connect_keeps_session() {
    let ctx = TestContext::new().await;
    ctx.server
        .faults()
        .fail_next
        .push_back((Smb2Command::TreeConnect, NtStatus::AccessDenied));
    let session = ctx.session().await;

    let err = session.connect_share("public").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ShareConnectionFailed);
    assert_eq!(session.state(), SessionState::SessionOk);
    session.connect_share("public").await.unwrap();
}

//! Name service resolution against a local responder

use super::mock_server::{NameResponder, SERVER_NAME};
use super::test_context::{alice, TestContext};
use crate::client::{ClientConfig, Session, SessionState};
use crate::error::ErrorCode;
use crate::netbios::{NetBiosResolver, ResolverConfig, ServiceType};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

fn resolver_for(responder: &NameResponder, smb_port: u16) -> NetBiosResolver {
    NetBiosResolver::new(ResolverConfig {
        name_server: Some(responder.addr()),
        name_service_port: responder.addr().port(),
        timeout: Duration::from_secs(1),
        smb_port,
        ..ResolverConfig::default()
    })
}

#[tokio::test]
async fn test_resolve_name() {
    let responder = NameResponder::start(SERVER_NAME, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    let resolver = resolver_for(&responder, 445);

    let endpoint = resolver.resolve("fileserver01").await.unwrap();
    assert_eq!(endpoint.host_name(), SERVER_NAME);
    assert_eq!(
        endpoint.addr(),
        SocketAddr::from((Ipv4Addr::LOCALHOST, 445))
    );
    assert_eq!(endpoint.service_type(), ServiceType::FileServer);
}

#[tokio::test]
async fn test_unknown_name() {
    let responder = NameResponder::start(SERVER_NAME, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    let resolver = resolver_for(&responder, 445);

    let err = resolver.resolve("PRINTSRV").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnableToResolveAddress);
}

#[tokio::test]
async fn test_resolve_address_by_node_status() {
    let responder = NameResponder::start(SERVER_NAME, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    let resolver = resolver_for(&responder, 445);

    let endpoint = resolver.resolve("127.0.0.1").await.unwrap();
    assert_eq!(endpoint.host_name(), SERVER_NAME);
    assert_eq!(endpoint.service_type(), ServiceType::FileServer);
    assert_eq!(endpoint.addr().port(), 445);
}

#[tokio::test]
async fn test_silent_name_server() {
    // Bound but never answering
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let resolver = NetBiosResolver::new(ResolverConfig {
        name_server: Some(silent.local_addr().unwrap()),
        timeout: Duration::from_millis(300),
        retries: 1,
        ..ResolverConfig::default()
    });

    let started = std::time::Instant::now();
    let err = resolver.resolve("FILESERVER01").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnableToResolveAddress);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_empty_name() {
    let resolver = NetBiosResolver::new(ResolverConfig::default());
    let err = resolver.resolve("  ").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnableToResolveAddress);
}

#[tokio::test]
async fn test_resolve_then_open_session() {
    let ctx = TestContext::new().await;
    let responder = NameResponder::start(SERVER_NAME, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    let resolver = resolver_for(&responder, ctx.server.addr().port());

    let endpoint = resolver.resolve(SERVER_NAME).await.unwrap();
    let config = ClientConfig {
        io_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
    .with_credentials(alice());
    let session = Session::open(endpoint, config).await.unwrap();
    assert_eq!(session.state(), SessionState::SessionOk);
    session.connect_share("public").await.unwrap();
}

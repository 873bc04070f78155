//! Mesh-facing socket over real TCP

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use common::{auth_rejected, eventually, fake_shell, running, ssh_config, FakeDialer, FakeNode};
use tt_core::{KnownHosts, MeshNode, SessionTuning};
use tt_protocol::{Envelope, MessageType};
use tt_server::session::{mesh_server, MeshContext, SessionLifecycle};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, origin: &str) -> Result<Client, WsError> {
    let mut request = format!("ws://{}/", addr).into_client_request()?;
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_str(origin).unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws)
}

async fn recv_envelope(ws: &mut Client) -> Envelope {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Envelope::from_json(&text).unwrap(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("expected envelope, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_shell_session_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let node = FakeNode::new("tailterm-test", vec![running()]);
    let listener = node.listen(80).await.unwrap();
    let addr = node.listening.lock().unwrap();

    let (shell, script, io) = fake_shell();
    let lifecycle = SessionLifecycle::new();
    let ctx = Arc::new(MeshContext {
        node: Arc::clone(&node) as Arc<dyn MeshNode>,
        dialer: FakeDialer::new(Vec::new(), vec![io]),
        known_hosts: KnownHosts::new(dir.path().join("known_hosts")),
        ssh_config: ssh_config(),
        tuning: SessionTuning::default(),
        dev: false,
        lifecycle: lifecycle.clone(),
    });
    let server = tokio::spawn(mesh_server::serve(listener, false, ctx));

    let mut ws = connect(addr, &format!("http://{}", addr)).await.unwrap();

    let hello = recv_envelope(&mut ws).await;
    assert_eq!(hello.msg_type, MessageType::Info);
    assert!(hello.data.starts_with("Connected to tailterm-test from 127.0.0.1:"));
    assert_eq!(recv_envelope(&mut ws).await.msg_type, MessageType::SshSuccess);

    let input = Envelope::new(MessageType::Input, "ls\n").to_json().unwrap();
    ws.send(Message::Text(input)).await.unwrap();
    eventually(|| shell.input.lock().as_slice() == b"ls\n").await;

    script.stdout.send(common::Output::Data(b"file.txt\r\n".to_vec())).unwrap();
    assert_eq!(recv_envelope(&mut ws).await.data, "file.txt\r\n");

    script.stdout.send(common::Output::Exit(0)).unwrap();
    let close = loop {
        match ws.next().await {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {:?}", other),
        }
    };
    assert_eq!(close.map(|f| u16::from(f.code)), Some(1000));

    server.await.unwrap();
    assert!(lifecycle.is_closed());
}

#[tokio::test]
async fn test_foreign_origin_is_forbidden_without_ending_session() {
    let dir = tempfile::tempdir().unwrap();
    let node = FakeNode::new("tailterm-test", vec![running()]);
    let listener = node.listen(80).await.unwrap();
    let addr = node.listening.lock().unwrap();

    let lifecycle = SessionLifecycle::new();
    let ctx = Arc::new(MeshContext {
        node: Arc::clone(&node) as Arc<dyn MeshNode>,
        dialer: FakeDialer::new(Vec::new(), Vec::new()),
        known_hosts: KnownHosts::new(dir.path().join("known_hosts")),
        ssh_config: ssh_config(),
        tuning: SessionTuning::default(),
        dev: false,
        lifecycle: lifecycle.clone(),
    });
    let server = tokio::spawn(mesh_server::serve(listener, false, ctx));

    match connect(addr, "http://evil.example.com").await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("foreign origin was accepted"),
    }
    assert!(!lifecycle.is_closed());

    // A peer's address is still accepted afterwards
    let ws = connect(addr, "http://100.64.0.5:3000").await;
    assert!(ws.is_ok());

    lifecycle.close();
    server.await.unwrap();
}

#[tokio::test]
async fn test_ssh_failure_ends_session_with_reason() {
    let dir = tempfile::tempdir().unwrap();
    let node = FakeNode::new("tailterm-test", vec![running()]);
    let listener = node.listen(80).await.unwrap();
    let addr = node.listening.lock().unwrap();

    let lifecycle = SessionLifecycle::new();
    let ctx = Arc::new(MeshContext {
        node: Arc::clone(&node) as Arc<dyn MeshNode>,
        dialer: FakeDialer::new(vec![auth_rejected()], Vec::new()),
        known_hosts: KnownHosts::new(dir.path().join("known_hosts")),
        ssh_config: ssh_config(),
        tuning: SessionTuning {
            max_ssh_attempts: 1,
            ..SessionTuning::default()
        },
        dev: false,
        lifecycle: lifecycle.clone(),
    });
    let server = tokio::spawn(mesh_server::serve(listener, false, ctx));

    let mut ws = connect(addr, &format!("http://{}", addr)).await.unwrap();
    assert_eq!(recv_envelope(&mut ws).await.msg_type, MessageType::Info);

    let close = loop {
        match ws.next().await {
            Some(Ok(Message::Close(frame))) => break frame.unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {:?}", other),
        }
    };
    assert_eq!(u16::from(close.code), 1001);
    assert!(close.reason.contains("Max SSH attempts reached (1)"));

    server.await.unwrap();
    let failure = lifecycle.failure().unwrap();
    assert!(failure.starts_with("Max SSH attempts reached (1)"));
    assert!(failure.contains("Authentication rejected for alice@lab-server"));
}

//! SSH connect/retry loop

mod common;

use std::sync::Arc;

use common::{auth_rejected, fake_shell, hub_pair, ssh_config, Browser, FakeDialer, FakeNode};
use tt_core::{KnownHosts, MeshNode};
use tt_protocol::MessageType;
use tt_server::ssh::{HostTrustNegotiator, SshConnector, SshError};
use tt_server::ws::MessageHub;

const MAX_ATTEMPTS: u32 = 5;

fn connector(hub: &Arc<MessageHub>, dialer: Arc<FakeDialer>, dir: &tempfile::TempDir) -> SshConnector {
    let trust = Arc::new(HostTrustNegotiator::new(
        KnownHosts::new(dir.path().join("known_hosts")),
        Arc::clone(hub),
    ));
    let node: Arc<dyn MeshNode> = FakeNode::new("tailterm-test", vec![common::running()]);
    SshConnector::new(Arc::clone(hub), trust, dialer, node, MAX_ATTEMPTS)
}

#[derive(Debug, Default, PartialEq)]
struct Seen {
    ssh_errors: usize,
    ssh_success: usize,
    errors: usize,
}

/// Answer every `ssh-error` with fresh credentials until the hub goes quiet
async fn browser_loop(hub: Arc<MessageHub>, mut browser: Browser, credentials: &'static str) -> Seen {
    let mut seen = Seen::default();

    while let Some(frame) = browser.next_frame().await {
        let tt_server::ws::Frame::Text(text) = frame else { break };
        let env = tt_protocol::Envelope::from_json(&text).unwrap();
        match env.msg_type {
            MessageType::SshError => {
                seen.ssh_errors += 1;
                browser.reply(&hub, MessageType::SshConfig, credentials).await;
            }
            MessageType::SshSuccess => {
                seen.ssh_success += 1;
                break;
            }
            MessageType::Error => {
                seen.errors += 1;
                break;
            }
            _ => {}
        }
    }

    seen
}

#[tokio::test]
async fn test_three_failures_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let (hub, browser) = hub_pair();
    let (_shell, _script, io) = fake_shell();
    let dialer = FakeDialer::new(vec![auth_rejected(), auth_rejected(), auth_rejected()], vec![io]);
    let connector = connector(&hub, Arc::clone(&dialer), &dir);

    let browser = tokio::spawn(browser_loop(Arc::clone(&hub), browser, "bob:hunter2:lab-server:2222"));

    connector.connect(ssh_config()).await.unwrap();
    let seen = browser.await.unwrap();

    assert_eq!(
        seen,
        Seen {
            ssh_errors: 3,
            ssh_success: 1,
            errors: 0
        }
    );
    let attempts = dialer.attempts.lock();
    assert_eq!(attempts.len(), 4);
    assert_eq!(attempts[0].username, "alice");
    assert_eq!(attempts[3].username, "bob");
    assert_eq!(attempts[3].port, 2222);
}

#[tokio::test]
async fn test_attempts_exhausted_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let (hub, browser) = hub_pair();
    let failures = (0..MAX_ATTEMPTS).map(|_| auth_rejected()).collect();
    let dialer = FakeDialer::new(failures, Vec::new());
    let connector = connector(&hub, Arc::clone(&dialer), &dir);

    let browser = tokio::spawn(browser_loop(Arc::clone(&hub), browser, "alice:secret:lab-server:22"));

    let err = connector.connect(ssh_config()).await.err().expect("connect should fail");
    assert!(matches!(err, SshError::AttemptsExhausted { attempts: 5, .. }));
    assert_eq!(dialer.attempt_count(), 5);

    // Unblock the browser task: the hub ends once the connection closes
    hub.connection().close().await;
    let seen = browser.await.unwrap();
    assert_eq!(seen.ssh_success, 0);
    assert_eq!(seen.ssh_errors, 4);
}

#[tokio::test]
async fn test_unparsable_retry_config_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let (hub, browser) = hub_pair();
    let dialer = FakeDialer::new(vec![auth_rejected()], Vec::new());
    let connector = connector(&hub, Arc::clone(&dialer), &dir);

    let browser = tokio::spawn(browser_loop(Arc::clone(&hub), browser, "not-a-config"));

    let err = connector.connect(ssh_config()).await.err().expect("connect should fail");
    match err {
        SshError::Config(message) => assert!(message.contains("Authentication rejected")),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(dialer.attempt_count(), 1);

    hub.connection().close().await;
    assert_eq!(browser.await.unwrap().ssh_success, 0);
}

#[tokio::test]
async fn test_host_key_mismatch_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (hub, browser) = hub_pair();
    let mismatch = SshError::HostKeyMismatch {
        host: "lab-server".to_string(),
        line: 3,
    };
    let dialer = FakeDialer::new(vec![mismatch], Vec::new());
    let connector = connector(&hub, Arc::clone(&dialer), &dir);

    let browser = tokio::spawn(browser_loop(Arc::clone(&hub), browser, "alice:secret:lab-server:22"));

    let err = connector.connect(ssh_config()).await.err().expect("connect should fail");
    assert!(matches!(err, SshError::HostKeyMismatch { .. }));
    assert_eq!(dialer.attempt_count(), 1);

    let seen = browser.await.unwrap();
    assert_eq!(
        seen,
        Seen {
            ssh_errors: 0,
            ssh_success: 0,
            errors: 1
        }
    );
}

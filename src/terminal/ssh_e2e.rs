//! End-to-end test against a real SSH server.
//!
//! Ignored by default. Run with:
//!
//! ```text
//! TERMINAL_E2E_HOST=127.0.0.1 TERMINAL_E2E_USER=tester TERMINAL_E2E_PASSWORD='p@ss' \
//!     cargo test ssh_e2e -- --ignored
//! ```
//!
//! `TERMINAL_E2E_PORT` defaults to 22.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc;
use poem::web::websocket::Message;

use crate::terminal::bridge::{BridgeOptions, BridgeState, TerminalBridge};
use crate::terminal::client::SshConnector;
use crate::terminal::recorder::{EventKind, read_recording};
use crate::terminal::storage::{MemoryAuditStore, TerminalRegistry};
use crate::terminal::testing::{FakeHosts, FakeVault};
use crate::terminal::types::{Credential, CredentialKind, Host, Operator, TerminalSize};

fn target() -> Option<(Host, Credential)> {
    let ip = env::var("TERMINAL_E2E_HOST").ok()?;
    let user = env::var("TERMINAL_E2E_USER").ok()?;
    let password = env::var("TERMINAL_E2E_PASSWORD").ok()?;
    let port = env::var("TERMINAL_E2E_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(22);

    Some((
        Host {
            id: 1,
            name: "e2e".to_string(),
            ip,
            port,
            ssh_user: user.clone(),
            credential_id: Some(1),
        },
        Credential {
            id: 1,
            kind: CredentialKind::Password,
            username: user,
            password,
            private_key: String::new(),
            passphrase: String::new(),
        },
    ))
}

#[tokio::test]
#[ignore = "requires a reachable SSH server"]
async fn ssh_e2e_echo_is_streamed_and_recorded() {
    let Some((host, credential)) = target() else {
        eprintln!("TERMINAL_E2E_* not set, skipping");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(MemoryAuditStore::new());
    let registry = Arc::new(TerminalRegistry::new(
        Arc::new(FakeHosts::new(vec![host])),
        Arc::new(FakeVault::new(vec![credential])),
        Arc::new(SshConnector::new(Duration::from_secs(10), false)),
        audit.clone(),
        dir.path(),
    ));

    let (to_server, server_stream) = mpsc::unbounded::<Result<Message, std::io::Error>>();
    let (server_sink, mut from_server) = mpsc::unbounded::<Message>();
    let bridge = TerminalBridge::new(Arc::clone(&registry), BridgeOptions::default());
    let task = tokio::spawn(bridge.run(
        1,
        Operator::new(1, "e2e"),
        TerminalSize::default(),
        server_sink,
        server_stream,
    ));

    to_server
        .unbounded_send(Ok(Message::Binary(b"echo hi\n".to_vec())))
        .unwrap();

    // The pty echoes "echo hi\r\n" before the command prints "hi\r\n".
    let mut seen = String::new();
    while seen.matches("hi\r\n").count() < 2 {
        let frame = tokio::time::timeout(Duration::from_secs(10), from_server.next())
            .await
            .unwrap();
        match frame {
            Some(Message::Binary(data)) => seen.push_str(&String::from_utf8_lossy(&data)),
            Some(Message::Text(text)) => panic!("terminal failed: {text}"),
            Some(_) => {}
            None => panic!("socket closed; saw {seen:?}"),
        }
    }

    to_server.unbounded_send(Ok(Message::Close(None))).unwrap();
    assert_eq!(task.await.unwrap(), BridgeState::Closed);

    let records = audit.records();
    assert_eq!(records.len(), 1);
    let recording = read_recording(records[0].record.recording_path.as_ref()).unwrap();
    let output: String = recording
        .events
        .iter()
        .filter(|e| e.kind() == EventKind::Output)
        .map(|e| e.data())
        .collect();
    assert!(output.contains("hi\r\n"));
}

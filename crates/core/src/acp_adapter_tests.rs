// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn permission_request_respond_delivers_choice() {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = PermissionRequest {
        request_id: "r1".to_owned(),
        tool_call_id: "t1".to_owned(),
        options: vec![PermissionOption { id: "allow".to_owned(), label: "Allow".to_owned() }],
        reply: reply_tx,
    };
    request.respond("allow");
    assert_eq!(reply_rx.await.unwrap(), "allow");
}

#[tokio::test]
async fn spawn_fails_fast_on_empty_command() {
    let binding = AcpBinding { name: "empty".to_owned(), command: vec![] };
    let err = AcpAdapter::spawn(&binding, Path::new("."), Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, AdapterError::NoCommand));
}

#[tokio::test]
async fn spawn_fails_on_nonexistent_binary() {
    let binding = AcpBinding {
        name: "nope".to_owned(),
        command: vec!["/definitely/does/not/exist/on/this/machine".to_owned()],
    };
    let err = AcpAdapter::spawn(&binding, Path::new("."), Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, AdapterError::Spawn(_)));
}

#[test]
fn error_messages_are_human_readable() {
    assert_eq!(AdapterError::NoCommand.to_string(), "agent binding has no command");
    assert_eq!(
        AdapterError::Timeout(Duration::from_secs(10)).to_string(),
        "ACP handshake timed out after 10s"
    );
}

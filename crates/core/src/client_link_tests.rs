// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;

use super::*;

fn link(capacity: usize) -> (ClientLink, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ClientLink::new("sess-1", "client-1", tx, CancellationToken::new()), rx)
}

#[test]
fn client_id_and_session_id_are_exposed() {
    let (link, _rx) = link(4);
    assert_eq!(link.client_id(), "client-1");
    assert_eq!(link.session_id(), "sess-1");
}

#[tokio::test]
async fn on_agent_message_forwards_a_server_message() {
    let (link, mut rx) = link(4);
    link.on_agent_message(3, "<p>hi</p>");
    let msg = rx.recv().await.expect("message");
    match msg {
        ServerMessage::AgentMessage { seq, html } => {
            assert_eq!(seq, 3);
            assert_eq!(html, "<p>hi</p>");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn on_error_maps_error_kind_to_its_wire_string() {
    let (link, mut rx) = link(4);
    link.on_error("boom", Some(ErrorKind::PromptInProgress));
    let msg = rx.try_recv().expect("message");
    match msg {
        ServerMessage::Error { message, kind } => {
            assert_eq!(message, "boom");
            assert_eq!(kind.as_deref(), Some("prompt_in_progress"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn overflowing_the_outbound_queue_closes_the_link() {
    let (link, _rx) = link(1);
    link.on_acp_started();
    link.on_acp_started();
    assert!(link.is_closed());
}

#[test]
fn on_close_cancels_without_sending_a_message() {
    let (link, mut rx) = link(4);
    link.on_close("detached");
    assert!(link.is_closed());
    assert!(rx.try_recv().is_err());
}

#[test]
fn last_sent_seq_round_trips() {
    let (link, _rx) = link(4);
    assert_eq!(link.last_sent_seq(), 0);
    link.set_last_sent_seq(9);
    assert_eq!(link.last_sent_seq(), 9);
}

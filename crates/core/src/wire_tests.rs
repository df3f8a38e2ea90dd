// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn prompt_round_trips_with_camel_case_fields() {
    let json = r#"{"type":"prompt","data":{"promptId":"p1","text":"hi","imageIds":["a"]}}"#;
    let msg: ClientMessage = serde_json::from_str(json).expect("parse");
    match msg {
        ClientMessage::Prompt { prompt_id, text, image_ids } => {
            assert_eq!(prompt_id, "p1");
            assert_eq!(text, "hi");
            assert_eq!(image_ids, vec!["a".to_owned()]);
        }
        other => panic!("unexpected variant: {other:?}"),
    }
}

#[test]
fn load_events_defaults_are_all_none() {
    let json = r#"{"type":"load_events","data":{}}"#;
    let msg: ClientMessage = serde_json::from_str(json).expect("parse");
    match msg {
        ClientMessage::LoadEvents { after_seq, before_seq, limit } => {
            assert_eq!(after_seq, None);
            assert_eq!(before_seq, None);
            assert_eq!(limit, None);
        }
        other => panic!("unexpected variant: {other:?}"),
    }
}

#[test]
fn cancel_has_no_data_field_requirement() {
    let msg: ClientMessage = serde_json::from_str(r#"{"type":"cancel"}"#).expect("parse");
    assert!(matches!(msg, ClientMessage::Cancel));
}

#[test]
fn agent_message_serializes_with_envelope_and_camel_case() {
    let msg = ServerMessage::AgentMessage { seq: 4, html: "<p>hi</p>".to_owned() };
    let json = serde_json::to_value(&msg).expect("serialize");
    assert_eq!(json["type"], "agent_message");
    assert_eq!(json["data"]["seq"], 4);
    assert_eq!(json["data"]["html"], "<p>hi</p>");
}

#[test]
fn keepalive_ack_carries_server_max_seq() {
    let msg = ServerMessage::KeepaliveAck { client_time: 100, server_time: 200, server_max_seq: 42 };
    let json = serde_json::to_value(&msg).expect("serialize");
    assert_eq!(json["data"]["serverMaxSeq"], 42);
}

#[test]
fn error_omits_kind_when_none() {
    let msg = ServerMessage::Error { message: "boom".to_owned(), kind: None };
    let json = serde_json::to_value(&msg).expect("serialize");
    assert!(json["data"].get("kind").is_none());
}

#[test]
fn wire_event_splits_kind_and_payload_from_flattened_event() {
    let event = crate::event::Event::new(
        7,
        crate::event::EventKind::ToolCall {
            id: "t1".to_owned(),
            title: "Read file".to_owned(),
            status: ToolCallStatus::Running,
        },
    );
    let wire = WireEvent::from_event(&event);
    assert_eq!(wire.seq, 7);
    assert_eq!(wire.kind, "tool_call");
    assert_eq!(wire.payload["id"], "t1");
}

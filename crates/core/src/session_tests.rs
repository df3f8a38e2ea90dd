// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::acp_adapter::AdapterEvent;
use crate::config::{Config, QueueConfig};
use crate::error::ErrorKind;
use crate::event::ToolCallStatus;
use crate::queue::WorkspaceQueue;
use crate::store::{AcpBinding, Metadata, Store};
use crate::test_support::{Recorded, RecordingObserver};

use super::*;

fn meta(id: &str) -> Metadata {
    Metadata {
        id: id.to_owned(),
        name: "test session".into(),
        working_dir: PathBuf::from("/tmp"),
        acp: AcpBinding { name: "none".into(), command: vec![] },
        created_at: chrono::Utc::now(),
        archived: false,
        archived_at: None,
        last_seq: 0,
        advanced_settings: crate::settings::defaults(),
    }
}

async fn new_session(dir: &std::path::Path, id: &str) -> Arc<BackgroundSession> {
    let store = Arc::new(Store::new(dir));
    let config = Arc::new(Config::parse_from(["mitto", "--data-dir", &dir.to_string_lossy()]));
    let m = meta(id);
    store.create(&m).await.expect("create session");
    let params = SessionParams { store, config, workspace_queue: None };
    BackgroundSession::start_for_test(params, m).await.expect("start session")
}

async fn new_session_with_queue(
    dir: &std::path::Path,
    id: &str,
    queue: Arc<WorkspaceQueue>,
) -> Arc<BackgroundSession> {
    let store = Arc::new(Store::new(dir));
    let config = Arc::new(Config::parse_from(["mitto", "--data-dir", &dir.to_string_lossy()]));
    let m = meta(id);
    store.create(&m).await.expect("create session");
    let params = SessionParams { store, config, workspace_queue: Some(queue) };
    BackgroundSession::start_for_test(params, m).await.expect("start session")
}

#[tokio::test]
async fn attach_with_no_history_delivers_nothing_and_no_acp_started() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = new_session(dir.path(), "s1").await;
    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;
    assert!(observer.is_empty());
}

#[tokio::test]
async fn submit_prompt_without_an_adapter_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = new_session(dir.path(), "s1").await;
    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;

    session.submit_prompt("client-1", "p1", "hello", vec![]).await;

    let recorded = observer.recorded();
    assert!(matches!(&recorded[0], Recorded::UserPrompt { text, is_mine: true, .. } if text == "hello"));
    assert!(matches!(&recorded[1], Recorded::PromptReceived { prompt_id } if prompt_id == "p1"));
    assert!(recorded.iter().any(|r| matches!(r, Recorded::Error { kind: Some(ErrorKind::AgentExited), .. })));
    assert!(recorded.iter().any(|r| matches!(r, Recorded::AcpStopped { reason } if reason == "agent_exit")));
    assert!(recorded.iter().any(|r| matches!(r, Recorded::Close { reason } if reason == "agent_exit")));
}

#[tokio::test]
async fn a_second_prompt_while_one_is_in_flight_is_rejected_locally() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = new_session(dir.path(), "s1").await;
    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;

    session.mark_prompting_for_test("p0", "client-1").await;
    session.submit_prompt("client-1", "p1", "second", vec![]).await;

    assert!(matches!(
        observer.recorded().last(),
        Some(Recorded::Error { kind: Some(ErrorKind::PromptInProgress), .. })
    ));
}

#[tokio::test]
async fn a_second_prompt_while_busy_is_queued_when_the_workspace_queue_is_enabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let queue = Arc::new(WorkspaceQueue::new(QueueConfig {
        enabled: true,
        delay_seconds: 0,
        max_size: 10,
        auto_generate_titles: false,
    }));
    let session = new_session_with_queue(dir.path(), "s1", Arc::clone(&queue)).await;
    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;

    session.mark_prompting_for_test("p0", "client-1").await;
    session.submit_prompt("client-1", "p1", "second", vec![]).await;

    assert!(matches!(
        observer.recorded().last(),
        Some(Recorded::PromptReceived { prompt_id }) if prompt_id == "p1"
    ));
    assert_eq!(queue.len().await, 1);
}

/// §8 S1 — receive-time sequencing: a tool call forces the
/// MarkdownBuffer to flush mid-message, cutting the first agent_message
/// at the tool call's arrival seq and starting the second one fresh.
#[tokio::test]
async fn s1_receive_time_sequencing_around_a_tool_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = new_session(dir.path(), "s1").await;
    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;

    session.begin_prompt_for_test("client-1", "p1", "Hello").await;
    session.inject_adapter_event_for_test(AdapterEvent::AgentMessageChunk { text: "Let me help…".into() }).await;
    session
        .inject_adapter_event_for_test(AdapterEvent::ToolCall {
            id: "t1".into(),
            title: "Read file".into(),
            status: ToolCallStatus::Running,
        })
        .await;
    session.inject_adapter_event_for_test(AdapterEvent::AgentMessageChunk { text: "I found…".into() }).await;
    session.inject_adapter_event_for_test(AdapterEvent::PromptComplete { cancelled: false }).await;

    let page = session.load_events(None, None, 100).await;
    let seqs: Vec<(u64, &str)> = page
        .events
        .iter()
        .map(|e| {
            let kind = match &e.kind {
                crate::event::EventKind::UserPrompt { .. } => "user_prompt",
                crate::event::EventKind::AgentMessage { .. } => "agent_message",
                crate::event::EventKind::ToolCall { .. } => "tool_call",
                crate::event::EventKind::PromptComplete { .. } => "prompt_complete",
                _ => "other",
            };
            (e.seq, kind)
        })
        .collect();
    assert_eq!(
        seqs,
        vec![
            (1, "user_prompt"),
            (2, "agent_message"),
            (3, "tool_call"),
            (4, "agent_message"),
            (5, "prompt_complete"),
        ]
    );
}

/// §8 S2 — coalescing: three uninterrupted chunks collapse into one
/// persisted `agent_message` carrying the first chunk's `seq`.
#[tokio::test]
async fn s2_uninterrupted_chunks_coalesce_into_one_event() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = new_session(dir.path(), "s1").await;
    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;

    session.begin_prompt_for_test("client-1", "p1", "go").await;
    for chunk in ["A", "B", "C"] {
        session.inject_adapter_event_for_test(AdapterEvent::AgentMessageChunk { text: chunk.into() }).await;
    }
    session.inject_adapter_event_for_test(AdapterEvent::PromptComplete { cancelled: false }).await;

    let page = session.load_events(None, None, 100).await;
    let agent_messages: Vec<&crate::event::Event> =
        page.events.iter().filter(|e| matches!(e.kind, crate::event::EventKind::AgentMessage { .. })).collect();
    assert_eq!(agent_messages.len(), 1);
    assert_eq!(agent_messages[0].seq, 2);
    let crate::event::EventKind::AgentMessage { html } = &agent_messages[0].kind else { unreachable!() };
    assert!(html.contains('A') && html.contains('B') && html.contains('C'));
}

/// §8 S6 — late observer: an observer attaching mid-stream replays
/// everything up to its `last_sent_seq` then joins the live stream, with
/// no event delivered twice.
#[tokio::test]
async fn s6_late_observer_gets_replay_then_live_with_no_duplicates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = new_session(dir.path(), "s1").await;
    let early = Arc::new(RecordingObserver::new("early"));
    session.attach(early.clone()).await;

    session.begin_prompt_for_test("early", "p1", "go").await;
    session
        .inject_adapter_event_for_test(AdapterEvent::ToolCall {
            id: "t1".into(),
            title: "step one".into(),
            status: ToolCallStatus::Running,
        })
        .await;
    session
        .inject_adapter_event_for_test(AdapterEvent::ToolCall {
            id: "t2".into(),
            title: "step two".into(),
            status: ToolCallStatus::Running,
        })
        .await;
    session
        .inject_adapter_event_for_test(AdapterEvent::ToolCall {
            id: "t3".into(),
            title: "step three".into(),
            status: ToolCallStatus::Running,
        })
        .await;

    let late = Arc::new(RecordingObserver::new("late"));
    session.attach(late.clone()).await;

    session
        .inject_adapter_event_for_test(AdapterEvent::ToolCall {
            id: "t4".into(),
            title: "step four".into(),
            status: ToolCallStatus::Running,
        })
        .await;
    session.inject_adapter_event_for_test(AdapterEvent::PromptComplete { cancelled: false }).await;

    let late_seqs: Vec<u64> = late
        .recorded()
        .iter()
        .filter_map(|r| match r {
            Recorded::ToolCall { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();
    // t1..t4 replayed/live, strictly increasing, no duplicates.
    let mut sorted = late_seqs.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(late_seqs, sorted);
    assert_eq!(late_seqs.len(), 4);
}

/// §8 S5 — archive-while-prompting: a prompt still in flight when the
/// timeout elapses forces the close and reports `archived_timeout`.
#[tokio::test]
async fn s5_archive_while_prompting_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::new(dir.path()));
    let config = Arc::new(Config::parse_from([
        "mitto",
        "--data-dir",
        &dir.path().to_string_lossy(),
        "--archive-timeout-secs",
        "1",
    ]));
    let m = meta("s1");
    store.create(&m).await.expect("create session");
    let params = SessionParams { store, config, workspace_queue: None };
    let session = BackgroundSession::start_for_test(params, m).await.expect("start session");

    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;
    session.mark_prompting_for_test("p1", "client-1").await;

    let graceful = session.archive().await;
    assert!(!graceful);
    assert!(observer.recorded().iter().any(|r| matches!(r, Recorded::AcpStopped { reason } if reason == "archived_timeout")));
}

#[tokio::test]
async fn load_events_returns_persisted_history_forward() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = new_session(dir.path(), "s1").await;
    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;
    session.submit_prompt("client-1", "p1", "hello", vec![]).await;

    let page = session.load_events(None, None, 10).await;
    assert!(!page.events.is_empty());
    assert_eq!(page.events[0].seq, 1);
    assert!(!page.is_prepend);
}

#[tokio::test]
async fn detach_is_idempotent_and_removes_the_observer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = new_session(dir.path(), "s1").await;
    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;

    session.detach("client-1").await;
    session.detach("client-1").await; // idempotent, no panic

    assert!(matches!(observer.recorded().last(), Some(Recorded::Close { reason }) if reason == "detached"));
}

#[tokio::test]
async fn update_settings_merges_into_metadata_and_notifies_observers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = new_session(dir.path(), "s1").await;
    let observer = Arc::new(RecordingObserver::new("client-1"));
    session.attach(observer.clone()).await;

    let mut update = std::collections::BTreeMap::new();
    update.insert("auto_approve_edits".to_owned(), true);
    let merged = session.update_settings(&update).await;

    assert_eq!(merged.get("auto_approve_edits"), Some(&true));
    assert!(observer
        .recorded()
        .iter()
        .any(|r| matches!(r, Recorded::SessionSettingsUpdated { settings } if settings.get("auto_approve_edits") == Some(&true))));
}

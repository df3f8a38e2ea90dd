// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn config(enabled: bool, max_size: usize, auto_titles: bool) -> QueueConfig {
    QueueConfig { enabled, delay_seconds: 5, max_size, auto_generate_titles: auto_titles }
}

#[tokio::test]
async fn enqueue_then_drain_fifo_order() {
    let queue = WorkspaceQueue::new(config(true, 10, false));
    queue.enqueue("s1", "q1", "first", vec![]).await.unwrap();
    queue.enqueue("s1", "q2", "second", vec![]).await.unwrap();

    let first = queue.drain_one("s1").await.unwrap();
    assert_eq!(first.id, "q1");
    let second = queue.drain_one("s1").await.unwrap();
    assert_eq!(second.id, "q2");
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn drain_one_only_returns_entries_for_requested_session() {
    let queue = WorkspaceQueue::new(config(true, 10, false));
    queue.enqueue("s1", "q1", "for s1", vec![]).await.unwrap();
    queue.enqueue("s2", "q2", "for s2", vec![]).await.unwrap();

    let entry = queue.drain_one("s2").await.unwrap();
    assert_eq!(entry.session_id, "s2");
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn disabled_queue_rejects_enqueue() {
    let queue = WorkspaceQueue::new(config(false, 10, false));
    let err = queue.enqueue("s1", "q1", "text", vec![]).await.unwrap_err();
    assert_eq!(err, QueueError::Disabled);
}

#[tokio::test]
async fn full_queue_rejects_enqueue() {
    let queue = WorkspaceQueue::new(config(true, 1, false));
    queue.enqueue("s1", "q1", "text", vec![]).await.unwrap();
    let err = queue.enqueue("s1", "q2", "text", vec![]).await.unwrap_err();
    assert_eq!(err, QueueError::Full);
}

#[tokio::test]
async fn auto_generate_titles_produces_heuristic_label() {
    let queue = WorkspaceQueue::new(config(true, 10, true));
    let entry = queue.enqueue("s1", "q1", "please refactor the login flow", vec![]).await.unwrap();
    assert_eq!(entry.title.as_deref(), Some("please refactor the login flow"));
}

#[test]
fn heuristic_title_truncates_long_prompts() {
    let text = "one two three four five six seven eight nine ten";
    let title = heuristic_title(text);
    assert_eq!(title, "one two three four five six seven eight");
}

#[test]
fn heuristic_title_falls_back_on_empty_text() {
    assert_eq!(heuristic_title("   "), "Queued prompt");
}

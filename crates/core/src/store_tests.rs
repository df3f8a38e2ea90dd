// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::event::{Event, EventKind};

use super::*;

fn meta(id: &str) -> Metadata {
    Metadata {
        id: id.to_owned(),
        name: "test session".into(),
        working_dir: PathBuf::from("/tmp"),
        acp: AcpBinding { name: "claude".into(), command: vec!["claude-code".into()] },
        created_at: chrono::Utc::now(),
        archived: false,
        archived_at: None,
        last_seq: 0,
        advanced_settings: Default::default(),
    }
}

#[tokio::test]
async fn create_and_read_metadata() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path());
    let m = meta("s1");
    store.create(&m).await?;
    let loaded = store.get_metadata("s1").await?;
    assert_eq!(loaded.id, "s1");
    assert_eq!(loaded.last_seq, 0);
    Ok(())
}

#[tokio::test]
async fn create_twice_fails() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path());
    store.create(&meta("s1")).await?;
    let err = store.create(&meta("s1")).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
    Ok(())
}

#[tokio::test]
async fn append_event_advances_last_seq_and_is_readable() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path());
    store.create(&meta("s1")).await?;

    let e1 = Event::new(1, EventKind::UserPrompt { prompt_id: "p1".into(), text: "hi".into() });
    store.append_event("s1", &e1).await?;
    let e2 = Event::new(2, EventKind::AgentMessage { html: "<p>hi</p>".into() });
    store.append_event("s1", &e2).await?;

    let meta = store.get_metadata("s1").await?;
    assert_eq!(meta.last_seq, 2);

    let events = store.read_events_after("s1", 0, 10).await?;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[1].seq, 2);
    Ok(())
}

#[tokio::test]
async fn read_events_after_filters_and_caps_limit() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path());
    store.create(&meta("s1")).await?;
    for seq in 1..=5u64 {
        let e = Event::new(seq, EventKind::AgentThought { text: format!("t{seq}") });
        store.append_event("s1", &e).await?;
    }
    let after = store.read_events_after("s1", 2, 10).await?;
    assert_eq!(after.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 4, 5]);

    let capped = store.read_events_after("s1", 0, 2).await?;
    assert_eq!(capped.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn replay_from_seq_minus_one_returns_that_event() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path());
    store.create(&meta("s1")).await?;
    let e = Event::new(7, EventKind::AgentThought { text: "thinking".into() });
    store.append_event("s1", &e).await?;
    let replayed = store.read_events_after("s1", 6, 10).await?;
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].seq, 7);
    Ok(())
}

#[tokio::test]
async fn load_events_is_idempotent_over_a_quiescent_session() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path());
    store.create(&meta("s1")).await?;
    for seq in 1..=3u64 {
        let e = Event::new(seq, EventKind::AgentThought { text: format!("t{seq}") });
        store.append_event("s1", &e).await?;
    }
    let first = store.read_events_after("s1", 0, 10).await?;
    let second = store.read_events_after("s1", 0, 10).await?;
    assert_eq!(
        first.iter().map(|e| e.seq).collect::<Vec<_>>(),
        second.iter().map(|e| e.seq).collect::<Vec<_>>()
    );
    Ok(())
}

#[tokio::test]
async fn lock_roundtrip_and_steal_after_stale_and_dead() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path());
    store.create(&meta("s1")).await?;

    let lock = store
        .try_acquire_lock("s1", Duration::from_millis(20), Duration::from_secs(30))
        .await?;

    // A second acquire fails while the first is held (not stale yet).
    let err = store
        .try_acquire_lock("s1", Duration::from_millis(20), Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Locked(_)));

    lock.release().await;

    // Lock file removed on release, so a fresh acquire succeeds immediately.
    let second = store
        .try_acquire_lock("s1", Duration::from_millis(20), Duration::from_secs(30))
        .await?;
    second.release().await;
    Ok(())
}

#[tokio::test]
async fn heartbeat_detects_foreign_pid_and_flags_stolen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path());
    store.create(&meta("s1")).await?;

    let lock = store
        .try_acquire_lock("s1", Duration::from_millis(10), Duration::from_secs(30))
        .await?;
    let mut stolen = lock.stolen_receiver();
    assert!(!*stolen.borrow());

    // Simulate another process winning a race and overwriting `.lock` with
    // its own pid, as it would after judging our heartbeat stale.
    let foreign = LockFile { pid: std::process::id().wrapping_add(1), host: "other-host".into(), heartbeat: chrono::Utc::now() };
    fs::write(lock.path(), serde_json::to_vec(&foreign)?)?;

    tokio::time::timeout(Duration::from_secs(2), stolen.wait_for(|s| *s)).await??;
    Ok(())
}

#[tokio::test]
async fn delete_removes_session_entirely() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path());
    store.create(&meta("s1")).await?;
    store.delete("s1").await?;
    assert!(store.get_metadata("s1").await.is_err());
    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use crate::store::{AcpBinding, Store, StoreError};

use super::*;

fn config(dir: &std::path::Path, queue_enabled: bool) -> Arc<Config> {
    let mut args = vec!["mitto".to_owned(), "--data-dir".to_owned(), dir.to_string_lossy().into_owned()];
    if !queue_enabled {
        args.push("--queue-enabled".to_owned());
        args.push("false".to_owned());
    }
    Arc::new(Config::parse_from(&args))
}

fn manager(dir: &std::path::Path, queue_enabled: bool) -> SessionManager {
    let store = Arc::new(Store::new(dir));
    SessionManager::new(store, config(dir, queue_enabled))
}

fn acp() -> AcpBinding {
    AcpBinding { name: "nope".to_owned(), command: vec!["/definitely/does/not/exist".to_owned()] }
}

#[tokio::test]
async fn resume_of_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager(dir.path(), true);
    let err = mgr.resume_session("does-not-exist").await.unwrap_err();
    assert!(matches!(err, SessionError::Store(StoreError::NotFound(_))));
}

#[tokio::test]
async fn delete_of_unresident_unknown_session_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager(dir.path(), true);
    let err = mgr.delete_session("does-not-exist").await.unwrap_err();
    assert!(matches!(err, SessionError::Store(StoreError::NotFound(_))));
}

#[tokio::test]
async fn create_session_with_unspawnable_agent_fails_but_remembers_the_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager(dir.path(), true);
    let working_dir = PathBuf::from("/tmp/mitto-test-workspace");

    let err = mgr.create_session("demo".to_owned(), working_dir.clone(), acp()).await.unwrap_err();
    assert!(matches!(err, SessionError::Adapter(_)));

    let workspaces = mgr.workspaces().await;
    assert!(workspaces.contains(&Workspace { working_dir, acp: acp() }));
    assert!(mgr.get("demo").await.is_none());
}

#[tokio::test]
async fn queue_for_respects_the_enabled_flag() {
    let dir = tempfile::tempdir().expect("tempdir");
    let disabled = manager(dir.path(), false);
    let workspace = Workspace { working_dir: PathBuf::from("/tmp/ws"), acp: acp() };
    assert!(disabled.queue_for(&workspace).await.is_none());

    let enabled = manager(dir.path(), true);
    let queue = enabled.queue_for(&workspace).await.expect("queue");
    assert!(queue.is_empty().await);

    let same_queue = enabled.queue_for(&workspace).await.expect("queue");
    assert!(Arc::ptr_eq(&queue, &same_queue));
}

#[tokio::test]
async fn manager_events_are_observable_via_subscribe() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mgr = manager(dir.path(), true);
    let mut events = mgr.subscribe();
    let _ = mgr.events.send(ManagerEvent::SessionDeleted { id: "s1".to_owned() });
    let event = events.recv().await.expect("event");
    assert!(matches!(event, ManagerEvent::SessionDeleted { id } if id == "s1"));
}

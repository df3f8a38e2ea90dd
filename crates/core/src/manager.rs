// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`SessionManager`] (§4.5): the concurrent registry of live
//! [`BackgroundSession`]s, the workspace set, and the per-workspace
//! [`WorkspaceQueue`] map.
//!
//! Grounded directly on the teacher's `MuxState` (`mux/src/state.rs`):
//! `sessions: RwLock<HashMap<...>>` plus a broadcast `Aggregator` fanning
//! out lifecycle events to `/api/events` subscribers. The workspace set
//! adds nothing the teacher has an analogue for, so it's a plain
//! `RwLock<HashSet<Workspace>>` with an injected save function (the
//! external collaborator named in §4.5) rather than a teacher-shaped
//! abstraction stretched to fit.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{Config, QueueConfig};
use crate::queue::WorkspaceQueue;
use crate::session::{BackgroundSession, SessionError, SessionParams};
use crate::store::{AcpBinding, Store};

/// A working directory paired with the agent binding used in it. Sessions
/// created against the same `Workspace` share one [`WorkspaceQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Workspace {
    pub working_dir: PathBuf,
    pub acp: AcpBinding,
}

/// Injected collaborator that persists the workspace set to whatever
/// external store the host application uses (§4.5: "manager does not read
/// or write workspace files itself").
pub type WorkspaceSaveFn = Arc<dyn Fn(&HashSet<Workspace>) -> anyhow::Result<()> + Send + Sync>;

/// Session-lifecycle notifications broadcast on `/api/events` (§6). The
/// core only produces `SessionCreated`/`SessionDeleted`; `SessionRenamed`
/// is carried for the host application's benefit (§6: renaming "is not
/// part of the core specified here"), never emitted by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerEvent {
    SessionCreated { id: String, name: String },
    SessionDeleted { id: String },
    SessionRenamed { id: String, name: String },
}

fn workspace_key(working_dir: &PathBuf, acp: &AcpBinding) -> Workspace {
    Workspace { working_dir: working_dir.clone(), acp: acp.clone() }
}

/// The registry of live sessions, grounded on `MuxState.sessions`.
pub struct SessionManager {
    store: Arc<Store>,
    config: Arc<Config>,
    sessions: RwLock<HashMap<String, Arc<BackgroundSession>>>,
    workspaces: RwLock<HashSet<Workspace>>,
    workspace_save: Option<WorkspaceSaveFn>,
    queues: RwLock<HashMap<Workspace, Arc<WorkspaceQueue>>>,
    events: broadcast::Sender<ManagerEvent>,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, config: Arc<Config>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            config,
            sessions: RwLock::new(HashMap::new()),
            workspaces: RwLock::new(HashSet::new()),
            workspace_save: None,
            queues: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn with_workspace_save(mut self, save: WorkspaceSaveFn) -> Self {
        self.workspace_save = Some(save);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<BackgroundSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn is_resident(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    async fn queue_for(&self, workspace: &Workspace) -> Option<Arc<WorkspaceQueue>> {
        if !self.config.queue_enabled {
            return None;
        }
        if let Some(queue) = self.queues.read().await.get(workspace) {
            return Some(Arc::clone(queue));
        }
        let mut queues = self.queues.write().await;
        let queue =
            Arc::clone(queues.entry(workspace.clone()).or_insert_with(|| {
                Arc::new(WorkspaceQueue::new(QueueConfig::from_config(&self.config)))
            }));
        Some(queue)
    }

    fn params(&self, workspace_queue: Option<Arc<WorkspaceQueue>>) -> SessionParams {
        SessionParams { store: Arc::clone(&self.store), config: Arc::clone(&self.config), workspace_queue }
    }

    /// Create a brand-new session and insert it into the registry,
    /// recording its workspace.
    pub async fn create_session(
        &self,
        name: String,
        working_dir: PathBuf,
        acp: AcpBinding,
    ) -> Result<Arc<BackgroundSession>, SessionError> {
        let workspace = workspace_key(&working_dir, &acp);
        self.remember_workspace(workspace.clone()).await;
        let queue = self.queue_for(&workspace).await;
        let session = BackgroundSession::spawn_new(self.params(queue), name, working_dir, acp).await?;
        let meta = session.metadata().await;
        self.sessions.write().await.insert(session.id().to_owned(), Arc::clone(&session));
        let _ = self.events.send(ManagerEvent::SessionCreated { id: meta.id, name: meta.name });
        Ok(session)
    }

    async fn remember_workspace(&self, workspace: Workspace) {
        let mut inserted = false;
        {
            let mut workspaces = self.workspaces.write().await;
            if workspaces.insert(workspace) {
                inserted = true;
            }
        }
        if inserted {
            if let Some(save) = &self.workspace_save {
                let workspaces = self.workspaces.read().await.clone();
                if let Err(e) = save(&workspaces) {
                    warn!(error = %e, "failed to persist workspace set");
                }
            }
        }
    }

    /// Resume an already-created, non-archived session (§4.5
    /// ResumeSession). Expensive (spawns a subprocess), so the registry is
    /// not locked while it runs; a dedup check after the fact closes
    /// whichever of two racing resumes loses.
    pub async fn resume_session(&self, session_id: &str) -> Result<Arc<BackgroundSession>, SessionError> {
        if let Some(existing) = self.get(session_id).await {
            return Ok(existing);
        }

        let meta = self.store.get_metadata(session_id).await.map_err(SessionError::from)?;
        let workspace = workspace_key(&meta.working_dir, &meta.acp);
        let queue = self.queue_for(&workspace).await;
        let candidate = BackgroundSession::resume(self.params(queue), session_id).await?;

        let mut sessions = self.sessions.write().await;
        if let Some(winner) = sessions.get(session_id) {
            let winner = Arc::clone(winner);
            drop(sessions);
            candidate.close_gracefully("duplicate_session", Duration::from_secs(0)).await;
            return Ok(winner);
        }
        sessions.insert(session_id.to_owned(), Arc::clone(&candidate));
        Ok(candidate)
    }

    /// Bring an archived session back online.
    pub async fn unarchive_session(&self, session_id: &str) -> Result<Arc<BackgroundSession>, SessionError> {
        if let Some(existing) = self.get(session_id).await {
            return Ok(existing);
        }
        let meta = self.store.get_metadata(session_id).await.map_err(SessionError::from)?;
        let workspace = workspace_key(&meta.working_dir, &meta.acp);
        let queue = self.queue_for(&workspace).await;
        let session = BackgroundSession::unarchive(self.params(queue), session_id).await?;

        let mut sessions = self.sessions.write().await;
        if let Some(winner) = sessions.get(session_id) {
            let winner = Arc::clone(winner);
            drop(sessions);
            session.close_gracefully("duplicate_session", Duration::from_secs(0)).await;
            return Ok(winner);
        }
        sessions.insert(session_id.to_owned(), Arc::clone(&session));
        Ok(session)
    }

    /// Close a session, waiting up to `grace` for an in-flight prompt to
    /// finish (§4.5 CloseSessionGracefully). Returns `true` if the close
    /// was graceful.
    pub async fn close_session_gracefully(&self, session_id: &str, reason: &str, grace: Duration) -> bool {
        let Some(session) = self.sessions.write().await.remove(session_id) else {
            return true;
        };
        session.close_gracefully(reason, grace).await
    }

    /// Permanently delete a session: close it if resident, then remove its
    /// on-disk directory.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.close_session_gracefully(session_id, "deleted", Duration::from_secs(0)).await;
        self.store.delete(session_id).await.map_err(SessionError::from)?;
        let _ = self.events.send(ManagerEvent::SessionDeleted { id: session_id.to_owned() });
        Ok(())
    }

    pub async fn workspaces(&self) -> HashSet<Workspace> {
        self.workspaces.read().await.clone()
    }

    /// Close every resident session, bounding the whole shutdown to
    /// `grace` total rather than `grace` per session (the caller is
    /// usually a signal handler racing a forced-exit timeout).
    pub async fn shutdown_all(&self, grace: Duration) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        let deadline = timeout(grace, async {
            for id in ids {
                self.close_session_gracefully(&id, "server_shutdown", grace).await;
            }
        });
        if deadline.await.is_err() {
            warn!("session shutdown did not complete within the grace period");
        } else {
            info!("all sessions closed");
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session store (§4.1): append-only event log, atomic metadata,
//! and an exclusive heartbeat lock, all rooted at one directory per
//! session under [`Config::data_dir`](crate::config::Config::data_dir).
//!
//! Grounded on the coalescing of two teacher idioms: `EventLog`'s
//! append-and-reread JSONL pattern, extended here with per-line fsync and
//! an offset-bounded read so a reader never trips over a partial final
//! line (§5 "Store: per-session mutex for writes; reads may proceed
//! without the write mutex"); and the credential persister's
//! write-temp-then-rename idiom, extended with an explicit fsync before
//! rename since metadata durability is load-bearing here (§4.1
//! AppendEvent: "fsyncs, then atomically rewrites metadata.json").

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

const EVENTS_FILE: &str = "events.jsonl";
const METADATA_FILE: &str = "metadata.json";
const LOCK_FILE: &str = ".lock";
const ACTION_BUTTONS_FILE: &str = "action_buttons.json";

/// Generate a sortable session id: millisecond-epoch prefix (fixed width,
/// so lexicographic order is chronological) plus a short random suffix to
/// disambiguate ids minted within the same millisecond (§3 "timestamp-
/// plus-random, sortable").
pub fn new_session_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix: u32 = rand::rng().random();
    format!("{millis:013}-{suffix:08x}")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcpBinding {
    pub name: String,
    pub command: Vec<String>,
}

/// `metadata.json` (§6 "Metadata schema").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub name: String,
    pub working_dir: PathBuf,
    pub acp: AcpBinding,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_seq: u64,
    pub advanced_settings: std::collections::BTreeMap<String, bool>,
}

/// `.lock` (§3 "Lock").
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockFile {
    pid: u32,
    host: String,
    heartbeat: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session already exists: {0}")]
    AlreadyExists(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session locked by another process (pid {0})")]
    Locked(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only per-session persistence.
///
/// One `Store` serves every session; per-session mutual exclusion over
/// writes is provided by an internal map of per-session `tokio::sync::Mutex`
/// guards rather than one global lock, so concurrent sessions never
/// serialize on each other's fsyncs.
pub struct Store {
    root: PathBuf,
    write_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), write_locks: AsyncMutex::new(HashMap::new()) }
    }

    /// Root directory all session directories live under. Exposed so
    /// collaborators that manage session-scoped side documents (action
    /// button cache) don't need their own copy of the path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    async fn write_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.write_locks.lock().await;
        Arc::clone(map.entry(session_id.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
    }

    /// Create a session directory and write its initial metadata.
    pub async fn create(&self, meta: &Metadata) -> StoreResult<()> {
        let dir = self.session_dir(&meta.id);
        if dir.exists() {
            return Err(StoreError::AlreadyExists(meta.id.clone()));
        }
        fs::create_dir_all(&dir)?;
        self.write_metadata(&dir, meta)?;
        File::create(dir.join(EVENTS_FILE))?;
        Ok(())
    }

    /// Append one event, fsync it, then atomically rewrite metadata with
    /// the new `last_seq`. Failure of either step is fatal for the caller's
    /// session runtime (§4.1, §7 "Store I/O failure").
    pub async fn append_event(
        &self,
        session_id: &str,
        event: &crate::event::Event,
    ) -> StoreResult<()> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(StoreError::NotFound(session_id.to_owned()));
        }
        let lock = self.write_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().create(true).append(true).open(dir.join(EVENTS_FILE))?;
        file.write_all(&line)?;
        file.sync_data()?;

        let mut meta = self.get_metadata(session_id).await?;
        meta.last_seq = event.seq;
        self.write_metadata(&dir, &meta)?;
        Ok(())
    }

    /// Read events with `seq > after_seq`, in order, capped at `limit`.
    pub async fn read_events_after(
        &self,
        session_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> StoreResult<Vec<crate::event::Event>> {
        let events = self.read_all_events(session_id)?;
        Ok(events.into_iter().filter(|e| e.seq > after_seq).take(limit).collect())
    }

    /// Read up to `limit` events with `seq < before_seq` (or all, if
    /// `before_seq` is `None`), returned in `seq` order — used for reverse
    /// pagination of older history.
    pub async fn read_events_last(
        &self,
        session_id: &str,
        limit: usize,
        before_seq: Option<u64>,
    ) -> StoreResult<Vec<crate::event::Event>> {
        let mut events = self.read_all_events(session_id)?;
        if let Some(before) = before_seq {
            events.retain(|e| e.seq < before);
        }
        let start = events.len().saturating_sub(limit);
        Ok(events.split_off(start))
    }

    /// Read every persisted event, tolerating a concurrently-appended
    /// trailing partial line by capturing the file length up front and
    /// only reading whole lines within it (§5 "readers read the file
    /// length first, then up to that offset").
    fn read_all_events(&self, session_id: &str) -> StoreResult<Vec<crate::event::Event>> {
        let path = self.session_dir(session_id).join(EVENTS_FILE);
        if !path.exists() {
            return Err(StoreError::NotFound(session_id.to_owned()));
        }
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut consumed: u64 = 0;
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = reader.read_line(&mut buf)?;
            if n == 0 {
                break;
            }
            consumed += n as u64;
            if consumed > len || !buf.ends_with('\n') {
                // Partial trailing line written concurrently; stop here.
                break;
            }
            let trimmed = buf.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<crate::event::Event>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => warn!("skipping malformed event line in {session_id}: {e}"),
            }
        }
        Ok(events)
    }

    pub async fn get_metadata(&self, session_id: &str) -> StoreResult<Metadata> {
        let path = self.session_dir(session_id).join(METADATA_FILE);
        let text = fs::read_to_string(&path).map_err(|_| StoreError::NotFound(session_id.to_owned()))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn update_metadata(&self, session_id: &str, meta: &Metadata) -> StoreResult<()> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(StoreError::NotFound(session_id.to_owned()));
        }
        self.write_metadata(&dir, meta)
    }

    /// Delete a session's directory entirely (§3 "destroyed by explicit
    /// delete"). The only maintenance/compaction-adjacent operation the
    /// store performs — logs are otherwise never rewritten or pruned.
    pub async fn delete(&self, session_id: &str) -> StoreResult<()> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(StoreError::NotFound(session_id.to_owned()));
        }
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    fn write_metadata(&self, dir: &Path, meta: &Metadata) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(meta)?;
        let tmp_path = dir.join(format!("{METADATA_FILE}.tmp"));
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, dir.join(METADATA_FILE))?;
        Ok(())
    }

    /// Acquire the session's exclusive lock, writing `.lock` only if absent
    /// or stealable. Spawns a background heartbeat task bound to the
    /// returned handle's lifetime.
    pub async fn try_acquire_lock(
        &self,
        session_id: &str,
        heartbeat_interval: Duration,
        stale_threshold: Duration,
    ) -> StoreResult<SessionLock> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(StoreError::NotFound(session_id.to_owned()));
        }
        let lock_path = dir.join(LOCK_FILE);
        if let Ok(text) = fs::read_to_string(&lock_path) {
            if let Ok(existing) = serde_json::from_str::<LockFile>(&text) {
                if !is_stealable(&existing, stale_threshold) {
                    return Err(StoreError::Locked(existing.pid));
                }
                debug!(pid = existing.pid, "stealing stale session lock");
            }
        }

        let pid = std::process::id();
        let host = hostname();
        let lock = LockFile { pid, host, heartbeat: chrono::Utc::now() };
        let json = serde_json::to_vec(&lock)?;
        fs::write(&lock_path, json)?;

        let alive = Arc::new(AtomicBool::new(true));
        let (stolen_tx, stolen_rx) = tokio::sync::watch::channel(false);
        let heartbeat_path = lock_path.clone();
        let heartbeat_alive = Arc::clone(&alive);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            loop {
                interval.tick().await;
                if !heartbeat_alive.load(Ordering::Acquire) {
                    break;
                }
                // §7 "Lock stolen": another process may have judged our
                // heartbeat stale and overwritten `.lock` with its own pid.
                // Check before clobbering it with ours, so we notice rather
                // than silently winning a second, conflicting write.
                if let Ok(text) = fs::read_to_string(&heartbeat_path) {
                    if let Ok(existing) = serde_json::from_str::<LockFile>(&text) {
                        if existing.pid != pid {
                            warn!(pid, stolen_by = existing.pid, "session lock was stolen");
                            let _ = stolen_tx.send(true);
                            break;
                        }
                    }
                }
                let beat = LockFile { pid, host: hostname(), heartbeat: chrono::Utc::now() };
                if let Ok(json) = serde_json::to_vec(&beat) {
                    let _ = fs::write(&heartbeat_path, json);
                }
            }
        });

        Ok(SessionLock { path: lock_path, alive, heartbeat_task: Some(handle), stolen: stolen_rx })
    }
}

fn is_stealable(lock: &LockFile, stale_threshold: Duration) -> bool {
    let age = chrono::Utc::now().signed_duration_since(lock.heartbeat);
    let stale = age
        > chrono::Duration::from_std(stale_threshold).unwrap_or(chrono::Duration::seconds(30));
    stale && !process_alive(lock.pid)
}

fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_owned())
}

/// RAII handle for a held session lock. Releasing stops the heartbeat task
/// and deletes `.lock`; dropping without an explicit release stops the
/// heartbeat but only best-effort-removes the file (no async drop).
pub struct SessionLock {
    path: PathBuf,
    alive: Arc<AtomicBool>,
    heartbeat_task: Option<tokio::task::JoinHandle<()>>,
    stolen: tokio::sync::watch::Receiver<bool>,
}

impl SessionLock {
    pub async fn release(mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        let _ = fs::remove_file(&self.path);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A receiver that flips to `true` once the heartbeat task observes
    /// another process's pid in `.lock` (§7 "Lock stolen"). Never flips for
    /// a lock that is cleanly released first — `release`/`drop` abort the
    /// heartbeat task without ever sending on this channel. Cloned out
    /// (rather than borrowed) so the caller can await it without holding
    /// whatever mutex the `SessionLock` itself lives behind.
    pub fn stolen_receiver(&self) -> tokio::sync::watch::Receiver<bool> {
        self.stolen.clone()
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
    }
}

/// Action-button cache (§4.4 "Action buttons"). A small separate document,
/// never part of the event log; deleted (not blanked) on clear per the
/// Open Question resolution in DESIGN.md.
pub struct ActionButtonStore;

impl ActionButtonStore {
    pub fn path(root: &Path, session_id: &str) -> PathBuf {
        root.join(session_id).join(ACTION_BUTTONS_FILE)
    }

    pub fn write(root: &Path, session_id: &str, buttons: &[crate::session::ActionButton]) -> StoreResult<()> {
        let path = Self::path(root, session_id);
        let json = serde_json::to_vec(buttons)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn read(root: &Path, session_id: &str) -> Vec<crate::session::ActionButton> {
        let path = Self::path(root, session_id);
        fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn clear(root: &Path, session_id: &str) {
        let _ = fs::remove_file(Self::path(root, session_id));
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `mitto` binary's HTTP + WebSocket surface (§6 "External
//! Interfaces"). Grounded on the teacher's `transport/mod.rs`
//! `build_router`/`auth_layer`/`ws_handler` triad, narrowed to the two
//! routes this core actually names: the per-session attach point and the
//! global lifecycle-events channel. No session CRUD, credential, or proxy
//! routes live here — those belong to whatever host application embeds
//! this core (§6: "it is not part of the core specified here").

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::manager::SessionManager;
use crate::store::Store;

/// Shared state for every route, handed to axum via `with_state`.
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub config: Arc<Config>,
    /// Needed directly (not just through `manager`) so the WebSocket handler
    /// can serve an archived session's read-only history (§7 "attach returns
    /// the persisted tail, no subprocess is respawned") without resuming it.
    pub store: Arc<Store>,
}

/// Build the axum `Router` (§6: `/api/sessions/{id}/ws`, `/api/events`).
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(http::health))
        .route("/api/sessions/{id}/ws", get(ws::ws_handler))
        .route("/api/events", get(ws::events_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

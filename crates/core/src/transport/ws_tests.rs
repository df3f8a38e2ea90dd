// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::http::StatusCode;
use clap::Parser;

use super::*;
use crate::config::Config;
use crate::manager::SessionManager;
use crate::store::Store;

fn app_state(dir: &std::path::Path) -> Arc<AppState> {
    let config = Arc::new(Config::parse_from(["mitto", "--data-dir", &dir.to_string_lossy()]));
    let store = Arc::new(Store::new(dir));
    let manager = Arc::new(SessionManager::new(Arc::clone(&store), Arc::clone(&config)));
    Arc::new(AppState { manager, config, store })
}

#[tokio::test]
async fn health_route_returns_ok() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let server = axum_test::TestServer::new(crate::transport::build_router(app_state(dir.path())))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let resp = server.get("/healthz").await;
    resp.assert_status_ok();
    assert!(resp.text().contains("\"status\":\"ok\""));
    Ok(())
}

#[test]
fn not_found_session_errors_map_to_http_404() {
    let response = session_error_response(SessionError::Store(StoreError::NotFound("s1".to_owned())));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn archived_session_errors_map_to_http_409() {
    let response = session_error_response(SessionError::Archived("s1".to_owned()));
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

//! Admin surface for the live system-message file.
//!
//! A tiny JSON API the operator uses to edit the base instructions the
//! prompt assembler re-reads every turn:
//!
//! - `GET  /api/system-message` — current text plus metadata
//! - `PUT  /api/system-message {"message": …}` — atomic replace
//! - `GET  /healthz` — liveness
//!
//! Reads and writes are bearer-token-gated when a token is configured;
//! writes use a temp-file-plus-rename swap so the prompt assembler never
//! sees a partial file.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::AssistantError;

/// Shared admin state.
pub struct AdminState {
    path: PathBuf,
    token: Option<String>,
}

impl AdminState {
    /// Create the state; ensures the backing file exists so metadata
    /// reads always succeed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn new(path: PathBuf, token: Option<String>) -> crate::error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AssistantError::Storage(format!("admin dir create failed: {e}")))?;
        }
        if !path.exists() {
            std::fs::write(&path, "")
                .map_err(|e| AssistantError::Storage(format!("admin file create failed: {e}")))?;
        }
        Ok(Self { path, token })
    }
}

/// PUT body.
#[derive(Debug, Deserialize)]
struct PutMessage {
    message: String,
}

/// Build the admin router.
pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route(
            "/api/system-message",
            get(get_message).put(put_message),
        )
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

async fn get_message(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers)?;
    let message =
        std::fs::read_to_string(&state.path).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({"message": message, "meta": meta(&state)?})))
}

async fn put_message(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Json(body): Json<PutMessage>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers)?;

    let tmp = state.path.with_extension("txt.tmp");
    std::fs::write(&tmp, &body.message).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    std::fs::rename(&tmp, &state.path).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!(bytes = body.message.len(), "system message updated");
    Ok(Json(json!({"ok": true, "meta": meta(&state)?})))
}

/// File metadata for the editor UI.
fn meta(state: &AdminState) -> Result<serde_json::Value, StatusCode> {
    let stat = std::fs::metadata(&state.path).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let updated_at = stat
        .modified()
        .map(|t| chrono::DateTime::<chrono::Local>::from(t).to_rfc3339())
        .unwrap_or_default();
    Ok(json!({"updated_at": updated_at, "bytes": stat.len()}))
}

/// Bearer-token check; open when no token is configured.
fn authorize(state: &AdminState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = &state.token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

//! HTTP surface: terminal upgrade endpoint and terminal audit endpoints.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `/api/v1/asset/terminal/:id?cols=&rows=` | WebSocket terminal |
//! | POST | `/api/v1/asset/terminal/:id/resize` | placeholder, resize is in-band |
//! | GET | `/api/v1/terminal-sessions?page=&pageSize=&keyword=` | audit listing |
//! | GET | `/api/v1/terminal-sessions/:id/play` | raw recording |
//! | DELETE | `/api/v1/terminal-sessions/:id` | delete recording and record |
//!
//! Operator identity comes from upstream authentication: an [`Operator`]
//! request extension if present, else the `X-User-Id` / `X-Username`
//! headers, else user 0 named `unknown`.

use std::sync::Arc;

use futures::StreamExt;
use poem::http::StatusCode;
use poem::web::websocket::WebSocket;
use poem::web::{Data, Json, Path, Query};
use poem::{Endpoint, EndpointExt, IntoResponse, Request, Response, Route, delete, get, handler, post};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::terminal::bridge::{BridgeOptions, TerminalBridge};
use crate::terminal::message::session_info;
use crate::terminal::storage::{AccessPolicy, AuditStore, TerminalRegistry};
use crate::terminal::types::{AuditPage, AuditQuery, Operator, TerminalSize};

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USERNAME_HEADER: &str = "X-Username";

/// Shared state for every route.
pub struct AppState {
    pub registry: Arc<TerminalRegistry>,
    pub audit: Arc<dyn AuditStore>,
    pub policy: Arc<dyn AccessPolicy>,
    pub bridge: BridgeOptions,
}

/// Build the application routes.
pub fn routes(state: Arc<AppState>) -> impl Endpoint {
    Route::new()
        .at("/api/v1/asset/terminal/:id", get(open_terminal))
        .at("/api/v1/asset/terminal/:id/resize", post(resize_terminal))
        .at("/api/v1/terminal-sessions", get(list_sessions))
        .at("/api/v1/terminal-sessions/:id", delete(delete_session))
        .at("/api/v1/terminal-sessions/:id/play", get(play_session))
        .data(state)
}

/// Identity established by upstream authentication.
pub fn operator_from_request(req: &Request) -> Operator {
    if let Some(operator) = req.extensions().get::<Operator>() {
        return operator.clone();
    }

    let user_id = req
        .header(USER_ID_HEADER)
        .and_then(|v| v.trim().parse::<u64>().ok());
    let username = req
        .header(USERNAME_HEADER)
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let fallback = Operator::default();
    Operator {
        user_id: user_id.unwrap_or(fallback.user_id),
        username: username.map(String::from).unwrap_or(fallback.username),
    }
}

#[derive(Debug, Deserialize)]
struct TerminalParams {
    cols: Option<String>,
    rows: Option<String>,
}

#[handler]
async fn open_terminal(
    req: &Request,
    Path(host_id): Path<u64>,
    Query(params): Query<TerminalParams>,
    ws: Option<WebSocket>,
    state: Data<&Arc<AppState>>,
) -> Response {
    let operator = operator_from_request(req);

    if !state.policy.allow_terminal(&operator, host_id).await {
        warn!(host_id, user_id = operator.user_id, "Terminal access denied");
        return (StatusCode::FORBIDDEN, "terminal access denied").into_response();
    }

    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "expected a WebSocket upgrade").into_response();
    };

    let size = TerminalSize::from_query(params.cols.as_deref(), params.rows.as_deref());
    let bridge = TerminalBridge::new(Arc::clone(&state.registry), state.bridge.clone());
    info!(
        host_id,
        user_id = operator.user_id,
        cols = size.cols,
        rows = size.rows,
        "Terminal upgrade requested"
    );

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        bridge.run(host_id, operator, size, sink, stream).await;
    })
    .into_response()
}

#[handler]
async fn resize_terminal(Path(host_id): Path<u64>) -> Json<serde_json::Value> {
    Json(json!({
        "hostId": host_id,
        "message": "resize is delivered in-band over the terminal WebSocket"
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    page: Option<String>,
    page_size: Option<String>,
    keyword: Option<String>,
}

fn positive(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok()).unwrap_or(0)
}

fn internal_error(e: impl std::fmt::Display) -> poem::Error {
    poem::Error::from_string(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

#[handler]
async fn list_sessions(
    Query(params): Query<ListParams>,
    state: Data<&Arc<AppState>>,
) -> poem::Result<Json<AuditPage>> {
    let query = AuditQuery {
        page: positive(params.page.as_deref()),
        page_size: positive(params.page_size.as_deref()),
        keyword: params.keyword,
    };

    let (total, records) = state.audit.list(&query).await.map_err(internal_error)?;
    let list = records.iter().map(session_info).collect();
    Ok(Json(AuditPage { total, list }))
}

#[handler]
async fn play_session(
    Path(id): Path<u64>,
    state: Data<&Arc<AppState>>,
) -> poem::Result<Response> {
    let stored = state
        .audit
        .get(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| poem::Error::from_string("terminal session not found", StatusCode::NOT_FOUND))?;

    let content = tokio::fs::read(&stored.record.recording_path)
        .await
        .map_err(|e| {
            warn!(id, path = %stored.record.recording_path, "Failed to read recording: {}", e);
            internal_error(format!("failed to read recording: {}", e))
        })?;

    Ok(Response::builder()
        .content_type("application/json")
        .body(content))
}

#[handler]
async fn delete_session(
    Path(id): Path<u64>,
    state: Data<&Arc<AppState>>,
) -> poem::Result<Json<serde_json::Value>> {
    let stored = state
        .audit
        .get(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| poem::Error::from_string("terminal session not found", StatusCode::NOT_FOUND))?;

    let path = &stored.record.recording_path;
    if !path.is_empty()
        && let Err(e) = tokio::fs::remove_file(path).await
    {
        warn!(id, path = %path, "Failed to remove recording file: {}", e);
    }

    state.audit.delete(id).await.map_err(internal_error)?;
    info!(id, "Terminal audit record deleted");
    Ok(Json(json!({ "id": id, "deleted": true })))
}

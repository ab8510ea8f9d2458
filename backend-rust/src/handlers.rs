//! # handlers
//!
//! Read-only HTTP query surface over the controller state.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /api/health` | liveness |
//! | `GET /api/status` | last message + all tag positions |
//! | `GET /api/anchors` | configured roster |
//! | `GET /api/nodes` | per-source node summaries |
//! | `GET /api/tdoa/tags` | configured tag list |
//! | `GET /api/tdoa/position?tag_id=` | one tag position |
//! | `GET /api/config` | configuration, key masked |
//! | `GET /api/permissions/check?role=&section=` | write-permission probe |

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::config::SharedConfig;
use crate::permissions::{PermissionChecker, Role};
use crate::state::{canonical_id, StateStore};

#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub config: SharedConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/anchors", get(anchors))
        .route("/api/nodes", get(nodes))
        .route("/api/tdoa/tags", get(tags))
        .route("/api/tdoa/position", get(tag_position))
        .route("/api/config", get(config))
        .route("/api/permissions/check", get(permission_check))
        .with_state(state)
}

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.into() }))).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(app): State<AppState>) -> Json<serde_json::Value> {
    let last_msg = app.store.last_message().await;
    let tags = app.store.all_tag_positions().await;
    Json(json!({ "status": "ok", "last_msg": last_msg, "tags": tags }))
}

async fn anchors(State(app): State<AppState>) -> Json<serde_json::Value> {
    let cfg = app.config.snapshot().await;
    Json(json!({ "anchors": cfg.tdoa.anchors }))
}

async fn nodes(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "nodes": app.store.node_summaries().await }))
}

async fn tags(State(app): State<AppState>) -> Json<serde_json::Value> {
    let cfg = app.config.snapshot().await;
    Json(json!({ "tags": cfg.tdoa.tags }))
}

#[derive(Debug, Deserialize)]
struct PositionQuery {
    tag_id: Option<String>,
}

async fn tag_position(State(app): State<AppState>, Query(q): Query<PositionQuery>) -> Response {
    let Some(tag_id) = q.tag_id.as_deref().map(canonical_id).filter(|t| !t.is_empty()) else {
        return bad_request("tag_id is required");
    };
    match app.store.tag_position(&tag_id).await {
        Some(pos) => Json(json!({ "tag_id": tag_id, "position": pos })).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown tag", "tag_id": tag_id })))
            .into_response(),
    }
}

async fn config(State(app): State<AppState>) -> Json<serde_json::Value> {
    let cfg = app.config.snapshot().await.redacted();
    Json(serde_json::to_value(cfg).unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct PermissionQuery {
    role: Option<String>,
    section: Option<String>,
}

async fn permission_check(State(app): State<AppState>, Query(q): Query<PermissionQuery>) -> Response {
    let (Some(role), Some(section)) = (q.role, q.section) else {
        return bad_request("role and section are required");
    };
    let role: Role = match role.parse() {
        Ok(role) => role,
        Err(e) => return bad_request(e.to_string()),
    };
    let checker = PermissionChecker::new(&app.config.snapshot().await.permissions);
    let allowed = checker.can_modify(role, &section);
    Json(json!({ "role": role, "section": section, "allowed": allowed })).into_response()
}

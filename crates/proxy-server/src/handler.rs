//! HTTP request handlers.

use crate::auth::authorize;
use crate::server::ServerConfig;
use crate::socket;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use proxy_core::{ActionKind, Session};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Action endpoint: authenticate, upgrade, run one session.
pub async fn handle_action(
    State(state): State<Arc<ServerConfig>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(action) = ActionKind::from_str(&action) else {
        return (StatusCode::NOT_FOUND, "Not Found\n").into_response();
    };
    let Some(program) = state.program(action).cloned() else {
        debug!("No program configured for {}", action);
        return (StatusCode::NOT_FOUND, "Not Found\n").into_response();
    };

    if let Err(e) = authorize(&headers, &state.token) {
        warn!("Rejected {} request: {}", action, e);
        return (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let limit = state.timings.transport_limit(action);
    let session = Session::new(action, program, state.timings.clone());

    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            info!("Starting {} session", action);
            let (sink, source) = socket::split(socket);
            session.run(sink, source).await;
        })
}

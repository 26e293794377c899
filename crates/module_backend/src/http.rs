use std::{path::Path, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::{LastSnapshot, StatusReport},
    error::{ApiError, ErrorCode},
};
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;
use tracing::debug;

use crate::app_state::AppState;

pub(crate) fn build_router(state: Arc<AppState>, assets_dir: &Path) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/status", get(http_status))
        .route("/api/polling/start", post(http_start_polling))
        .route("/api/polling/stop", post(http_stop_polling))
        .route("/api/exchange-rates", get(http_exchange_rates))
        .route("/ws", get(ws_handler))
        .fallback_service(ServeDir::new(assets_dir))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.controller.status())
}

async fn http_start_polling(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.controller.start())
}

async fn http_stop_polling(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.controller.stop())
}

async fn http_exchange_rates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LastSnapshot>, (StatusCode, Json<ApiError>)> {
    state.controller.last_snapshot().map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::new(
                ErrorCode::NotFound,
                "no snapshot has been fetched yet",
            )),
        )
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "panel socket lagged; dropping events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;

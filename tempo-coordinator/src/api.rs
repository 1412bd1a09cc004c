//! Coordinator HTTP façade.
//!
//! ```text
//! POST /launch       Instance        409 duplicate | 503 exhausted | 502 launch failed
//! GET  /instances    [Instance]      launch order
//! POST /sync-clocks  RoundReport     409 in progress | 502 reference | 503 unreachable
//! GET  /logs         {"logs": [...]}
//! GET  /worldtime    {"datetime": RFC3339}
//! GET  /ws           pushes {"log": line} for every event
//! ```

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use tempo_core::RegistryError;
use tempo_sync::SyncError;

use crate::error::LaunchError;
use crate::protocol::ApiResponse;
use crate::runtime::Coordinator;

type Reply = (StatusCode, Json<ApiResponse>);

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/launch", post(launch_handler))
        .route("/instances", get(instances_handler))
        .route("/sync-clocks", post(sync_clocks_handler))
        .route("/logs", get(logs_handler))
        .route("/worldtime", get(worldtime_handler))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&coordinator),
            log_requests,
        ))
        .with_state(coordinator)
}

async fn log_requests(
    State(coordinator): State<Arc<Coordinator>>,
    request: Request,
    next: Next,
) -> Response {
    coordinator
        .events()
        .record(format!("{} {}", request.method(), request.uri()));
    next.run(request).await
}

async fn launch_handler(State(coordinator): State<Arc<Coordinator>>) -> Reply {
    match coordinator.launch().await {
        Ok(instance) => ok(json!(instance)),
        Err(err) => {
            let (status, code) = launch_status(&err);
            failure(status, ApiResponse::error(code, err.to_string()))
        }
    }
}

async fn instances_handler(State(coordinator): State<Arc<Coordinator>>) -> Reply {
    ok(json!(coordinator.instances()))
}

async fn sync_clocks_handler(State(coordinator): State<Arc<Coordinator>>) -> Reply {
    match coordinator.sync_clocks().await {
        Ok(report) => ok(json!(report)),
        Err(err) => {
            let (status, code) = sync_status(&err);
            let response = match &err {
                SyncError::NoReachableInstances { failures } => {
                    ApiResponse::error_with_data(code, err.to_string(), json!({ "failures": failures }))
                }
                _ => ApiResponse::error(code, err.to_string()),
            };
            failure(status, response)
        }
    }
}

async fn logs_handler(State(coordinator): State<Arc<Coordinator>>) -> Reply {
    ok(json!({ "logs": coordinator.logs() }))
}

async fn worldtime_handler(State(coordinator): State<Arc<Coordinator>>) -> Reply {
    match coordinator.world_time().await {
        Ok(datetime) => ok(json!({ "datetime": datetime })),
        Err(err) => failure(
            StatusCode::BAD_GATEWAY,
            ApiResponse::error("reference_unavailable", err.to_string()),
        ),
    }
}

async fn ws_handler(
    State(coordinator): State<Arc<Coordinator>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| stream_logs(socket, coordinator))
}

/// Forward every event to one viewer until either side goes away.
async fn stream_logs(mut socket: WebSocket, coordinator: Arc<Coordinator>) {
    let mut lines = coordinator.events().subscribe();
    coordinator.events().record("New client connected");

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Ok(line) => {
                    if socket.send(Message::Text(log_message(&line))).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "log viewer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    coordinator.events().record("Client disconnected");
}

fn log_message(line: &str) -> String {
    json!({ "log": line }).to_string()
}

fn ok(data: Value) -> Reply {
    (StatusCode::OK, Json(ApiResponse::ok(data)))
}

fn failure(status: StatusCode, response: ApiResponse) -> Reply {
    (status, Json(response))
}

pub fn launch_status(err: &LaunchError) -> (StatusCode, &'static str) {
    match err {
        LaunchError::LaunchFailed { .. } => (StatusCode::BAD_GATEWAY, "launch_failed"),
        LaunchError::Registry(err) => registry_status(err),
    }
}

pub fn registry_status(err: &RegistryError) -> (StatusCode, &'static str) {
    match err {
        RegistryError::DuplicateInstance { .. } => (StatusCode::CONFLICT, "duplicate_instance"),
        RegistryError::PortInUse { .. } => (StatusCode::CONFLICT, "port_in_use"),
        RegistryError::PortReserved { .. } => (StatusCode::CONFLICT, "port_reserved"),
        RegistryError::PortSpaceExhausted { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "port_space_exhausted")
        }
        RegistryError::InvalidPortRange { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "invalid_port_range")
        }
    }
}

pub fn sync_status(err: &SyncError) -> (StatusCode, &'static str) {
    match err {
        SyncError::RoundInProgress => (StatusCode::CONFLICT, "round_in_progress"),
        SyncError::ReferenceUnavailable(_) => (StatusCode::BAD_GATEWAY, "reference_unavailable"),
        SyncError::NoReachableInstances { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "no_reachable_instances")
        }
    }
}

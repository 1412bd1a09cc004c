//! Instance HTTP surface and runtime.
//!
//! ```text
//! GET  /time           {"time": RFC3339}
//! POST /sync           {"offset": seconds}  → 200 {message, newTime} | 400 {error}
//! GET  /logs           {"logs": [...]}
//! GET  /instance-info  {"host": <Host header>, "clock": {ticks, corrected_us}}
//! GET  /ws             pushes {"time": "HH:MM:SS"} on connect and every tick
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use tempo_core::events::DEFAULT_EVENT_CAPACITY;
use tempo_core::EventLog;

use crate::clock::{LogicalClock, DEFAULT_MAX_JITTER_SECS};
use crate::error::{io_err, InstanceError};

#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub max_jitter_secs: u32,
    pub tick_interval: Duration,
    pub log_capacity: usize,
}

impl InstanceConfig {
    pub fn new(port: u16) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            max_jitter_secs: DEFAULT_MAX_JITTER_SECS,
            tick_interval: Duration::from_secs(1),
            log_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Shared state behind every handler.
#[derive(Debug, Clone)]
pub struct InstanceState {
    pub clock: Arc<LogicalClock>,
    pub events: EventLog,
    ticks: broadcast::Sender<String>,
}

impl InstanceState {
    pub fn new(clock: Arc<LogicalClock>, events: EventLog) -> Self {
        let (ticks, _) = broadcast::channel(16);
        Self {
            clock,
            events,
            ticks,
        }
    }

    /// Advance the clock one step and push the new time to viewers.
    pub fn tick(&self) {
        self.clock.tick();
        let _ = self.ticks.send(time_message(&self.clock));
    }
}

pub fn router(state: InstanceState) -> Router {
    Router::new()
        .route("/time", get(time_handler))
        .route("/sync", post(sync_handler))
        .route("/logs", get(logs_handler))
        .route("/instance-info", get(instance_info_handler))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

/// Start the instance runtime and block the current thread until it exits.
pub fn start_blocking(config: InstanceConfig) -> Result<(), InstanceError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio runtime", e))?;
    runtime.block_on(run(config))
}

/// Bind, skew the clock, start ticking and serve until ctrl-c.
pub async fn run(config: InstanceConfig) -> Result<(), InstanceError> {
    let addr = SocketAddr::new(config.bind, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| io_err(format!("bind {addr}"), e))?;

    let state = InstanceState::new(
        Arc::new(LogicalClock::starting_now()),
        EventLog::new(config.log_capacity),
    );
    state
        .events
        .record(format!("Instance running at {}", config.port));
    let offset = state.clock.apply_jitter(config.max_jitter_secs);
    state.events.record(format!("Applied offset: {offset} seconds"));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let ticker = {
        let state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(tick_task(state, config.tick_interval, shutdown_rx))
    };

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received ctrl-c, shutting down instance");
            }
        })
        .await
        .map_err(|e| io_err("serve", e));

    let _ = shutdown_tx.send(());
    let _ = ticker.await;
    result
}

async fn tick_task(
    state: InstanceState,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => state.tick(),
        }
    }
}

async fn log_requests(State(state): State<InstanceState>, request: Request, next: Next) -> Response {
    state
        .events
        .record(format!("{} {}", request.method(), request.uri()));
    next.run(request).await
}

async fn time_handler(State(state): State<InstanceState>) -> Json<Value> {
    Json(json!({ "time": state.clock.read() }))
}

async fn sync_handler(State(state): State<InstanceState>, body: Bytes) -> impl IntoResponse {
    let offset = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|value| value.get("offset").and_then(Value::as_f64));

    let Some(offset) = offset else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid offset value. It must be a number." })),
        );
    };

    match state.clock.apply_correction(offset) {
        Ok(_) => {
            state.events.record(format!(
                "Synchronized logical time with offset: {offset} seconds"
            ));
            (
                StatusCode::OK,
                Json(json!({
                    "message": "Logical time synchronized successfully",
                    "newTime": state.clock.formatted(),
                })),
            )
        }
        Err(err) => (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))),
    }
}

async fn logs_handler(State(state): State<InstanceState>) -> Json<Value> {
    Json(json!({ "logs": state.events.snapshot() }))
}

async fn instance_info_handler(
    State(state): State<InstanceState>,
    headers: HeaderMap,
) -> Json<Value> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    Json(json!({ "host": host, "clock": state.clock.stats() }))
}

async fn ws_handler(State(state): State<InstanceState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| push_time(socket, state))
}

async fn push_time(mut socket: WebSocket, state: InstanceState) {
    state.events.record("New client connected");
    let mut ticks = state.ticks.subscribe();

    if socket
        .send(Message::Text(time_message(&state.clock)))
        .await
        .is_ok()
    {
        loop {
            match ticks.recv().await {
                Ok(message) => {
                    if socket.send(Message::Text(message)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    state.events.record("Client disconnected");
}

fn time_message(clock: &LogicalClock) -> String {
    json!({ "time": clock.formatted() }).to_string()
}

pub(crate) fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TEMPO_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

//! Prometheus-compatible metrics and admin endpoint
//!
//! Exposes session server counters in Prometheus format, plus a map upload route.
//! Default endpoint: http://localhost:9090/metrics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::game::constants::net::MAX_MESSAGE_SIZE;
use crate::game::state::StoreStats;
use crate::storage::{MapRepository, RepositoryError};

/// Metrics registry for the session server
#[derive(Debug)]
pub struct Metrics {
    // Connections
    pub connections_active: AtomicU64,
    pub connections_total: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub connections_reaped: AtomicU64,

    // Session state
    pub players: AtomicU64,
    pub dead_players: AtomicU64,

    // Traffic
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub chat_messages: AtomicU64,

    // Map rotation
    pub rotations_total: AtomicU64,
    pub rotation_failures: AtomicU64,
    pub map_index: AtomicU64,
    pub map_pool_size: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            connections_reaped: AtomicU64::new(0),
            players: AtomicU64::new(0),
            dead_players: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            chat_messages: AtomicU64::new(0),
            rotations_total: AtomicU64::new(0),
            rotation_failures: AtomicU64::new(0),
            map_index: AtomicU64::new(0),
            map_pool_size: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturating: a close without a matching open must not wrap
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Mirror the store's player counters
    pub fn update_store(&self, stats: StoreStats) {
        self.players.store(stats.players as u64, Ordering::Relaxed);
        self.dead_players.store(stats.dead as u64, Ordering::Relaxed);
    }

    pub fn record_rotation(&self, index: usize) {
        self.rotations_total.fetch_add(1, Ordering::Relaxed);
        self.map_index.store(index as u64, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("cat_arena_connections_active", "Open WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("cat_arena_connections_total", "Connections accepted", "counter",
            self.connections_total.load(Ordering::Relaxed));
        metric!("cat_arena_connections_rejected_total", "Connections refused at capacity", "counter",
            self.connections_rejected.load(Ordering::Relaxed));
        metric!("cat_arena_connections_reaped_total", "Connections closed for inactivity", "counter",
            self.connections_reaped.load(Ordering::Relaxed));

        metric!("cat_arena_players", "Joined players", "gauge",
            self.players.load(Ordering::Relaxed));
        metric!("cat_arena_players_dead", "Players waiting to respawn", "gauge",
            self.dead_players.load(Ordering::Relaxed));

        metric!("cat_arena_messages_received_total", "Frames received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("cat_arena_messages_sent_total", "Frames written", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("cat_arena_messages_dropped_total", "Inbound frames dropped as malformed", "counter",
            self.messages_dropped.load(Ordering::Relaxed));
        metric!("cat_arena_bytes_received_total", "Bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("cat_arena_bytes_sent_total", "Bytes written", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("cat_arena_chat_messages_total", "Chat messages relayed", "counter",
            self.chat_messages.load(Ordering::Relaxed));

        metric!("cat_arena_rotations_total", "Completed map rotations", "counter",
            self.rotations_total.load(Ordering::Relaxed));
        metric!("cat_arena_rotation_failures_total", "Rotations skipped on a bad map", "counter",
            self.rotation_failures.load(Ordering::Relaxed));
        metric!("cat_arena_map_index", "Index of the active map in the pool", "gauge",
            self.map_index.load(Ordering::Relaxed));
        metric!("cat_arena_map_pool_size", "Maps in the rotation pool", "gauge",
            self.map_pool_size.load(Ordering::Relaxed));

        metric!("cat_arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        serde_json::json!({
            "connections": {
                "active": load(&self.connections_active),
                "total": load(&self.connections_total),
                "rejected": load(&self.connections_rejected),
                "reaped": load(&self.connections_reaped),
            },
            "players": {
                "joined": load(&self.players),
                "dead": load(&self.dead_players),
            },
            "network": {
                "messages_received": load(&self.messages_received),
                "messages_sent": load(&self.messages_sent),
                "messages_dropped": load(&self.messages_dropped),
                "bytes_received": load(&self.bytes_received),
                "bytes_sent": load(&self.bytes_sent),
                "chat_messages": load(&self.chat_messages),
            },
            "rotation": {
                "total": load(&self.rotations_total),
                "failures": load(&self.rotation_failures),
                "map_index": load(&self.map_index),
                "pool_size": load(&self.map_pool_size),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct AdminState {
    metrics: Arc<Metrics>,
    repo: MapRepository,
}

async fn health() -> &'static str {
    "OK"
}

async fn prometheus(State(state): State<AdminState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

async fn metrics_json(State(state): State<AdminState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.metrics.to_json(),
    )
}

/// Store a map for the next start. The body is kept verbatim.
async fn save_map(State(state): State<AdminState>, body: String) -> Response {
    match state.repo.save_map(&body).await {
        Ok(id) => {
            info!("Stored map {} ({} bytes)", id, body.len());
            (StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response()
        }
        Err(RepositoryError::InvalidMap(e)) => {
            debug!("Rejected map upload: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            warn!("Failed to save map: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response()
        }
    }
}

/// Routes served on the admin port
pub fn admin_router(metrics: Arc<Metrics>, repo: MapRepository) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/metrics", get(prometheus))
        .route("/metrics/json", get(metrics_json))
        .route("/maps", post(save_map))
        .layer(DefaultBodyLimit::max(MAX_MESSAGE_SIZE))
        .with_state(AdminState { metrics, repo })
}

/// Start the admin HTTP server
pub async fn start_admin_server(
    metrics: Arc<Metrics>,
    repo: MapRepository,
    port: u16,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("Admin server listening on http://{}/metrics", addr);

    axum::serve(listener, admin_router(metrics, repo)).await?;
    Ok(())
}

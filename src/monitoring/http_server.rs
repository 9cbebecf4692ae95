use axum::{
    extract::{ws::Message as WsMessage, ws::WebSocket, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::Result;
use crate::profiler::{HistoryStats, N1Offender, ProfileHistory, ProfileRegistry, ProfileSummary};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;
const STREAM_INTERVAL_MS: u64 = 1000;

/// Shared state of the admin surface.
#[derive(Clone)]
pub struct AdminState {
    pub registry: ProfileRegistry,
    pub history: Arc<ProfileHistory>,
}

impl AdminState {
    pub fn new(registry: ProfileRegistry, history: Arc<ProfileHistory>) -> Self {
        Self { registry, history }
    }
}

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub history: HistoryStats,
    pub active_profiles: usize,
}

#[derive(Serialize)]
pub struct ActiveProfilesResponse {
    pub request_ids: Vec<String>,
    pub count: usize,
}

pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/profiles/stats", get(get_stats))
        .route("/api/profiles/recent", get(get_recent))
        .route("/api/profiles/n1", get(get_n1_offenders))
        .route("/api/profiles/active", get(get_active))
        .route("/api/profiles/stream", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the admin surface on `addr` until the listener fails.
pub async fn start_http_server(addr: SocketAddr, state: AdminState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Profiler admin API listening");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

fn stats_snapshot(state: &AdminState) -> StatsResponse {
    StatsResponse {
        history: state.history.stats(),
        active_profiles: state.registry.active_count(),
    }
}

async fn get_stats(State(state): State<AdminState>) -> Json<StatsResponse> {
    Json(stats_snapshot(&state))
}

async fn get_recent(
    State(state): State<AdminState>,
    Query(params): Query<LimitQuery>,
) -> Json<Vec<ProfileSummary>> {
    Json(state.history.recent(params.resolve()))
}

async fn get_n1_offenders(
    State(state): State<AdminState>,
    Query(params): Query<LimitQuery>,
) -> Json<Vec<N1Offender>> {
    Json(state.history.n1_offenders(params.resolve()))
}

async fn get_active(State(state): State<AdminState>) -> Json<ActiveProfilesResponse> {
    let request_ids = state.registry.active_request_ids();
    let count = request_ids.len();
    Json(ActiveProfilesResponse { request_ids, count })
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AdminState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(mut socket: WebSocket, state: AdminState) {
    info!("Stats stream client connected");

    let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(STREAM_INTERVAL_MS));

    loop {
        ticker.tick().await;

        let json = match serde_json::to_string(&stats_snapshot(&state)) {
            Ok(j) => j,
            Err(e) => {
                error!(error = %e, "Failed to serialize profile stats");
                continue;
            }
        };

        if socket.send(WsMessage::Text(json)).await.is_err() {
            info!("Stats stream client disconnected");
            break;
        }
    }
}

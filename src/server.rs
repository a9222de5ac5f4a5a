use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    aggregator::SharedRecords,
    netinfo,
    pool::{TargetDiff, WorkerPool},
    target::parse_targets,
    web,
};

#[derive(Clone)]
pub struct AppState {
    records: SharedRecords,
    pool: Arc<Mutex<WorkerPool>>, // target updates are serialized through this lock
    default_ports: Arc<Vec<u16>>,
}

impl AppState {
    pub fn new(pool: Arc<Mutex<WorkerPool>>, records: SharedRecords, default_ports: Vec<u16>) -> Self {
        Self {
            records,
            pool,
            default_ports: Arc::new(default_ports),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetsRequest {
    pub targets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RejectedTarget {
    pub line: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct TargetsResponse {
    #[serde(flatten)]
    pub diff: TargetDiff,
    pub rejected: Vec<RejectedTarget>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/targets", put(put_targets))
        .route("/web-ui", get(get_web_ui))
        .route("/network", get(get_network))
        .with_state(state);

    Router::new().nest("/api", api).layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("cannot bind {bind}"))?;
    info!(%bind, "serving status API");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.records.snapshot().await))
}

async fn get_web_ui(State(app): State<AppState>) -> impl IntoResponse {
    let snapshot = app.records.snapshot().await;
    (StatusCode::OK, Json(web::web_ui_targets(&snapshot)))
}

async fn get_network() -> impl IntoResponse {
    match netinfo::detect_network_info() {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => {
            warn!(error = %e, "network detection failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("network detection failed: {e}")).into_response()
        }
    }
}

async fn put_targets(State(app): State<AppState>, Json(req): Json<TargetsRequest>) -> impl IntoResponse {
    let parsed = parse_targets(&req.targets, &app.default_ports);
    let rejected: Vec<RejectedTarget> = parsed
        .rejected
        .iter()
        .map(|(line, e)| RejectedTarget {
            line: line.clone(),
            reason: e.to_string(),
        })
        .collect();
    for r in &rejected {
        warn!(line = %r.line, reason = %r.reason, "rejected target");
    }

    if parsed.targets.is_empty() && !rejected.is_empty() {
        let body = TargetsResponse {
            diff: TargetDiff::default(),
            rejected,
        };
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }

    let diff = app.pool.lock().await.update_targets(parsed.targets).await;
    (StatusCode::OK, Json(TargetsResponse { diff, rejected })).into_response()
}

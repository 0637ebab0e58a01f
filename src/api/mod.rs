//! HTTP API for health checks, swap status and monitoring

use crate::assets::AssetRegistry;
use crate::config::ApiConfig;
use crate::error::{SwapError, SwapResult};
use crate::state::SwapStore;
use crate::swap::{FilterStatus, SwapRecord, TOTAL_STEPS};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SwapStore>,
    pub assets: Arc<AssetRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/swaps", get(list_swaps))
        .route("/swaps/:id", get(get_swap))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> SwapResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SwapError::Config(format!("Cannot bind {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .await
        .map_err(|e| SwapError::Internal(format!("API server stopped: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    filter: Option<FilterStatus>,
}

/// List swaps, optionally by coarse status
async fn list_swaps(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SwapView>>, (StatusCode, String)> {
    let records = state.store.all().await.map_err(internal_error)?;

    let views = records
        .iter()
        .map(|r| SwapView::project(r, &state.assets))
        .filter(|v| query.filter.map(|f| v.filter_status == f).unwrap_or(true))
        .collect();

    Ok(Json(views))
}

async fn get_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SwapView>, (StatusCode, String)> {
    match state.store.get(&id).await.map_err(internal_error)? {
        Some(record) => Ok(Json(SwapView::project(&record, &state.assets))),
        None => Err((StatusCode::NOT_FOUND, format!("Swap {} not found", id))),
    }
}

async fn metrics_handler() -> String {
    crate::metrics::render()
}

fn internal_error(e: SwapError) -> (StatusCode, String) {
    error!("API store error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// A swap as shown to the user
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapView {
    pub id: String,
    pub provider: String,
    pub network: String,
    pub wallet_id: String,
    pub from: String,
    pub to: String,
    pub from_amount: String,
    pub to_amount: String,
    pub status: String,
    pub step: u8,
    pub total_steps: u8,
    pub label: String,
    pub filter_status: FilterStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl SwapView {
    pub fn project(record: &SwapRecord, assets: &AssetRegistry) -> Self {
        let swap = &record.swap;
        let descriptor = swap.status.descriptor();

        Self {
            id: swap.id.clone(),
            provider: swap.provider.clone(),
            network: record.network.to_string(),
            wallet_id: record.wallet_id.clone(),
            from: swap.from.clone(),
            to: swap.to.clone(),
            from_amount: assets.pretty_amount(&swap.from, swap.from_amount),
            to_amount: assets.pretty_amount(&swap.to, swap.to_amount),
            status: swap.status.to_string(),
            step: descriptor.step,
            total_steps: TOTAL_STEPS,
            label: descriptor.label(swap),
            filter_status: descriptor.filter_status,
            start_time: swap.start_time,
            end_time: swap.end_time,
        }
    }
}

//! Health and status handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use crate::scheduler::PhaseCounts;
use crate::storage::EntityStorage;
use axum::{extract::State, http::StatusCode, Json};
use keystone_resolver::ResolverStatsSnapshot;
use keystone_types::EntityLevel;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub entities: EntityCounts,
    pub phases: PhaseCounts,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub resolver: ResolverStatus,
}

/// Declared entities per level
#[derive(Debug, Default, Serialize)]
pub struct EntityCounts {
    pub roots: usize,
    pub namespaces: usize,
    pub principals: usize,
}

/// Resolver index and traffic
#[derive(Debug, Serialize)]
pub struct ResolverStatus {
    pub transport: &'static str,
    pub indexed: usize,
    #[serde(flatten)]
    pub stats: ResolverStatsSnapshot,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> ApiResult<Json<DaemonStatusResponse>> {
    let entities = state.storage.list_entities(None).await?;

    let mut counts = EntityCounts::default();
    for entity in &entities {
        match entity.level() {
            EntityLevel::Root => counts.roots += 1,
            EntityLevel::Namespace => counts.namespaces += 1,
            EntityLevel::Principal => counts.principals += 1,
        }
    }

    Ok(Json(DaemonStatusResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        entities: counts,
        phases: state.scheduler.phase_counts(),
        queue_depth: state.scheduler.queue_depth(),
        in_flight: state.scheduler.in_flight(),
        resolver: ResolverStatus {
            transport: state.resolver.transport_name(),
            indexed: state.resolver.len(),
            stats: state.resolver.stats(),
        },
    }))
}

/// Request a graceful shutdown
pub async fn shutdown(State(state): State<AppState>) -> StatusCode {
    tracing::info!("Shutdown requested via API");
    let _ = state.shutdown_tx.send(true);
    StatusCode::ACCEPTED
}

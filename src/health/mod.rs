/*!
 * # Health Check Module
 *
 * - Liveness (`/health`, `/health/live`): the process is serving requests
 * - Readiness (`/health/ready`): the database answers a ping
 */

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<HealthStatus>,
}

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: Arc<DatabaseConnection>,
    pub started: Instant,
}

impl HealthState {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self {
            db_pool,
            started: Instant::now(),
        }
    }

    fn info(&self, status: HealthStatus, database: Option<HealthStatus>) -> HealthInfo {
        HealthInfo {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            uptime_seconds: self.started.elapsed().as_secs(),
            database,
        }
    }
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthInfo)),
    tag = "Health"
)]
pub async fn health_check(State(state): State<Arc<HealthState>>) -> Json<HealthInfo> {
    Json(state.info(HealthStatus::Up, None))
}

/// Readiness probe; fails when the database is unreachable.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Ready to accept traffic", body = HealthInfo),
        (status = 503, description = "Database unavailable", body = HealthInfo)
    ),
    tag = "Health"
)]
pub async fn readiness_check(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<HealthInfo>) {
    match crate::db::ping(&state.db_pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(state.info(HealthStatus::Up, Some(HealthStatus::Up))),
        ),
        Err(e) => {
            error!(error = %e, "Readiness check failed: database ping");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(state.info(HealthStatus::Down, Some(HealthStatus::Down))),
            )
        }
    }
}

/// Health routes carry their own state so they can be merged into any router.
pub fn health_routes<S>(db_pool: Arc<DatabaseConnection>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(health_check))
        .route("/health/ready", get(readiness_check))
        .with_state(Arc::new(HealthState::new(db_pool)))
}

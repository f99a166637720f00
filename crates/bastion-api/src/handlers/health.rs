//! Health check handlers
//!
//! - /health - status of every component
//! - /health/live - the process is running
//! - /health/ready - the stores answer and traffic can be served

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use bastion_core::{ObjectRef, RelationFilter, RequestContext};

use crate::state::AppState;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

impl ComponentHealth {
    fn new(name: &str, status: HealthStatus, message: Option<String>, started: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit_rate: Option<f64>,
}

#[derive(Serialize)]
pub struct SimpleHealthResponse {
    pub status: String,
}

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

fn uptime_seconds() -> u64 {
    START_TIME.get_or_init(Instant::now).elapsed().as_secs()
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let components = check_components(&state).await;
    let status = components
        .iter()
        .map(|c| c.status)
        .fold(HealthStatus::Healthy, worst);

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime_seconds(),
        components,
        cache_hit_rate: state.cache_metrics.as_ref().map(|m| m.hit_rate()),
    };

    let code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(response))
}

pub async fn liveness() -> Json<SimpleHealthResponse> {
    Json(SimpleHealthResponse {
        status: "alive".to_string(),
    })
}

pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<SimpleHealthResponse>) {
    let ready = check_components(&state)
        .await
        .iter()
        .all(|c| c.status != HealthStatus::Unhealthy);
    if ready {
        (
            StatusCode::OK,
            Json(SimpleHealthResponse {
                status: "ready".to_string(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SimpleHealthResponse {
                status: "not ready".to_string(),
            }),
        )
    }
}

async fn check_components(state: &AppState) -> Vec<ComponentHealth> {
    let mut components = vec![check_policy_store(state).await];
    if let Some(db) = check_database(state).await {
        components.push(db);
    }
    components
}

fn worst(a: HealthStatus, b: HealthStatus) -> HealthStatus {
    use HealthStatus::*;
    match (a, b) {
        (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
        (Degraded, _) | (_, Degraded) => Degraded,
        _ => Healthy,
    }
}

/// Reads one platform tuple through the authorizer.
async fn check_policy_store(state: &AppState) -> ComponentHealth {
    let started = Instant::now();
    let ctx = RequestContext::with_timeout(HEALTH_TIMEOUT);
    let filter = RelationFilter::for_object(&ObjectRef::platform());

    match state.authz.read_relations(&ctx, &filter, None, 1).await {
        Ok(_) => {
            debug!("policy store health check passed");
            ComponentHealth::new("policy_store", HealthStatus::Healthy, None, started)
        }
        Err(e) => {
            warn!(error = %e, "policy store health check failed");
            ComponentHealth::new(
                "policy_store",
                HealthStatus::Unhealthy,
                Some(e.public_message()),
                started,
            )
        }
    }
}

/// `None` when running without Postgres.
async fn check_database(state: &AppState) -> Option<ComponentHealth> {
    let pool = state.db_pool.as_ref()?;
    let started = Instant::now();

    let ping = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool);
    let health = match tokio::time::timeout(HEALTH_TIMEOUT, ping).await {
        Ok(Ok(_)) => {
            debug!("database health check passed");
            let status = if started.elapsed() > Duration::from_secs(1) {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
            ComponentHealth::new("database", status, None, started)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "database health check failed");
            ComponentHealth::new(
                "database",
                HealthStatus::Unhealthy,
                Some("query failed".to_string()),
                started,
            )
        }
        Err(_) => {
            warn!("database health check timed out");
            ComponentHealth::new(
                "database",
                HealthStatus::Unhealthy,
                Some("timed out".to_string()),
                started,
            )
        }
    };
    Some(health)
}

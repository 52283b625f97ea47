use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, health::HealthChecker},
    models::{health::HealthStatus, response::ApiResponse},
    providers::registry::ProviderRegistry,
};

pub struct AppState {
    pub health_checker: HealthChecker,
    pub circuit_breaker: CircuitBreaker,
    pub registry: Arc<ProviderRegistry>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/providers/{name}/health", get(provider_health))
        .route("/providers/{name}/circuit", get(provider_circuit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(state: Arc<AppState>, port: u16) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;

    info!(address = %addr, "Health check server started");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow!("Health check server failed: {}", e))?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all(&state.circuit_breaker).await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn provider_health(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if state.registry.provider(&name).is_none() {
        return not_found(&name);
    }

    let record = state.health_checker.check_health(&name).await;
    let status_code = if record.is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ApiResponse::success(record, "Provider health".to_string())),
    )
        .into_response()
}

async fn provider_circuit(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if state.registry.provider(&name).is_none() {
        return not_found(&name);
    }

    match state.circuit_breaker.get_state(&name).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(ApiResponse::success(snapshot, "Circuit state".to_string())),
        )
            .into_response(),
        Err(e) => {
            warn!(provider = %name, error = %e, "Failed to read circuit state");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::<()>::error(
                    e.to_string(),
                    "Circuit state unavailable".to_string(),
                )),
            )
                .into_response()
        }
    }
}

fn not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(
            format!("Unknown provider '{}'", name),
            "Provider not found".to_string(),
        )),
    )
        .into_response()
}

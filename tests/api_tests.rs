use std::sync::Arc;

use anyhow::Result;
use dispatch_service::api::{AppState, router};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use tokio::net::TcpListener;

use crate::common::{Harness, email_provider, sms_provider};

/// Serves the status API for `harness` on an ephemeral port and returns its base URL.
async fn serve(harness: &Harness) -> Result<String> {
    let state = Arc::new(AppState {
        health_checker: harness.health.clone(),
        circuit_breaker: harness.breaker.clone(),
        registry: Arc::clone(&harness.registry),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });

    Ok(format!("http://{}", addr))
}

/// Test: Aggregate health is 200 while every channel has a live provider
#[tokio::test]
async fn test_health_endpoint_reports_healthy() -> Result<()> {
    let harness = Harness::new(vec![email_provider("sendgrid", 1), sms_provider("twilio", 1)])?;
    let base = serve(&harness).await?;

    let response = reqwest::get(format!("{}/health", base)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: JsonValue = response.json().await?;
    assert_eq!(body["status"], "healthy");

    Ok(())
}

/// Test: Aggregate health is 503 once a channel has no usable provider
#[tokio::test]
async fn test_health_endpoint_reports_unhealthy() -> Result<()> {
    let harness = Harness::new(vec![sms_provider("twilio", 1)])?;
    harness.adapter("twilio").set_healthy(false);
    harness.open_circuit("twilio").await;
    let base = serve(&harness).await?;

    let response = reqwest::get(format!("{}/health", base)).await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    Ok(())
}

/// Test: Per-provider health and circuit routes expose the provider's records
#[tokio::test]
async fn test_provider_routes() -> Result<()> {
    let harness = Harness::new(vec![email_provider("sendgrid", 1)])?;
    harness.breaker.record_failure("sendgrid").await;
    let base = serve(&harness).await?;

    let response = reqwest::get(format!("{}/providers/sendgrid/health", base)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: JsonValue = response.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["is_healthy"], true);

    let response = reqwest::get(format!("{}/providers/sendgrid/circuit", base)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: JsonValue = response.json().await?;
    assert_eq!(body["data"]["state"], "closed");
    assert_eq!(body["data"]["failure_count"], 1);

    Ok(())
}

/// Test: Unknown providers are a 404 with an error envelope
#[tokio::test]
async fn test_unknown_provider_is_not_found() -> Result<()> {
    let harness = Harness::new(vec![email_provider("sendgrid", 1)])?;
    let base = serve(&harness).await?;

    let response = reqwest::get(format!("{}/providers/nope/circuit", base)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: JsonValue = response.json().await?;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap_or_default().contains("nope"));

    Ok(())
}

//! HTTP front end for fuel event detection.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fuel_events::{detect_request, DetectParams, DetectRequest, DetectionReport, FuelError};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

pub mod config;

pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT: &str = env!("GIT_COMMIT_HASH");

#[derive(Clone, Debug)]
pub struct ServiceState {
    params: Arc<DetectParams>,
}

impl ServiceState {
    pub fn new(params: DetectParams) -> Result<Self, FuelError> {
        params.validate()?;
        Ok(Self {
            params: Arc::new(params),
        })
    }

    pub fn params(&self) -> &DetectParams {
        &self.params
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/detect", post(detect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid payload")]
    InvalidPayload { details: Vec<JsonValue> },
    #[error(transparent)]
    Detection(#[from] FuelError),
    #[error("detection task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl ApiError {
    fn invalid_payload(err: serde_json::Error) -> Self {
        Self::InvalidPayload {
            details: vec![serde_json::json!({
                "msg": err.to_string(),
                "line": err.line(),
                "column": err.column(),
            })],
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidPayload { details } => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "invalid payload", "details": details })),
            )
                .into_response(),
            ApiError::Detection(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response(),
            ApiError::Worker(err) => {
                error!(error = %err, "detection task did not complete");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "detection task failed" })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: SERVICE_VERSION,
    })
}

async fn detect(
    State(state): State<ServiceState>,
    body: Bytes,
) -> Result<Json<DetectionReport>, ApiError> {
    let request: DetectRequest = serde_json::from_slice(&body).map_err(|err| {
        warn!(error = %err, "rejected detection payload");
        ApiError::invalid_payload(err)
    })?;
    let device_id = request.device_id.clone();
    let params = Arc::clone(&state.params);
    // Large batches are CPU bound; keep them off the async workers.
    let outcome =
        tokio::task::spawn_blocking(move || detect_request(&request, &params)).await??;
    debug!(
        device_id = %device_id,
        events = outcome.report.events.len(),
        implausible_excluded = outcome.diagnostics.implausible_excluded,
        "detection served"
    );
    Ok(Json(outcome.report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        build_router(ServiceState::new(DetectParams::default()).unwrap())
    }

    async fn post_detect(app: Router, body: String) -> (StatusCode, JsonValue) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/detect")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn ramp_points() -> Vec<JsonValue> {
        (0..=10)
            .map(|i| {
                serde_json::json!({
                    "ts": format!("2024-08-20T14:{:02}:00Z", i),
                    "fuel": 50.0 + 10.0 * i as f64,
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn health_reports_ok_and_version() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["version"], SERVICE_VERSION);
    }

    #[tokio::test]
    async fn empty_points_return_zero_summary() {
        let body = serde_json::json!({"device_id": "van-1", "points": []}).to_string();
        let (status, value) = post_detect(app(), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["events"], serde_json::json!([]));
        assert_eq!(value["summary"]["refuels"], 0);
        assert_eq!(value["summary"]["drains"], 0);
        assert_eq!(value["summary"]["net_change_l"], 0.0);
    }

    #[tokio::test]
    async fn ramp_is_reported_as_refuel() {
        let body = serde_json::json!({"device_id": "van-1", "points": ramp_points()}).to_string();
        let (status, value) = post_detect(app(), body).await;
        assert_eq!(status, StatusCode::OK);
        let events = value["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "refuel");
        assert_eq!(events[0]["start_ts"], "2024-08-20T14:00:00+00:00");
        assert_eq!(events[0]["end_ts"], "2024-08-20T14:10:00+00:00");
        assert_eq!(events[0]["confidence"], 1.0);
        assert_eq!(value["summary"]["refuels"], 1);
    }

    #[tokio::test]
    async fn small_tank_override_rejects_overflowing_levels() {
        let body = serde_json::json!({
            "device_id": "van-1",
            "tank_capacity_l": 120.0,
            "points": ramp_points(),
        })
        .to_string();
        let (status, value) = post_detect(app(), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["events"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn long_batch_is_served_from_blocking_pool() {
        // One day of per-minute samples with a single refuel at noon.
        let points: Vec<JsonValue> = (0..1440)
            .map(|i| {
                let level = if i < 720 {
                    40.0
                } else if i < 730 {
                    40.0 + 10.0 * (i - 720) as f64
                } else {
                    140.0
                };
                serde_json::json!({
                    "ts": format!("2024-08-20T{:02}:{:02}:00Z", i / 60, i % 60),
                    "fuel": level,
                })
            })
            .collect();
        let body = serde_json::json!({"device_id": "genset-7", "points": points}).to_string();
        let (status, value) = post_detect(app(), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["summary"]["refuels"], 1);
        assert_eq!(value["summary"]["drains"], 0);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (status, value) = post_detect(app(), "{not json".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"], "invalid payload");
        assert!(value["details"].as_array().is_some_and(|d| !d.is_empty()));
    }

    #[tokio::test]
    async fn missing_device_id_is_bad_request() {
        let body = serde_json::json!({"points": ramp_points()}).to_string();
        let (status, value) = post_detect(app(), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"], "invalid payload");
    }

    #[test]
    fn invalid_params_are_refused_at_startup() {
        let params = DetectParams {
            drain_rate_min: -1.0,
            ..DetectParams::default()
        };
        assert!(ServiceState::new(params).is_err());
    }
}

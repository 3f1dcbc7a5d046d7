//! Operator API handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::GatewayState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// A worker launched on operator request.
#[derive(Debug, Serialize)]
pub struct SpawnedWorker {
    pub pid: u32,
    pub log_path: String,
}

/// GET /api/v1/status
pub async fn status(State(state): State<GatewayState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.snapshot().await)
}

/// POST /api/v1/try-again
pub async fn try_again(State(state): State<GatewayState>) -> impl IntoResponse {
    match state.controller.try_again().await {
        Ok(handle) => ApiResponse::ok(SpawnedWorker {
            pid: handle.pid,
            log_path: handle.log_path.display().to_string(),
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

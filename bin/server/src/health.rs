//! Health checks.

use axum::extract::State;
use axum::http::StatusCode;
use std::sync::Arc;

use crate::content::Content;

pub const LIVENESS_PATH: &str = "/api/pub/health/liveness";
pub const READINESS_PATH: &str = "/api/pub/health/readiness";

/// The process is up.
pub async fn liveness() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Storage is reachable.
pub async fn readiness(State(content): State<Arc<dyn Content>>) -> StatusCode {
    if content.ready().await {
        StatusCode::NO_CONTENT
    } else {
        tracing::warn!("readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    }
}

use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;

use crate::server::dtos::health_dto::{HealthResponse, HealthStatus};
use crate::server::services::MediaServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// liveness only, the proxy has nothing stateful behind it to check
pub async fn health_endpoint(
    Extension(services): Extension<MediaServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: format!("{:?}", services.config.cargo_env).to_lowercase(),
    };

    (StatusCode::OK, Json(response))
}

pub mod health_controller;
pub mod image_controller;
pub mod proxy_controller;
pub mod stream_controller;

use axum::http::StatusCode;

/// preflight answer, the cors headers themselves are set by the router layer
pub async fn cors_preflight() -> StatusCode {
    StatusCode::OK
}

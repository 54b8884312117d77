use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::CargoEnv;
use crate::media::{MediaKind, ProxyError};
use crate::server::dtos::ErrorResponse;

pub type AppResult<T> = Result<T, Error>;

pub const MISSING_URL_MESSAGE: &str = "Missing url parameter";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Missing url parameter")]
    MissingParameter,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    AssetNotFound(ErrorResponse),

    #[error("{0}")]
    UpstreamTimeout(ErrorResponse),

    #[error("{0}")]
    UpstreamTransport(ErrorResponse),

    #[error("upstream responded with {0}")]
    UpstreamUnexpectedStatus(StatusCode, ErrorResponse),
}

/// what the boundary knows about the request when a proxy error comes back
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub kind: MediaKind,
    pub original_url: &'a str,
    pub cargo_env: CargoEnv,
}

impl ErrorContext<'_> {
    fn not_found_label(&self) -> &'static str {
        match self.kind {
            MediaKind::Image => "Image not found or access denied",
            MediaKind::Video => "Video file not found",
        }
    }

    fn failure_label(&self) -> &'static str {
        match self.kind {
            MediaKind::Image => "Failed to load image",
            MediaKind::Video => "Video streaming failed",
        }
    }

    fn body(&self, error: &str, message: String, status: Option<StatusCode>) -> ErrorResponse {
        let mut body = ErrorResponse::new(error)
            .with_message(message)
            .with_original_url(self.original_url);
        if let Some(status) = status {
            body = body.with_status(status.as_u16());
        }
        body.redacted_for(self.cargo_env)
    }
}

impl Error {
    pub fn from_proxy(err: ProxyError, ctx: &ErrorContext) -> Self {
        if err.is_asset_missing() {
            let (message, status) = match &err {
                ProxyError::ExtractionFailed => (
                    "no file, src, <source> or <video> media reference found in player page"
                        .to_string(),
                    None,
                ),
                ProxyError::NotFound { .. } => (err.to_string(), Some(StatusCode::NOT_FOUND)),
                ProxyError::UpstreamError {
                    status, message, ..
                } => (message.clone(), *status),
                other => (other.to_string(), None),
            };
            return Self::AssetNotFound(ctx.body(ctx.not_found_label(), message, status));
        }

        let message = err.to_string();
        match err {
            ProxyError::Timeout { .. } => {
                Self::UpstreamTimeout(ctx.body(ctx.failure_label(), message, None))
            }
            ProxyError::UpstreamError {
                status: Some(status),
                ..
            } => Self::UpstreamUnexpectedStatus(
                status,
                ctx.body(ctx.failure_label(), message, Some(status)),
            ),
            _ => Self::UpstreamTransport(ctx.body(ctx.failure_label(), message, None)),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingParameter | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::AssetNotFound(_) => StatusCode::NOT_FOUND,
            // 416 goes back to the player as is
            Self::UpstreamUnexpectedStatus(status, _)
                if *status == StatusCode::RANGE_NOT_SATISFIABLE =>
            {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            Self::UpstreamTimeout(_)
            | Self::UpstreamTransport(_)
            | Self::UpstreamUnexpectedStatus(..) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Responding {} to client: {}", status, self);
        }

        let body = match self {
            Self::MissingParameter => ErrorResponse::new(MISSING_URL_MESSAGE),
            Self::BadRequest(message) => ErrorResponse::new(message),
            Self::AssetNotFound(body)
            | Self::UpstreamTimeout(body)
            | Self::UpstreamTransport(body)
            | Self::UpstreamUnexpectedStatus(_, body) => body,
        };

        (status, Json(body)).into_response()
    }
}

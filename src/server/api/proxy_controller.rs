// raw passthrough for thumbnails and anything else that isn't media, no resolution,
// no range handling, whatever upstream says goes straight back
use axum::{Extension, Router, extract::Query, response::Response, routing::get};
use tracing::{debug, error};

use crate::server::{
    api::cors_preflight,
    dtos::{ErrorResponse, MediaQuery},
    error::{AppResult, Error},
    services::MediaServices,
    utils::url_utils::parse_source_url,
};

pub const PROXY_ERROR_MESSAGE: &str = "Proxy error";

pub struct ProxyController;

impl ProxyController {
    pub fn app() -> Router {
        Router::new().route("/proxy", get(Self::proxy_get).options(cors_preflight))
    }

    async fn proxy_get(
        Extension(services): Extension<MediaServices>,
        Query(params): Query<MediaQuery>,
    ) -> AppResult<Response> {
        let raw_url = params
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or(Error::MissingParameter)?;

        let target_url = parse_source_url(&raw_url)?;
        debug!("Raw proxying {}", target_url);

        services.forwarder.pipe_raw(&target_url).await.map_err(|e| {
            error!("Raw proxy for {} failed: {}", target_url, e);
            Error::UpstreamTransport(
                ErrorResponse::new(PROXY_ERROR_MESSAGE)
                    .with_message(e.to_string())
                    .with_original_url(target_url.as_str())
                    .redacted_for(services.config.cargo_env),
            )
        })
    }
}

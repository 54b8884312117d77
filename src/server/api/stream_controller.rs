use axum::{Extension, Router, response::Response, routing::get};
use tracing::{error, info};

use crate::media::{Endpoint, MediaKind, StreamRequest};
use crate::server::{
    api::cors_preflight,
    error::{AppResult, Error, ErrorContext},
    services::MediaServices,
};

pub struct StreamController;

impl StreamController {
    pub fn app() -> Router {
        Router::new().route("/stream", get(Self::stream_get).options(cors_preflight))
    }

    async fn stream_get(
        Extension(services): Extension<MediaServices>,
        request: StreamRequest,
    ) -> AppResult<Response> {
        Self::serve(&services, request, Endpoint::Stream).await
    }

    /// resolve then forward, shared by every media route
    pub(crate) async fn serve(
        services: &MediaServices,
        request: StreamRequest,
        endpoint: Endpoint,
    ) -> AppResult<Response> {
        info!(
            "Serving {} via {:?} (range: {:?}, token: {})",
            request.source_url(),
            endpoint,
            request.range(),
            request.token().is_some()
        );

        let original_url = request.source_url().as_str();
        let cargo_env = services.config.cargo_env;

        // until resolution says otherwise a /stream request is a video
        let requested_kind = match endpoint {
            Endpoint::Image(_) => MediaKind::Image,
            Endpoint::Stream => MediaKind::Video,
        };

        let media = services
            .resolver
            .resolve(&request, endpoint)
            .await
            .map_err(|e| {
                error!("Resolving {} failed: {}", original_url, e);
                Error::from_proxy(
                    e,
                    &ErrorContext {
                        kind: requested_kind,
                        original_url,
                        cargo_env,
                    },
                )
            })?;

        let kind = media.kind;
        services
            .forwarder
            .forward(media, request.range())
            .await
            .map_err(|e| {
                error!("Forwarding {} failed: {}", original_url, e);
                Error::from_proxy(
                    e,
                    &ErrorContext {
                        kind,
                        original_url,
                        cargo_env,
                    },
                )
            })
    }
}

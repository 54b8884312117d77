use axum::{Extension, Router, response::Response, routing::get};

use crate::media::{Endpoint, ImageProfile, StreamRequest};
use crate::server::{
    api::{cors_preflight, stream_controller::StreamController},
    error::AppResult,
    services::MediaServices,
};

/// `/image`, `/img` and `/p` are one direct image path, they only differ in which
/// image profile the upstream request goes out with
pub struct ImageController;

impl ImageController {
    pub fn app() -> Router {
        Router::new()
            .route("/image", get(Self::browser_image).options(cors_preflight))
            .route("/img", get(Self::catalog_image).options(cors_preflight))
            .route("/p", get(Self::catalog_image).options(cors_preflight))
    }

    async fn browser_image(
        Extension(services): Extension<MediaServices>,
        request: StreamRequest,
    ) -> AppResult<Response> {
        StreamController::serve(
            &services,
            request,
            Endpoint::Image(ImageProfile::Browser),
        )
        .await
    }

    async fn catalog_image(
        Extension(services): Extension<MediaServices>,
        request: StreamRequest,
    ) -> AppResult<Response> {
        StreamController::serve(
            &services,
            request,
            Endpoint::Image(ImageProfile::CatalogReferer),
        )
        .await
    }
}

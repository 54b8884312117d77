pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, header},
    routing::get,
};
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::info;

use crate::config::AppConfig;

use api::{
    health_controller::health_endpoint, image_controller::ImageController,
    proxy_controller::ProxyController, stream_controller::StreamController,
};
use services::MediaServices;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

const CORS_ALLOW_METHODS: &str = "GET, HEAD, OPTIONS";
const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, Range";
// players read these cross origin to seek
const CORS_EXPOSE_HEADERS: &str = "Content-Length, Content-Range, Accept-Ranges, Content-Type";

pub struct ApplicationServer;

impl ApplicationServer {
    /// every route, wrapped so cors headers land on every response including errors
    pub fn router(services: MediaServices) -> Router {
        Router::new()
            .merge(StreamController::app())
            .merge(ProxyController::app())
            .merge(ImageController::app())
            .route("/health", get(health_endpoint))
            .layer(
                ServiceBuilder::new()
                    .layer(SetResponseHeaderLayer::overriding(
                        header::ACCESS_CONTROL_ALLOW_ORIGIN,
                        HeaderValue::from_static("*"),
                    ))
                    .layer(SetResponseHeaderLayer::overriding(
                        header::ACCESS_CONTROL_ALLOW_METHODS,
                        HeaderValue::from_static(CORS_ALLOW_METHODS),
                    ))
                    .layer(SetResponseHeaderLayer::overriding(
                        header::ACCESS_CONTROL_ALLOW_HEADERS,
                        HeaderValue::from_static(CORS_ALLOW_HEADERS),
                    ))
                    .layer(SetResponseHeaderLayer::overriding(
                        header::ACCESS_CONTROL_EXPOSE_HEADERS,
                        HeaderValue::from_static(CORS_EXPOSE_HEADERS),
                    ))
                    .layer(TraceLayer::new_for_http())
                    .layer(Extension(services)),
            )
    }

    pub async fn serve(config: Arc<AppConfig>) -> anyhow::Result<()> {
        Lazy::force(&START_TIME);

        let services = MediaServices::new(config.clone());
        let app = Self::router(services);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!(
            "media proxy listening on {} ({:?})",
            listener.local_addr().context("failed to read bound address")?,
            config.cargo_env
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;

        info!("media proxy shut down");

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl+c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::warn!("failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining connections");
}

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use tracing::{debug, error, warn};
use url::Url;

use crate::media::{HostRegistry, MediaKind, ProxyError, ProxyOutcome, ResolvedMedia, Stage};

use super::upstream_services::DynUpstreamService;

/// 24hrs, images on the catalog never change once uploaded
pub const IMAGE_CACHE_CONTROL: &str = "public, max-age=86400";

// copied as is from upstream on media responses, on top of the ones set explicitly below
const MEDIA_PASSTHROUGH_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::ETAG,
    header::LAST_MODIFIED,
];

// the raw proxy keeps everything describing the body and drops hop-by-hop headers
const RAW_PASSTHROUGH_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::CONTENT_DISPOSITION,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
    header::EXPIRES,
];

pub type DynForwarderService = Arc<dyn ForwarderServiceTrait + Send + Sync>;

#[async_trait]
pub trait ForwarderServiceTrait {
    /// final upstream fetch for resolved media, piped back with range and cache semantics
    async fn forward(&self, media: ResolvedMedia, range: Option<&str>) -> ProxyOutcome<Response>;

    /// plain fetch and pipe, upstream status and body go back untouched
    async fn pipe_raw(&self, url: &Url) -> ProxyOutcome<Response>;
}

pub struct ForwarderService {
    registry: Arc<HostRegistry>,
    upstream: DynUpstreamService,
}

impl ForwarderService {
    pub fn new(registry: Arc<HostRegistry>, upstream: DynUpstreamService) -> Self {
        Self { registry, upstream }
    }

    /// waits for the first chunk before handing the body over, so a body that fails right
    /// away still becomes a json error instead of a response with headers and nothing else
    async fn prime_body(upstream: reqwest::Response, media: &ResolvedMedia) -> ProxyOutcome<Body> {
        let url = media.final_url.clone();
        let mut stream = Box::pin(upstream.bytes_stream());

        let first = match tokio::time::timeout(media.timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => Some(chunk),
            Ok(Some(Err(e))) => {
                error!("Upstream body for {} failed before the first byte: {}", url, e);
                return Err(ProxyError::transport(
                    Stage::Media,
                    format!("failed to read upstream body: {}", e),
                ));
            }
            Ok(None) => None,
            Err(_) => {
                error!("Upstream body for {} stalled before the first byte", url);
                return Err(ProxyError::Timeout {
                    stage: Stage::Media,
                    after: media.timeout,
                });
            }
        };

        // headers are out by the time these fire, all we can do is end the stream
        let rest = stream.inspect_err(move |e| {
            warn!("Upstream body for {} ended mid stream: {}", url, e);
        });

        Ok(Body::from_stream(
            futures::stream::iter(first.map(Ok)).chain(rest),
        ))
    }

    fn copy_headers(from: &HeaderMap, to: &mut HeaderMap, names: &[header::HeaderName]) {
        for name in names {
            if let Some(value) = from.get(name) {
                to.insert(name.clone(), value.clone());
            }
        }
    }
}

#[async_trait]
impl ForwarderServiceTrait for ForwarderService {
    async fn forward(&self, media: ResolvedMedia, range: Option<&str>) -> ProxyOutcome<Response> {
        let mut request_headers = media.headers.clone();

        if media.forward_range {
            if let Some(range) = range {
                match HeaderValue::from_str(range) {
                    Ok(value) => {
                        request_headers.insert(header::RANGE, value);
                    }
                    Err(e) => warn!("Dropping unusable Range header {:?}: {}", range, e),
                }
            }
        }
        let sent_range = request_headers.contains_key(header::RANGE);

        let upstream = self
            .upstream
            .fetch(
                &media.final_url,
                request_headers,
                media.timeout,
                Stage::Media,
            )
            .await?;

        let upstream_status = upstream.status();
        if !upstream_status.is_success() {
            error!(
                "Media fetch for {} returned {}",
                media.final_url, upstream_status
            );
            return Err(ProxyError::status(Stage::Media, upstream_status));
        }

        let upstream_headers = upstream.headers().clone();
        let body = Self::prime_body(upstream, &media).await?;

        let mut response = Response::new(body);
        let headers = response.headers_mut();

        let content_type = upstream_headers
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(media.kind.default_content_type()));
        headers.insert(header::CONTENT_TYPE, content_type);

        Self::copy_headers(&upstream_headers, headers, MEDIA_PASSTHROUGH_HEADERS);

        // a 206 only ever answers a range we actually asked for
        let mut status = StatusCode::OK;
        if sent_range {
            if let Some(content_range) = upstream_headers.get(header::CONTENT_RANGE) {
                status = StatusCode::PARTIAL_CONTENT;
                headers.insert(header::CONTENT_RANGE, content_range.clone());
            }
        }

        if media.forward_range {
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }

        match media.kind {
            MediaKind::Image => {
                headers.insert(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static(IMAGE_CACHE_CONTROL),
                );
            }
            MediaKind::Video => {
                Self::copy_headers(&upstream_headers, headers, &[header::CACHE_CONTROL]);
            }
        }

        *response.status_mut() = status;

        debug!(
            "Forwarding {} as {} ({:?})",
            media.final_url,
            status,
            response.headers().get(header::CONTENT_TYPE)
        );

        Ok(response)
    }

    async fn pipe_raw(&self, url: &Url) -> ProxyOutcome<Response> {
        let profile = self.registry.raw();
        let headers = profile.render_headers(&self.registry.header_context());

        let upstream = self
            .upstream
            .fetch(url, headers, profile.timeout, Stage::Media)
            .await?;

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();

        let source = url.clone();
        let body = Body::from_stream(upstream.bytes_stream().inspect_err(move |e| {
            warn!("Raw proxy body for {} ended mid stream: {}", source, e);
        }));

        let mut response = Response::new(body);
        *response.status_mut() = status;
        Self::copy_headers(
            &upstream_headers,
            response.headers_mut(),
            RAW_PASSTHROUGH_HEADERS,
        );

        debug!("Raw proxy {} returned {}", url, status);

        Ok(response)
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mockall::automock;
use reqwest::header::HeaderMap;
use tracing::{debug, error};
use url::Url;

use crate::config::AppConfig;
use crate::media::{ProxyError, ProxyOutcome, Stage};

/// player pages are a few tens of kb, anything past this is not a player page
pub const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

pub type DynUpstreamService = Arc<dyn UpstreamServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait UpstreamServiceTrait {
    /// GET a player page and read the whole body, the timeout covers the body too
    async fn fetch_page(
        &self,
        url: &Url,
        headers: HeaderMap,
        timeout: Duration,
    ) -> ProxyOutcome<String>;

    /// GET that resolves as soon as response headers are in, whatever the status.
    /// the timeout only bounds the wait for headers so long media bodies can keep flowing
    async fn fetch(
        &self,
        url: &Url,
        headers: HeaderMap,
        timeout: Duration,
        stage: Stage,
    ) -> ProxyOutcome<reqwest::Response>;
}

pub struct UpstreamService {
    http: reqwest::Client,
}

impl UpstreamService {
    pub fn new(config: &AppConfig) -> Self {
        // user agents come from the host profiles so the client itself stays plain
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .unwrap_or_else(|e| {
                error!("failed to build upstream client, using defaults: {}", e);
                reqwest::Client::new()
            });

        Self { http }
    }

    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn page_too_large(stage: Stage) -> ProxyError {
        ProxyError::transport(
            stage,
            format!("player page is larger than {} bytes", MAX_PAGE_BYTES),
        )
    }

    fn map_send_error(err: reqwest::Error, stage: Stage, timeout: Duration) -> ProxyError {
        if err.is_timeout() {
            ProxyError::Timeout {
                stage,
                after: timeout,
            }
        } else {
            ProxyError::transport(stage, err)
        }
    }
}

#[async_trait]
impl UpstreamServiceTrait for UpstreamService {
    async fn fetch_page(
        &self,
        url: &Url,
        headers: HeaderMap,
        timeout: Duration,
    ) -> ProxyOutcome<String> {
        let stage = Stage::IntermediatePage;
        debug!("Fetching player page {}", url);

        let response = self
            .http
            .get(url.clone())
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                error!("{} for {} failed: {}", stage, url, e);
                Self::map_send_error(e, stage, timeout)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("{} for {} returned {}", stage, url, status);
            return Err(ProxyError::status(stage, status));
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_PAGE_BYTES as u64)
        {
            error!("Player page {} announces more than {} bytes", url, MAX_PAGE_BYTES);
            return Err(Self::page_too_large(stage));
        }

        // the per request timeout above still bounds this whole read
        let mut body = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| {
                error!("Failed to read player page {}: {}", url, e);
                Self::map_send_error(e, stage, timeout)
            })?;

            if body.len() + chunk.len() > MAX_PAGE_BYTES {
                error!("Player page {} exceeded {} bytes", url, MAX_PAGE_BYTES);
                return Err(Self::page_too_large(stage));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn fetch(
        &self,
        url: &Url,
        headers: HeaderMap,
        timeout: Duration,
        stage: Stage,
    ) -> ProxyOutcome<reqwest::Response> {
        debug!("Sending {} to {}", stage, url);

        let request = self.http.get(url.clone()).headers(headers).send();

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(response)) => {
                debug!("{} for {} returned {}", stage, url, response.status());
                Ok(response)
            }
            Ok(Err(e)) => {
                error!("{} for {} failed: {}", stage, url, e);
                Err(Self::map_send_error(e, stage, timeout))
            }
            Err(_) => {
                error!("{} for {} timed out after {:?}", stage, url, timeout);
                Err(ProxyError::Timeout {
                    stage,
                    after: timeout,
                })
            }
        }
    }
}

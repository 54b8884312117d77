use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use tracing::{debug, info, warn};
use url::Url;

use crate::media::{
    Endpoint, HostProfile, HostRegistry, MediaKind, ProxyError, ProxyOutcome, ResolvedMedia,
    StreamRequest, extract_match,
};

use super::upstream_services::DynUpstreamService;

pub type DynResolverService = Arc<dyn ResolverServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait ResolverServiceTrait {
    async fn resolve(
        &self,
        request: &StreamRequest,
        endpoint: Endpoint,
    ) -> ProxyOutcome<ResolvedMedia>;
}

/// how a request gets to its media, picked by `classify`
#[derive(Debug, Clone, Copy)]
pub enum Strategy<'a> {
    DirectAsset(&'a HostProfile, MediaKind),
    Tokenized(&'a str),
    KnownIntermediate(&'a HostProfile),
    Fallback,
}

type Classifier = for<'a> fn(&'a HostRegistry, &'a StreamRequest, Endpoint) -> Option<Strategy<'a>>;

// first hit wins, anything that falls through all of them is fetched as is
const CLASSIFIERS: &[Classifier] = &[
    classify_direct_asset,
    classify_tokenized,
    classify_intermediate,
];

fn classify_direct_asset<'a>(
    registry: &'a HostRegistry,
    request: &'a StreamRequest,
    endpoint: Endpoint,
) -> Option<Strategy<'a>> {
    registry
        .direct_asset(request.source_url(), endpoint)
        .map(|(profile, kind)| Strategy::DirectAsset(profile, kind))
}

fn classify_tokenized<'a>(
    _registry: &'a HostRegistry,
    request: &'a StreamRequest,
    _endpoint: Endpoint,
) -> Option<Strategy<'a>> {
    request.token().map(Strategy::Tokenized)
}

fn classify_intermediate<'a>(
    registry: &'a HostRegistry,
    request: &'a StreamRequest,
    _endpoint: Endpoint,
) -> Option<Strategy<'a>> {
    registry
        .intermediate_for(request.source_url())
        .map(Strategy::KnownIntermediate)
}

pub fn classify<'a>(
    registry: &'a HostRegistry,
    request: &'a StreamRequest,
    endpoint: Endpoint,
) -> Strategy<'a> {
    // image routes never scrape, whatever the url looks like
    if let Endpoint::Image(profile) = endpoint {
        return Strategy::DirectAsset(registry.image(profile), MediaKind::Image);
    }

    CLASSIFIERS
        .iter()
        .find_map(|classifier| classifier(registry, request, endpoint))
        .unwrap_or(Strategy::Fallback)
}

pub struct ResolverService {
    registry: Arc<HostRegistry>,
    upstream: DynUpstreamService,
}

impl ResolverService {
    pub fn new(registry: Arc<HostRegistry>, upstream: DynUpstreamService) -> Self {
        Self { registry, upstream }
    }

    fn direct(
        &self,
        url: &Url,
        profile: &HostProfile,
        kind: MediaKind,
        is_direct_asset: bool,
        token: Option<&str>,
    ) -> ResolvedMedia {
        let mut ctx = self.registry.header_context();
        if let Some(token) = token {
            ctx = ctx.with_token(token);
        }

        ResolvedMedia {
            final_url: url.clone(),
            headers: profile.render_headers(&ctx),
            is_direct_asset,
            kind,
            // images are always fetched whole so the 24h cache holds the full file
            forward_range: kind == MediaKind::Video,
            timeout: profile.timeout,
        }
    }

    async fn resolve_intermediate(
        &self,
        request: &StreamRequest,
        profile: &HostProfile,
    ) -> ProxyOutcome<ResolvedMedia> {
        let page_url = request.source_url();
        let headers = profile.render_headers(&self.registry.header_context());

        let html = self
            .upstream
            .fetch_page(page_url, headers, profile.timeout)
            .await?;

        let Some(found) = extract_match(&html) else {
            warn!(
                "No media reference in player page {} ({} bytes)",
                page_url,
                html.len()
            );
            return Err(ProxyError::ExtractionFailed);
        };

        debug!("Extractor rule '{}' matched in {}", found.rule, page_url);

        // players use relative and protocol relative urls too
        let media_url = match page_url.join(&found.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => url,
            Ok(url) => {
                warn!("Extracted media url {} is not fetchable", url);
                return Err(ProxyError::ExtractionFailed);
            }
            Err(e) => {
                warn!("Extracted media url {} does not parse: {}", found.url, e);
                return Err(ProxyError::ExtractionFailed);
            }
        };

        let second_stage = self.registry.second_stage();
        let ctx = self.registry.header_context().with_referer(page_url.as_str());

        info!("Resolved player page {} to {}", page_url, media_url);

        Ok(ResolvedMedia {
            headers: second_stage.render_headers(&ctx),
            final_url: media_url,
            is_direct_asset: false,
            kind: MediaKind::Video,
            forward_range: true,
            timeout: second_stage.timeout,
        })
    }
}

#[async_trait]
impl ResolverServiceTrait for ResolverService {
    async fn resolve(
        &self,
        request: &StreamRequest,
        endpoint: Endpoint,
    ) -> ProxyOutcome<ResolvedMedia> {
        let url = request.source_url();

        match classify(&self.registry, request, endpoint) {
            Strategy::DirectAsset(profile, kind) => {
                debug!("{} is a direct {:?} asset ({})", url, kind, profile.name);
                Ok(self.direct(url, profile, kind, true, None))
            }
            Strategy::Tokenized(token) => {
                debug!("{} is on tokenized storage", url);
                let profile = self.registry.tokenized();
                Ok(self.direct(url, profile, MediaKind::Video, false, Some(token)))
            }
            Strategy::KnownIntermediate(profile) => {
                debug!("{} is a player page ({})", url, profile.name);
                self.resolve_intermediate(request, profile).await
            }
            Strategy::Fallback => {
                debug!("{} matched no host profile, fetching directly", url);
                let profile = self.registry.fallback();
                Ok(self.direct(url, profile, MediaKind::Video, false, None))
            }
        }
    }
}

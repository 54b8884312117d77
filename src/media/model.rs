use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use url::Url;

/// a single inbound request for media, built once by the boundary layer and never changed after
#[derive(Debug, Clone)]
pub struct StreamRequest {
    source_url: Url,
    token: Option<String>,
    range: Option<String>,
}

impl StreamRequest {
    pub fn new(source_url: Url, token: Option<String>, range: Option<String>) -> Self {
        // empty strings from the query string are the same as the param not being there
        let token = token.filter(|t| !t.trim().is_empty());
        let range = range.filter(|r| !r.trim().is_empty());

        Self {
            source_url,
            token,
            range,
        }
    }

    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// raw `bytes=...` value, forwarded upstream verbatim
    pub fn range(&self) -> Option<&str> {
        self.range.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn default_content_type(&self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }
}

/// which image header profile an image route uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageProfile {
    /// plain browser request, used by `/stream` and `/image`
    Browser,
    /// browser request that also claims to come from the catalog site, used by `/img` and `/p`
    CatalogReferer,
}

/// which boundary endpoint a request came in through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Stream,
    Image(ImageProfile),
}

/// everything the forwarder needs for the final upstream fetch
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub final_url: Url,
    pub headers: HeaderMap,
    pub is_direct_asset: bool,
    pub kind: MediaKind,
    pub forward_range: bool,
    pub timeout: Duration,
}

/// the network call a failure happened on, only used for logging and messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    IntermediatePage,
    Media,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntermediatePage => write!(f, "intermediate page fetch"),
            Self::Media => write!(f, "media fetch"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{stage} returned 404, upstream does not have the asset")]
    NotFound { stage: Stage },

    #[error("no media reference found in player page")]
    ExtractionFailed,

    #[error("{stage} failed: {message}")]
    UpstreamError {
        stage: Stage,
        // none means the request never got a status back (connect, tls, body read...)
        status: Option<StatusCode>,
        message: String,
    },

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
}

impl ProxyError {
    pub fn transport(stage: Stage, err: impl fmt::Display) -> Self {
        Self::UpstreamError {
            stage,
            status: None,
            message: err.to_string(),
        }
    }

    pub fn status(stage: Stage, status: StatusCode) -> Self {
        if status == StatusCode::NOT_FOUND {
            return Self::NotFound { stage };
        }
        Self::UpstreamError {
            stage,
            status: Some(status),
            message: format!("upstream responded with status {}", status),
        }
    }

    /// upstream refused or does not have the asset, surfaced as a 404
    pub fn is_asset_missing(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::ExtractionFailed => true,
            Self::UpstreamError {
                status: Some(status),
                ..
            } => *status == StatusCode::FORBIDDEN || *status == StatusCode::NOT_FOUND,
            _ => false,
        }
    }
}

/// `Ok` is the success outcome, every other outcome lives in `ProxyError`
pub type ProxyOutcome<T = reqwest::Response> = Result<T, ProxyError>;

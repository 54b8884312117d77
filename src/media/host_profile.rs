/* Browser impersonation profiles for every upstream we talk to */
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;
use url::Url;

use crate::config::AppConfig;
use crate::media::model::{Endpoint, ImageProfile, MediaKind};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "mkv", "mov"];

/// player hosts that wrap the real file in an html page
pub const BUILTIN_INTERMEDIATE_HOSTS: &[&str] =
    &["desustream.info", "desustream.com", "desustream.me"];

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";
// the catalog site's own image requests don't carry Win64
const CATALOG_UA: &str = "Mozilla/5.0 (Windows NT 10.0; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";
const SEC_CH_UA: &str = r#""Not)A;Brand";v="8", "Chromium";v="138", "Brave";v="138""#;
const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const IMAGE_ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8";

type HeaderTemplate = &'static [(&'static str, &'static str)];

const BROWSER_IMAGE_HEADERS: HeaderTemplate = &[
    ("User-Agent", CHROME_UA),
    ("Accept", IMAGE_ACCEPT),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Cache-Control", "no-cache"),
    ("Pragma", "no-cache"),
];

const CATALOG_IMAGE_HEADERS: HeaderTemplate = &[
    ("User-Agent", CATALOG_UA),
    ("Accept", IMAGE_ACCEPT),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Referer", "{catalog}/"),
    ("Origin", "{catalog}"),
];

const DIRECT_VIDEO_HEADERS: HeaderTemplate = &[
    ("User-Agent", CHROME_UA),
    ("Accept", "*/*"),
    ("Accept-Language", "en-US,en;q=0.9"),
];

const TOKENIZED_HEADERS: HeaderTemplate = &[
    ("User-Agent", CHROME_UA),
    ("Accept", "*/*"),
    ("Authorization", "Bearer {token}"),
];

// no Host in any template: the client derives it from the url on every hop, a fixed
// one would follow redirects to the wrong host
const PLAYER_PAGE_HEADERS: HeaderTemplate = &[
    ("Accept", HTML_ACCEPT),
    ("Cache-Control", "no-cache"),
    ("Pragma", "no-cache"),
    ("Upgrade-Insecure-Requests", "1"),
    ("User-Agent", CHROME_UA),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Sec-GPC", "1"),
    ("Sec-CH-UA", SEC_CH_UA),
    ("Sec-CH-UA-Mobile", "?0"),
    ("Sec-CH-UA-Platform", "\"Windows\""),
];

// no Accept-Encoding on media fetches: bytes go out exactly as they came in, so
// Content-Length and Content-Range stay valid
const SECOND_STAGE_HEADERS: HeaderTemplate = &[
    ("Accept", HTML_ACCEPT),
    ("Accept-Language", "en-US,en;q=0.5"),
    ("Cache-Control", "no-cache"),
    ("Pragma", "no-cache"),
    ("Upgrade-Insecure-Requests", "1"),
    ("User-Agent", CHROME_UA),
    ("Sec-CH-UA", SEC_CH_UA),
    ("Sec-CH-UA-Mobile", "?0"),
    ("Sec-CH-UA-Platform", "\"Windows\""),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Sec-GPC", "1"),
    ("Referer", "{referer}"),
];

const FALLBACK_HEADERS: HeaderTemplate = &[
    ("User-Agent", CHROME_UA),
    ("Accept", "*/*"),
    ("Accept-Language", "en-US,en;q=0.9"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMatcher {
    Any,
    /// exact host or any subdomain of it
    Hosts(Vec<String>),
    /// file extension at the end of the url path, case insensitive
    Extensions(&'static [&'static str]),
}

impl HostMatcher {
    pub fn matches(&self, url: &Url) -> bool {
        match self {
            Self::Any => true,
            Self::Hosts(hosts) => {
                let Some(host) = url.host_str() else {
                    return false;
                };
                let host = host.to_ascii_lowercase();
                hosts.iter().any(|h| {
                    host == *h
                        || host
                            .strip_suffix(h.as_str())
                            .is_some_and(|prefix| prefix.ends_with('.'))
                })
            }
            Self::Extensions(extensions) => {
                let path = url.path().to_ascii_lowercase();
                let Some((_, ext)) = path.rsplit_once('.') else {
                    return false;
                };
                // "/a.b/c" has a dot but no extension
                !ext.contains('/') && extensions.contains(&ext)
            }
        }
    }
}

/// values substituted into `{name}` placeholders of a header template
#[derive(Debug, Clone, Default)]
pub struct HeaderContext<'a> {
    pub referer: Option<&'a str>,
    pub token: Option<&'a str>,
    pub catalog: Option<&'a str>,
}

impl<'a> HeaderContext<'a> {
    pub fn with_referer(mut self, referer: &'a str) -> Self {
        self.referer = Some(referer);
        self
    }

    pub fn with_token(mut self, token: &'a str) -> Self {
        self.token = Some(token);
        self
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "referer" => self.referer,
            "token" => self.token,
            "catalog" => self.catalog,
            _ => None,
        }
    }
}

/// fills the placeholders of one header value, `None` when a placeholder has no value
pub fn render_template(template: &str, ctx: &HeaderContext) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(ctx.lookup(&rest[open + 1..open + close])?);
        rest = &rest[open + close + 1..];
    }

    out.push_str(rest);
    Some(out)
}

#[derive(Debug, Clone)]
pub struct HostProfile {
    pub name: &'static str,
    pub matcher: HostMatcher,
    pub timeout: Duration,
    headers: HeaderTemplate,
}

impl HostProfile {
    pub fn new(
        name: &'static str,
        matcher: HostMatcher,
        headers: HeaderTemplate,
        timeout: Duration,
    ) -> Self {
        Self {
            name,
            matcher,
            timeout,
            headers,
        }
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.matcher.matches(url)
    }

    /// renders the template, headers whose placeholders can't be filled are left out
    pub fn render_headers(&self, ctx: &HeaderContext) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(self.headers.len());

        for (name, template) in self.headers {
            let Some(value) = render_template(template, ctx) else {
                continue;
            };

            let name = match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => name,
                Err(e) => {
                    warn!("Profile {} has invalid header name {}: {}", self.name, name, e);
                    continue;
                }
            };

            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(e) => warn!(
                    "Profile {} produced an invalid value for {}: {}",
                    self.name, name, e
                ),
            }
        }

        headers
    }
}

/// every profile the resolver can pick from, built once at startup and only read afterwards
#[derive(Debug, Clone)]
pub struct HostRegistry {
    browser_image: HostProfile,
    catalog_image: HostProfile,
    direct_video: HostProfile,
    tokenized: HostProfile,
    intermediates: Vec<HostProfile>,
    second_stage: HostProfile,
    fallback: HostProfile,
    raw: HostProfile,
    catalog_origin: String,
}

impl HostRegistry {
    pub fn from_config(config: &AppConfig) -> Self {
        let page_timeout = Duration::from_secs(config.page_timeout_secs);
        let media_timeout = Duration::from_secs(config.media_timeout_secs);
        let image_timeout = Duration::from_secs(config.image_timeout_secs);

        let mut player_hosts: Vec<String> = BUILTIN_INTERMEDIATE_HOSTS
            .iter()
            .map(|h| h.to_string())
            .collect();
        for host in &config.intermediate_hosts {
            let host = host.trim().to_ascii_lowercase();
            if !host.is_empty() && !player_hosts.contains(&host) {
                player_hosts.push(host);
            }
        }

        Self {
            browser_image: HostProfile::new(
                "browser-image",
                HostMatcher::Extensions(IMAGE_EXTENSIONS),
                BROWSER_IMAGE_HEADERS,
                image_timeout,
            ),
            catalog_image: HostProfile::new(
                "catalog-image",
                HostMatcher::Any,
                CATALOG_IMAGE_HEADERS,
                image_timeout,
            ),
            direct_video: HostProfile::new(
                "direct-video",
                HostMatcher::Extensions(VIDEO_EXTENSIONS),
                DIRECT_VIDEO_HEADERS,
                media_timeout,
            ),
            tokenized: HostProfile::new(
                "tokenized-storage",
                HostMatcher::Any,
                TOKENIZED_HEADERS,
                media_timeout,
            ),
            intermediates: vec![HostProfile::new(
                "desustream-player",
                HostMatcher::Hosts(player_hosts),
                PLAYER_PAGE_HEADERS,
                page_timeout,
            )],
            second_stage: HostProfile::new(
                "extracted-media",
                HostMatcher::Any,
                SECOND_STAGE_HEADERS,
                media_timeout,
            ),
            fallback: HostProfile::new(
                "fallback",
                HostMatcher::Any,
                FALLBACK_HEADERS,
                media_timeout,
            ),
            raw: HostProfile::new("raw", HostMatcher::Any, &[], media_timeout),
            catalog_origin: config.catalog_origin.trim_end_matches('/').to_string(),
        }
    }

    pub fn image(&self, profile: ImageProfile) -> &HostProfile {
        match profile {
            ImageProfile::Browser => &self.browser_image,
            ImageProfile::CatalogReferer => &self.catalog_image,
        }
    }

    /// direct image or (on `/stream` only) direct video file
    pub fn direct_asset(&self, url: &Url, endpoint: Endpoint) -> Option<(&HostProfile, MediaKind)> {
        if self.browser_image.matches(url) {
            return Some((&self.browser_image, MediaKind::Image));
        }
        if endpoint == Endpoint::Stream && self.direct_video.matches(url) {
            return Some((&self.direct_video, MediaKind::Video));
        }
        None
    }

    pub fn intermediate_for(&self, url: &Url) -> Option<&HostProfile> {
        self.intermediates.iter().find(|p| p.matches(url))
    }

    pub fn tokenized(&self) -> &HostProfile {
        &self.tokenized
    }

    pub fn second_stage(&self) -> &HostProfile {
        &self.second_stage
    }

    pub fn fallback(&self) -> &HostProfile {
        &self.fallback
    }

    pub fn raw(&self) -> &HostProfile {
        &self.raw
    }

    /// base context every rendered template starts from
    pub fn header_context(&self) -> HeaderContext<'_> {
        HeaderContext {
            catalog: Some(&self.catalog_origin),
            ..Default::default()
        }
    }
}

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use tracing::error;
use url::Url;

use crate::server::error::{AppResult, Error};

pub const INVALID_URL_MESSAGE: &str = "Invalid url parameter";

/// the url param is either a plain http(s) url or url safe base64 of one, with or
/// without padding. the query extractor has already percent decoded it
pub fn decode_url(url_param: &str) -> AppResult<String> {
    let url_param = url_param.trim();

    if url_param.starts_with("http://") || url_param.starts_with("https://") {
        return Ok(url_param.to_string());
    }

    let mut padded = url_param.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = URL_SAFE.decode(&padded).map_err(|e| {
        error!("Failed to decode base64 url param: {}", e);
        Error::BadRequest(INVALID_URL_MESSAGE.to_string())
    })?;

    String::from_utf8(bytes).map_err(|e| {
        error!("Decoded url param is not UTF-8: {}", e);
        Error::BadRequest(INVALID_URL_MESSAGE.to_string())
    })
}

pub fn parse_source_url(url_param: &str) -> AppResult<Url> {
    let decoded = decode_url(url_param)?;

    let url = Url::parse(&decoded).map_err(|e| {
        error!("Failed to parse source url {}: {}", decoded, e);
        Error::BadRequest(INVALID_URL_MESSAGE.to_string())
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::BadRequest(INVALID_URL_MESSAGE.to_string()));
    }

    Ok(url)
}

use axum::extract::{FromRequestParts, Query};
use axum::http::header::RANGE;
use axum::http::request::Parts;
use tracing::debug;

use crate::media::StreamRequest;
use crate::server::dtos::MediaQuery;
use crate::server::error::Error;
use crate::server::utils::url_utils::parse_source_url;

/// builds a `StreamRequest` from `?url=&token=` and the inbound Range header.
/// a missing url is rejected here, before any handler or upstream call runs
impl<S> FromRequestParts<S> for StreamRequest
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<MediaQuery>::try_from_uri(&parts.uri)
            .map_err(|err| Error::BadRequest(err.body_text()))?;

        let raw_url = query
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or(Error::MissingParameter)?;

        let source_url = parse_source_url(&raw_url)?;

        let range = parts
            .headers
            .get(RANGE)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        debug!("Media request for {} (range: {:?})", source_url, range);

        Ok(StreamRequest::new(source_url, query.token, range))
    }
}

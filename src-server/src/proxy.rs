//! Stream proxy
//!
//! Re-serves a station's upstream stream from our own origin so browsers can
//! play stations that reject cross-origin or non-browser requests. The body
//! is passed through untouched and never buffered. Bodies end when the
//! daemon starts shutting down, since an upstream stream never does.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::AppState;

/// Presented upstream in place of our own client string
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

/// `scheme://host[:port]` of `url`, used for `Origin`/`Referer`
fn origin_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// GET /api/stream/{id}
pub async fn proxy_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let station = state
        .catalog
        .station(&id)
        .ok_or_else(|| ApiError::StationNotFound(id.clone()))?;
    let upstream = station
        .direct_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::NoDirectUrl(id.clone()))?;
    let origin = origin_of(upstream)
        .ok_or_else(|| ApiError::Internal(format!("Invalid upstream URL for {id}")))?;

    info!("Proxying {} from {}", id, upstream);
    let response = state
        .proxy
        .get(upstream)
        .header(header::USER_AGENT, BROWSER_USER_AGENT)
        .header(header::ORIGIN, &origin)
        .header(header::REFERER, format!("{origin}/"))
        .send()
        .await
        .map_err(|e| ApiError::Unreachable(e.to_string()))?;

    if !response.status().is_success() {
        let status =
            StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        return Err(ApiError::Upstream(status));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store"),
    );

    // No Content-Length, so hyper sends the body chunked
    let station_id = id.clone();
    let stream = response
        .bytes_stream()
        .map_err(move |e| {
            debug!("Upstream for {} closed: {}", station_id, e);
            std::io::Error::other(e)
        })
        .take_until(state.closing.clone().cancelled_owned());

    Ok((headers, Body::from_stream(stream)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("http://radio.example:8000/live.mp3?x=1").as_deref(),
            Some("http://radio.example:8000")
        );
        assert_eq!(
            origin_of("https://cdn.example/stream").as_deref(),
            Some("https://cdn.example")
        );
        assert_eq!(origin_of("not a url"), None);
    }
}

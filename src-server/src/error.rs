//! API error responses
//!
//! Every failure leaves as `{ "error": message }` with a matching status.
//! Stream errors carry their classified kind and the user-facing text, never
//! the raw error chain.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use airwave_core::{DspError, GraphError, StreamError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unknown station: {0}")]
    StationNotFound(String),

    #[error("Station {0} has no direct stream URL")]
    NoDirectUrl(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned {0}")]
    Upstream(StatusCode),

    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Dsp(#[from] DspError),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn graph_status(e: &GraphError) -> StatusCode {
    match e {
        GraphError::Resume(_) => StatusCode::FORBIDDEN,
        GraphError::Dsp(_) => StatusCode::BAD_REQUEST,
        GraphError::Init(_) | GraphError::NotInitialized | GraphError::Closed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::StationNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NoDirectUrl(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(status) => *status,
            ApiError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Stream(e) => match e {
                StreamError::Superseded => StatusCode::CONFLICT,
                StreamError::PlaybackPermission => StatusCode::FORBIDDEN,
                StreamError::FormatUnsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                StreamError::ConnectTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                StreamError::Graph(e) => graph_status(e),
                StreamError::Network(_)
                | StreamError::MaxRetriesExceeded { .. }
                | StreamError::Resolution(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Graph(e) => graph_status(e),
            ApiError::Dsp(DspError::UnknownPreset(_)) => StatusCode::NOT_FOUND,
            ApiError::Dsp(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let body = match &self {
            ApiError::Stream(e) => json!({
                "error": e.user_message(),
                "kind": e.kind(),
            }),
            ApiError::Graph(e) => json!({ "error": e.user_message() }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::StationNotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::NoDirectUrl("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Upstream(StatusCode::FORBIDDEN).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(StreamError::ConnectTimeout(Duration::from_secs(12))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(StreamError::Graph(GraphError::Closed)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(DspError::UnknownPreset("Jazz".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(DspError::InvalidBandIndex(9)).status(),
            StatusCode::BAD_REQUEST
        );
    }
}

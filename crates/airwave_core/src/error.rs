//! Core Error Types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the shared audio graph
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// The audio context could not be constructed; fatal until `retry()`
    #[error("Audio graph failed to initialize: {0}")]
    Init(String),

    /// The context refused to leave `suspended`; usually needs a user gesture
    #[error("Audio context could not be resumed: {0}")]
    Resume(String),

    #[error("Audio graph not initialized")]
    NotInitialized,

    #[error("Audio graph has been closed")]
    Closed,

    #[error("DSP error: {0}")]
    Dsp(#[from] airwave_dsp::DspError),
}

impl GraphError {
    /// Short text suitable for showing next to the player
    pub fn user_message(&self) -> String {
        match self {
            GraphError::Init(_) => "Audio is unavailable. Please try again.".to_string(),
            GraphError::Resume(_) => "Tap play to enable audio.".to_string(),
            GraphError::NotInitialized => "Audio has not started yet.".to_string(),
            GraphError::Closed => "Audio has been shut down.".to_string(),
            GraphError::Dsp(e) => e.to_string(),
        }
    }
}

/// Classification of a [`StreamError`], serializable for status snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    Resolution,
    ConnectTimeout,
    Network,
    PlaybackPermission,
    FormatUnsupported,
    MaxRetriesExceeded,
    Graph,
    Superseded,
}

/// Errors raised while connecting or supervising a stream
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// URL discovery failed; the raw URL is used instead
    #[error("Could not resolve stream URL: {0}")]
    Resolution(String),

    #[error("Stream was not ready within {}s", .0.as_secs())]
    ConnectTimeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Playback was blocked until the next user interaction")]
    PlaybackPermission,

    #[error("Unsupported stream format: {0}")]
    FormatUnsupported(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        last: Box<StreamError>,
    },

    #[error("Audio graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Connection attempt was superseded")]
    Superseded,
}

impl StreamError {
    pub fn kind(&self) -> StreamErrorKind {
        match self {
            StreamError::Resolution(_) => StreamErrorKind::Resolution,
            StreamError::ConnectTimeout(_) => StreamErrorKind::ConnectTimeout,
            StreamError::Network(_) => StreamErrorKind::Network,
            StreamError::PlaybackPermission => StreamErrorKind::PlaybackPermission,
            StreamError::FormatUnsupported(_) => StreamErrorKind::FormatUnsupported,
            StreamError::MaxRetriesExceeded { .. } => StreamErrorKind::MaxRetriesExceeded,
            StreamError::Graph(_) => StreamErrorKind::Graph,
            StreamError::Superseded => StreamErrorKind::Superseded,
        }
    }

    /// Whether the session's backoff timer may retry this failure
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectTimeout(_) | StreamError::Network(_)
        )
    }

    /// Classified message for display; never a raw error chain
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Resolution(_) => "Could not look up the stream.".to_string(),
            StreamError::ConnectTimeout(_) => "The station took too long to respond.".to_string(),
            StreamError::Network(_) => "Could not reach the station.".to_string(),
            StreamError::PlaybackPermission => "Press play to start listening.".to_string(),
            StreamError::FormatUnsupported(_) => {
                "This stream's format is not supported. Try another station.".to_string()
            }
            StreamError::MaxRetriesExceeded { .. } => {
                "The station is unavailable right now. Try again later.".to_string()
            }
            StreamError::Graph(e) => e.user_message(),
            StreamError::Superseded => "Switched to another stream.".to_string(),
        }
    }
}

/// Turn a reqwest failure into a short, host-level description
pub(crate) fn describe_http_error(e: &reqwest::Error) -> String {
    if e.is_builder() {
        return match e.url() {
            Some(url) => format!("Invalid URL: {url}"),
            None => "Invalid URL".to_string(),
        };
    }
    if e.is_connect() {
        let host = e.url().and_then(|u| u.host_str()).unwrap_or("server");
        return format!("Could not connect to {host}");
    }
    if e.is_timeout() {
        return "Connection timed out".to_string();
    }
    if let Some(status) = e.status() {
        return format!("HTTP {status}");
    }
    e.to_string()
}

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::Init("no output device".into());
        assert!(err.to_string().contains("no output device"));

        let err = StreamError::ConnectTimeout(Duration::from_secs(12));
        assert_eq!(err.to_string(), "Stream was not ready within 12s");
    }

    #[test]
    fn test_retriable_classification() {
        assert!(StreamError::Network("reset".into()).is_retriable());
        assert!(StreamError::ConnectTimeout(Duration::from_secs(1)).is_retriable());
        assert!(!StreamError::PlaybackPermission.is_retriable());
        assert!(!StreamError::FormatUnsupported("audio/x-foo".into()).is_retriable());
        assert!(!StreamError::Superseded.is_retriable());
    }

    #[test]
    fn test_user_message_hides_details() {
        let err = StreamError::MaxRetriesExceeded {
            attempts: 4,
            last: Box::new(StreamError::Network("tcp connect error: 10.0.0.1:80".into())),
        };
        assert!(!err.user_message().contains("10.0.0.1"));
        assert_eq!(err.kind(), StreamErrorKind::MaxRetriesExceeded);
    }

    #[test]
    fn test_error_from_graph() {
        let graph_err = GraphError::Resume("not allowed".into());
        let stream_err: StreamError = graph_err.into();
        assert!(matches!(stream_err, StreamError::Graph(_)));
        assert_eq!(stream_err.user_message(), "Tap play to enable audio.");
    }

    #[test]
    fn test_error_from_dsp() {
        let dsp_err = airwave_dsp::DspError::InvalidBandIndex(7);
        let graph_err: GraphError = dsp_err.into();
        assert!(matches!(graph_err, GraphError::Dsp(_)));
    }
}

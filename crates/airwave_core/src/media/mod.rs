//! Media Elements
//!
//! A media element fetches one stream, decodes it into its source node and
//! reports readiness through [`MediaEvent`]s. Sessions await those events
//! instead of registering callbacks.

mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::graph::{GraphState, SourceHandle, SourceWriter};

pub use http::HttpMediaFactory;

/// Why a media element failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorKind {
    Network,
    Decode,
    NotSupported,
    Aborted,
}

/// Readiness notifications from a media element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Enough audio is buffered to start playback
    CanPlay,
    /// Data stopped arriving; playback will stall
    Waiting,
    /// Data is flowing again
    Playing,
    /// A finite stream played to its end
    Ended,
    Error(MediaErrorKind),
}

/// Why `play()` was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayError {
    /// The audio context may not start without user activation
    #[error("Playback not allowed")]
    NotAllowed,

    #[error("Media not supported: {0}")]
    NotSupported(String),

    #[error("{0}")]
    Other(String),
}

/// Failure to create a media element
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub message: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Everything an element needs to feed the graph
pub struct MediaRequest {
    pub url: String,
    /// Container/codec hint such as `mp3` or `aac`
    pub format_hint: Option<String>,
    pub handle: SourceHandle,
    pub writer: SourceWriter,
    /// Graph lifecycle, for gating `play()`
    pub context: watch::Receiver<GraphState>,
}

/// A playing (or loading) stream bound to one source node
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Next readiness event; `None` once the element has been stopped
    async fn next_event(&self) -> Option<MediaEvent>;

    async fn play(&self) -> Result<(), PlayError>;

    fn pause(&self);

    /// Element volume in [0, 1]
    fn set_volume(&self, volume: f32);

    /// Pause and unload; no further events are produced
    fn stop(&self);
}

pub trait MediaElementFactory: Send + Sync {
    /// Start loading `request.url`; loading continues in the background
    fn create(&self, request: MediaRequest) -> Result<Arc<dyn MediaElement>, MediaError>;
}

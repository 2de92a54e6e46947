//! Airwave Core - Stream Playback Engine
//!
//! This crate provides the playback core for Airwave, including:
//! - One shared audio graph (equalizer, master gain, analyser taps)
//! - Supervised stream sessions with retry and supersession
//! - Stream URL resolution, HTTP media elements and ICY metadata
//! - Queue-level playback control and persisted settings
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Control plane (tokio)                   │
//! │  PlaybackController ──▶ StreamSession ──▶ AudioGraphManager │
//! │                              │                   │          │
//! │                      MediaElement         GraphCommand      │
//! └──────────────────────────────┼───────────────────┼──────────┘
//!                                │ rtrb              │ crossbeam-channel
//!                                ▼                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Render thread                          │
//! │   Sources ──▶ Equalizer ──▶ Analysers ──▶ Master ──▶ Output │
//! │              (Zero allocation in this path)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod catalog;
mod config;
mod equalizer;
mod error;
mod graph;
mod media;
mod message;
mod metadata;
mod playback;
mod resolver;
mod session;
mod settings;

#[cfg(test)]
mod test_support;

pub use catalog::{Catalog, CatalogError, PlayableItem, RadioStation, Track};
pub use config::{GraphConfig, LatencyHint, ResolverConfig, SessionConfig};
pub use equalizer::{BandStatus, EqualizerController, EqualizerStatus};
pub use error::{GraphError, GraphResult, StreamError, StreamErrorKind, StreamResult};
pub use graph::{
    Activation, AnalyserHandle, AudioBackend, AudioContextDriver, AudioGraphManager,
    AutoplayPolicy, ContextOptions, ContextState, CpalBackend, GraphState, GraphStatus,
    OfflineBackend, OfflineRenderer, SourceHandle, SourceNode, SourceWriter,
};
pub use media::{
    HttpMediaFactory, MediaElement, MediaElementFactory, MediaError, MediaErrorKind, MediaEvent,
    MediaRequest, PlayError,
};
pub use message::{AnalyserId, SessionEvent, SourceId};
pub use metadata::{format_stream_title, IcyMetadataClient};
pub use playback::{PlaybackController, PlaybackStatus};
pub use resolver::{
    detect_format_hint, parse_m3u, parse_pls, HttpResolver, PlaylistKind, Resolution,
    StreamResolver,
};
pub use session::{ConnectionState, SessionSnapshot, StreamSession};
pub use settings::{AirwaveSettings, EqSettings, SettingsError};

// Re-export DSP types for convenience
pub use airwave_dsp::{AnalyserConfig, DspError, EqConfig, BAND_COUNT, EQ_BANDS, PRESETS};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify public API is accessible
        let _config = GraphConfig::default();
        let _session = SessionConfig::default();
        assert_eq!(PRESETS[0].0, "Flat");
    }
}

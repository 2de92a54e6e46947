//! Airwave Server Library - HTTP API and State
//!
//! This module exposes the playback core over HTTP: a stream proxy for
//! browser clients plus control endpoints for the daemon's own player.

mod config;
mod error;
mod proxy;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use airwave_core::{
    AirwaveSettings, AudioGraphManager, Catalog, IcyMetadataClient, PlaybackController,
};

pub use config::{Args, BackendKind};
pub use error::ApiError;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub graph: Arc<AudioGraphManager>,
    pub player: Arc<PlaybackController>,
    pub metadata: Arc<IcyMetadataClient>,
    /// Client for the stream proxy; no overall timeout since streams are endless
    pub proxy: reqwest::Client,
    pub settings: Arc<Mutex<AirwaveSettings>>,
    /// Where settings are written; `None` disables persistence
    pub settings_path: Option<PathBuf>,
    /// Cancelled once shutdown starts; ends open proxy bodies
    pub closing: CancellationToken,
}

impl AppState {
    pub fn new(
        catalog: Catalog,
        player: Arc<PlaybackController>,
        settings: AirwaveSettings,
        settings_path: Option<PathBuf>,
        user_agent: &str,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            catalog: Arc::new(catalog),
            graph: Arc::clone(player.graph()),
            metadata: Arc::new(IcyMetadataClient::new(user_agent)?),
            proxy: reqwest::Client::builder().build()?,
            player,
            settings: Arc::new(Mutex::new(settings)),
            settings_path,
            closing: CancellationToken::new(),
        })
    }

    /// Capture the player's levels and equalizer and write them out
    pub fn persist(&self) {
        let Some(path) = self.settings_path.as_deref() else {
            return;
        };
        let mut settings = self.settings.lock();
        settings.capture(&self.graph, self.player.session());
        if let Err(e) = settings.save_to(path) {
            warn!("Failed to save settings: {}", e);
        }
    }

    /// Start the station played last, if it is still in the catalog
    pub async fn resume_last_station(&self) -> Option<String> {
        let id = self.settings.lock().last_station.clone()?;
        let Some(station) = self.catalog.station(&id).cloned() else {
            warn!("Last station {} is no longer in the catalog", id);
            return None;
        };
        info!("Resuming last station {}", station.name);
        match self.player.play_station(station).await {
            Ok(()) => Some(id),
            Err(e) => {
                warn!("Could not resume {}: {}", id, e);
                None
            }
        }
    }

    /// Stop accepting work: open proxy bodies end and the server can drain
    pub fn begin_shutdown(&self) {
        self.closing.cancel();
    }

    /// Stop playback, save settings and close the audio graph
    pub async fn shutdown(&self) {
        self.begin_shutdown();
        info!("Shutting down player");
        self.player.stop();
        self.persist();
        self.graph.teardown().await;
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stations", get(routes::get_stations))
        .route("/api/catalog", get(routes::get_catalog))
        .route("/api/stream/{id}", get(proxy::proxy_stream))
        .route("/api/metadata", post(routes::post_metadata))
        .route("/api/player/play", post(routes::play))
        .route("/api/player/stop", post(routes::stop))
        .route("/api/player/pause", post(routes::pause))
        .route("/api/player/resume", post(routes::resume))
        .route("/api/player/next", post(routes::next))
        .route("/api/player/previous", post(routes::previous))
        .route("/api/player/status", get(routes::player_status))
        .route("/api/player/volume", put(routes::set_volume))
        .route("/api/player/mute", put(routes::set_muted))
        .route("/api/graph/resume", post(routes::resume_graph))
        .route("/api/graph/volume", put(routes::set_master_volume))
        .route("/api/graph/status", get(routes::graph_status))
        .route("/api/spectrum", get(routes::spectrum))
        .route("/api/eq", get(routes::get_eq))
        .route("/api/eq/bands/{index}", put(routes::set_band))
        .route("/api/eq/preset", post(routes::apply_preset))
        .route("/api/eq/enabled", put(routes::set_eq_enabled))
        .with_state(state)
}

//! Route handlers - player, graph, equalizer and catalog endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use airwave_core::{
    Activation, Catalog, EqualizerStatus, GraphState, GraphStatus, PlaybackStatus, RadioStation,
    Track,
};

use crate::error::ApiError;
use crate::AppState;

const DEFAULT_SPECTRUM_BINS: usize = 32;
const MAX_SPECTRUM_BINS: usize = 256;

// ============================================================================
// Request / Response Bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    pub station_id: Option<String>,
    pub url: Option<String>,
    /// Queue these catalog tracks instead
    #[serde(default)]
    pub track_ids: Vec<String>,
    #[serde(default)]
    pub start: usize,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    pub level: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeResponse {
    pub level: f32,
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct MetadataRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SpectrumQuery {
    pub bins: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpectrumResponse {
    /// False until a stream is connected
    pub available: bool,
    pub bins: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub struct BandRequest {
    pub gain_db: f32,
}

#[derive(Debug, Deserialize)]
pub struct PresetRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

// ============================================================================
// Catalog
// ============================================================================

/// GET /api/stations
pub async fn get_stations(State(state): State<AppState>) -> Json<Vec<RadioStation>> {
    Json(state.catalog.stations.clone())
}

/// GET /api/catalog
pub async fn get_catalog(State(state): State<AppState>) -> Json<Catalog> {
    Json(state.catalog.as_ref().clone())
}

/// POST /api/metadata
pub async fn post_metadata(
    State(state): State<AppState>,
    Json(request): Json<MetadataRequest>,
) -> Result<Json<MetadataResponse>, ApiError> {
    if request.url.trim().is_empty() {
        return Err(ApiError::BadRequest("url is required".to_string()));
    }
    let title = state.metadata.lookup(&request.url).await;
    Ok(Json(MetadataResponse { title }))
}

// ============================================================================
// Player
// ============================================================================

/// POST /api/player/play
pub async fn play(
    State(state): State<AppState>,
    Json(request): Json<PlayRequest>,
) -> Result<Json<PlaybackStatus>, ApiError> {
    if let Some(id) = request.station_id.as_deref() {
        let station = state
            .catalog
            .station(id)
            .cloned()
            .ok_or_else(|| ApiError::StationNotFound(id.to_string()))?;
        state.player.play_station(station).await?;
        state.settings.lock().last_station = Some(id.to_string());
        state.persist();
    } else if !request.track_ids.is_empty() {
        let tracks = request
            .track_ids
            .iter()
            .map(|id| {
                state
                    .catalog
                    .track(id)
                    .cloned()
                    .ok_or_else(|| ApiError::BadRequest(format!("Unknown track: {id}")))
            })
            .collect::<Result<Vec<Track>, _>>()?;
        state.player.play_tracks(tracks, request.start).await?;
    } else if let Some(url) = request.url.as_deref().filter(|u| !u.trim().is_empty()) {
        state.player.play_url(url).await?;
    } else {
        return Err(ApiError::BadRequest(
            "One of station_id, track_ids or url is required".to_string(),
        ));
    }
    Ok(Json(state.player.status()))
}

/// POST /api/player/stop
pub async fn stop(State(state): State<AppState>) -> Json<PlaybackStatus> {
    state.player.stop();
    Json(state.player.status())
}

/// POST /api/player/pause
pub async fn pause(State(state): State<AppState>) -> Json<PlaybackStatus> {
    state.player.pause();
    Json(state.player.status())
}

/// POST /api/player/resume
pub async fn resume(State(state): State<AppState>) -> Result<Json<PlaybackStatus>, ApiError> {
    state.player.resume().await?;
    Ok(Json(state.player.status()))
}

/// POST /api/player/next
pub async fn next(State(state): State<AppState>) -> Result<Json<PlaybackStatus>, ApiError> {
    state.player.next().await?;
    Ok(Json(state.player.status()))
}

/// POST /api/player/previous
pub async fn previous(State(state): State<AppState>) -> Result<Json<PlaybackStatus>, ApiError> {
    state.player.previous().await?;
    Ok(Json(state.player.status()))
}

/// GET /api/player/status
pub async fn player_status(State(state): State<AppState>) -> Json<PlaybackStatus> {
    Json(state.player.status())
}

/// PUT /api/player/volume
pub async fn set_volume(
    State(state): State<AppState>,
    Json(request): Json<VolumeRequest>,
) -> Json<VolumeResponse> {
    let level = state.player.set_volume(request.level);
    state.persist();
    Json(VolumeResponse { level })
}

/// PUT /api/player/mute
pub async fn set_muted(
    State(state): State<AppState>,
    Json(request): Json<MuteRequest>,
) -> Json<PlaybackStatus> {
    state.player.set_muted(request.muted);
    state.persist();
    Json(state.player.status())
}

// ============================================================================
// Graph
// ============================================================================

/// POST /api/graph/resume - treated as a user gesture
pub async fn resume_graph(State(state): State<AppState>) -> Result<Json<GraphStatus>, ApiError> {
    if state.graph.state() == GraphState::Error {
        state.graph.retry().await?;
    }
    state.graph.resume(Activation::UserGesture).await?;
    Ok(Json(state.graph.status()))
}

/// PUT /api/graph/volume
pub async fn set_master_volume(
    State(state): State<AppState>,
    Json(request): Json<VolumeRequest>,
) -> Json<VolumeResponse> {
    let level = state.player.set_master_volume(request.level);
    state.persist();
    Json(VolumeResponse { level })
}

/// GET /api/graph/status
pub async fn graph_status(State(state): State<AppState>) -> Json<GraphStatus> {
    Json(state.graph.status())
}

/// GET /api/spectrum?bins=N
pub async fn spectrum(
    State(state): State<AppState>,
    Query(query): Query<SpectrumQuery>,
) -> Json<SpectrumResponse> {
    let bins = query
        .bins
        .unwrap_or(DEFAULT_SPECTRUM_BINS)
        .clamp(1, MAX_SPECTRUM_BINS);
    match state.player.session().analyser() {
        Some(analyser) => Json(SpectrumResponse {
            available: true,
            bins: analyser.log_spectrum(bins),
        }),
        None => Json(SpectrumResponse {
            available: false,
            bins: vec![0.0; bins],
        }),
    }
}

// ============================================================================
// Equalizer
// ============================================================================

/// GET /api/eq
pub async fn get_eq(State(state): State<AppState>) -> Json<EqualizerStatus> {
    Json(state.graph.equalizer().status())
}

/// PUT /api/eq/bands/{index}
pub async fn set_band(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(request): Json<BandRequest>,
) -> Result<Json<EqualizerStatus>, ApiError> {
    if !request.gain_db.is_finite() {
        return Err(ApiError::BadRequest("gain_db must be finite".to_string()));
    }
    state
        .graph
        .equalizer()
        .set_band_gain(index, request.gain_db)?;
    state.persist();
    Ok(Json(state.graph.equalizer().status()))
}

/// POST /api/eq/preset
pub async fn apply_preset(
    State(state): State<AppState>,
    Json(request): Json<PresetRequest>,
) -> Result<Json<EqualizerStatus>, ApiError> {
    state.graph.equalizer().apply_preset(&request.name)?;
    info!("Applied EQ preset {}", request.name);
    state.persist();
    Ok(Json(state.graph.equalizer().status()))
}

/// PUT /api/eq/enabled
pub async fn set_eq_enabled(
    State(state): State<AppState>,
    Json(request): Json<EnabledRequest>,
) -> Json<EqualizerStatus> {
    state.graph.equalizer().toggle(request.enabled);
    state.persist();
    Json(state.graph.equalizer().status())
}

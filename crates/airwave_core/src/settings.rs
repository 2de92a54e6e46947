//! Persisted Player Settings
//!
//! Volume, mute, equalizer state and the last station, kept as one JSON file.
//! A missing or unreadable file means defaults, never a startup failure.
//!
//! # Storage Locations
//! - Linux: `~/.config/airwave/settings.json`
//! - Windows: `%APPDATA%\airwave\settings.json`
//! - macOS: `~/Library/Application Support/airwave/settings.json`

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use airwave_dsp::BAND_COUNT;

use crate::equalizer::EqualizerController;
use crate::graph::AudioGraphManager;
use crate::session::StreamSession;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Equalizer state as last left by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqSettings {
    pub gains: [f32; BAND_COUNT],
    pub enabled: bool,
    /// Built-in preset name, or "Custom"
    pub preset: Option<String>,
}

impl Default for EqSettings {
    fn default() -> Self {
        Self {
            gains: [0.0; BAND_COUNT],
            enabled: true,
            preset: Some("Flat".to_string()),
        }
    }
}

/// Root settings structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirwaveSettings {
    pub master_volume: f32,
    /// Stream element volume
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub eq: EqSettings,
    /// Station id restored on the next start
    #[serde(default)]
    pub last_station: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_volume() -> f32 {
    1.0
}

impl Default for AirwaveSettings {
    fn default() -> Self {
        Self {
            master_volume: 1.0,
            volume: default_volume(),
            muted: false,
            eq: EqSettings::default(),
            last_station: None,
            updated_at: None,
        }
    }
}

impl AirwaveSettings {
    /// Load settings from `path`, or return default if missing/corrupt
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::File::open(path) {
                Ok(file) => match serde_json::from_reader(file) {
                    Ok(settings) => {
                        info!("Settings loaded from {:?}", path);
                        return settings;
                    }
                    Err(e) => error!("Failed to parse settings file: {}", e),
                },
                Err(e) => error!("Failed to open settings file: {}", e),
            }
        }

        info!("Using default settings");
        Self::default()
    }

    pub fn save_to(&mut self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        self.updated_at = Some(Utc::now());
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;

        info!("Settings saved to {:?}", path);
        Ok(())
    }

    /// Get the platform-specific configuration file path
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "airwave", "airwave")
            .map(|proj| proj.config_dir().join("settings.json"))
    }

    /// Push the stored levels and equalizer into a running player
    pub fn apply(&self, graph: &AudioGraphManager, session: &StreamSession) {
        graph.set_master_volume(self.master_volume);
        session.set_volume(self.volume);
        session.set_muted(self.muted);
        self.apply_eq(graph.equalizer());
    }

    fn apply_eq(&self, equalizer: &EqualizerController) {
        let gains = self.eq.gains.map(|g| if g.is_finite() { g } else { 0.0 });
        if gains != self.eq.gains {
            warn!("Ignoring non-finite stored EQ gains");
        }
        equalizer.restore(gains, self.eq.enabled, self.eq.preset.as_deref());
    }

    /// Copy the player's current levels and equalizer into these settings
    pub fn capture(&mut self, graph: &AudioGraphManager, session: &StreamSession) {
        let snapshot = session.snapshot();
        let equalizer = graph.equalizer();
        self.master_volume = graph.master_volume();
        self.volume = snapshot.volume;
        self.muted = snapshot.muted;
        self.eq = EqSettings {
            gains: equalizer.gains(),
            enabled: equalizer.is_enabled(),
            preset: Some(equalizer.active_preset()),
        };
    }
}

//! Equalizer Controller
//!
//! Owns the authoritative equalizer settings on the control side and
//! forwards every change to the live render graph. Settings survive graph
//! re-creation: a new graph is seeded from [`EqualizerController::config`].

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use airwave_dsp::{
    clamp_gain, find_preset, BandType, DspError, EqConfig, BAND_COUNT, CUSTOM_PRESET, PRESETS,
};

use crate::message::GraphCommand;

/// One band, as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStatus {
    pub index: usize,
    pub frequency: f32,
    pub gain_db: f32,
    pub q: f32,
    pub band_type: String,
}

/// Equalizer snapshot for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualizerStatus {
    pub enabled: bool,
    pub preset: String,
    pub bands: Vec<BandStatus>,
    pub presets: Vec<String>,
}

struct EqState {
    config: EqConfig,
    active_preset: String,
    link: Option<Sender<GraphCommand>>,
}

impl EqState {
    fn send(&self, command: GraphCommand) {
        if let Some(link) = &self.link {
            debug!("Equalizer -> render: {:?}", command);
            // A dropped receiver means the graph is being torn down; the
            // next graph is seeded from `config`
            let _ = link.send(command);
        }
    }
}

pub struct EqualizerController {
    state: Mutex<EqState>,
}

impl Default for EqualizerController {
    fn default() -> Self {
        Self::new()
    }
}

impl EqualizerController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EqState {
                config: EqConfig::default(),
                active_preset: PRESETS[0].0.to_string(),
                link: None,
            }),
        }
    }

    /// Set one band's gain; returns the clamped value actually applied
    pub fn set_band_gain(&self, index: usize, gain_db: f32) -> Result<f32, DspError> {
        let mut state = self.state.lock();
        let applied = state.config.set_band_gain(index, gain_db)?;
        state.active_preset = CUSTOM_PRESET.to_string();
        state.send(GraphCommand::SetBandGain {
            band: index,
            gain_db: applied,
        });
        Ok(applied)
    }

    /// Apply a built-in preset; all five bands move in the same quantum
    pub fn apply_preset(&self, name: &str) -> Result<[f32; BAND_COUNT], DspError> {
        let (preset_name, gains) = find_preset(name)?;
        let mut state = self.state.lock();
        for (band, gain) in state.config.bands.iter_mut().zip(gains) {
            band.gain_db = clamp_gain(*gain);
        }
        state.active_preset = preset_name.to_string();
        state.send(GraphCommand::SetGains(*gains));
        info!("Equalizer preset: {}", preset_name);
        Ok(*gains)
    }

    /// Enable or bypass without rebuilding the chain; gains are kept
    pub fn toggle(&self, enabled: bool) {
        let mut state = self.state.lock();
        if state.config.enabled == enabled {
            return;
        }
        state.config.enabled = enabled;
        state.send(GraphCommand::SetEqEnabled(enabled));
        info!("Equalizer {}", if enabled { "enabled" } else { "bypassed" });
    }

    /// Restore persisted settings in one step
    pub fn restore(&self, gains: [f32; BAND_COUNT], enabled: bool, preset: Option<&str>) {
        let mut state = self.state.lock();
        for (band, gain) in state.config.bands.iter_mut().zip(gains) {
            band.gain_db = clamp_gain(gain);
        }
        state.config.enabled = enabled;
        state.active_preset = preset.unwrap_or(CUSTOM_PRESET).to_string();
        let gains = state.config.gains();
        state.send(GraphCommand::SetGains(gains));
        state.send(GraphCommand::SetEqEnabled(enabled));
    }

    pub fn gains(&self) -> [f32; BAND_COUNT] {
        self.state.lock().config.gains()
    }

    pub fn band_gain(&self, index: usize) -> Option<f32> {
        self.state.lock().config.bands.get(index).map(|b| b.gain_db)
    }

    pub fn active_preset(&self) -> String {
        self.state.lock().active_preset.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().config.enabled
    }

    /// Current configuration (used to seed a new render graph)
    pub fn config(&self) -> EqConfig {
        self.state.lock().config.clone()
    }

    pub fn bands(&self) -> Vec<BandStatus> {
        let state = self.state.lock();
        state
            .config
            .bands
            .iter()
            .enumerate()
            .map(|(index, band)| BandStatus {
                index,
                frequency: band.frequency,
                gain_db: band.gain_db,
                q: band.q,
                band_type: match band.band_type {
                    BandType::LowShelf => "lowshelf",
                    BandType::Peaking => "peaking",
                    BandType::HighShelf => "highshelf",
                }
                .to_string(),
            })
            .collect()
    }

    pub fn status(&self) -> EqualizerStatus {
        let bands = self.bands();
        let state = self.state.lock();
        EqualizerStatus {
            enabled: state.config.enabled,
            preset: state.active_preset.clone(),
            bands,
            presets: PRESETS.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }

    /// Route future changes to a freshly built render graph
    ///
    /// The graph was seeded from an earlier snapshot; resend the current
    /// settings so nothing changed in between is lost.
    pub(crate) fn attach(&self, link: Sender<GraphCommand>) {
        let mut state = self.state.lock();
        state.link = Some(link);
        let gains = state.config.gains();
        let enabled = state.config.enabled;
        state.send(GraphCommand::SetGains(gains));
        state.send(GraphCommand::SetEqEnabled(enabled));
    }

    pub(crate) fn detach(&self) {
        self.state.lock().link = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_gain_read_back_and_clamping() {
        let eq = EqualizerController::new();
        for gain in [-12.0, -6.5, 0.0, 3.25, 12.0] {
            assert_eq!(eq.set_band_gain(2, gain).unwrap(), gain);
            assert_eq!(eq.band_gain(2), Some(gain));
        }
        assert_eq!(eq.set_band_gain(0, 20.0).unwrap(), 12.0);
        assert_eq!(eq.set_band_gain(0, -40.0).unwrap(), -12.0);
        assert_eq!(eq.set_band_gain(5, 1.0), Err(DspError::InvalidBandIndex(5)));
    }

    #[test]
    fn test_manual_change_marks_custom() {
        let eq = EqualizerController::new();
        assert_eq!(eq.active_preset(), "Flat");
        eq.apply_preset("Bass Boost").unwrap();
        assert_eq!(eq.active_preset(), "Bass Boost");
        eq.set_band_gain(4, 1.0).unwrap();
        assert_eq!(eq.active_preset(), "Custom");
    }

    #[test]
    fn test_preset_sent_as_one_command() {
        let eq = EqualizerController::new();
        let (tx, rx) = unbounded();
        eq.attach(tx);
        assert_eq!(rx.try_iter().count(), 2);

        eq.apply_preset("treble boost").unwrap();
        let commands: Vec<_> = rx.try_iter().collect();
        assert_eq!(commands.len(), 1);
        assert!(matches!(
            commands[0],
            GraphCommand::SetGains([0.0, 0.0, 0.0, 4.0, 6.0])
        ));
        assert!(eq.apply_preset("Nope").is_err());
    }

    #[test]
    fn test_toggle_keeps_gains() {
        let eq = EqualizerController::new();
        eq.apply_preset("Loudness").unwrap();
        eq.toggle(false);
        assert!(!eq.is_enabled());
        assert_eq!(eq.gains(), [5.0, 2.0, -1.0, 2.0, 5.0]);
        eq.toggle(true);
        assert_eq!(eq.gains(), [5.0, 2.0, -1.0, 2.0, 5.0]);
    }

    #[test]
    fn test_detached_changes_are_kept() {
        let eq = EqualizerController::new();
        let (tx, rx) = unbounded();
        eq.attach(tx);
        eq.detach();
        rx.try_iter().for_each(drop);
        eq.set_band_gain(1, 3.0).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(eq.config().gains()[1], 3.0);
    }

    #[test]
    fn test_status_lists_bands() {
        let eq = EqualizerController::new();
        let status = eq.status();
        assert_eq!(status.bands.len(), 5);
        assert_eq!(status.bands[0].band_type, "lowshelf");
        assert_eq!(status.bands[4].frequency, 16000.0);
        assert_eq!(status.presets.len(), PRESETS.len());
    }
}

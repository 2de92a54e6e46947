//! Airwave DSP - Signal processing for the radio render graph
//!
//! This crate provides the processing blocks the render graph wires together:
//! - 5-band equalizer (low shelf, three peaking bands, high shelf) on BiQuad filters
//! - Ramped gain stages for click-free volume changes
//! - FFT analyser with Web Audio `AnalyserNode` semantics
//! - Streaming linear resampler from station rate to device rate
//!
//! # Architecture
//!
//! Everything on the render path follows a strict "no allocation in audio
//! callback" rule. Parameter changes arrive between buffers and are smoothed
//! inside the processors.

mod analyser;
mod eq;
mod error;
mod gain;
mod presets;
mod processor;
mod resample;

pub use analyser::{
    Analyser, AnalyserConfig, DEFAULT_FFT_SIZE, DEFAULT_MAX_DECIBELS, DEFAULT_MIN_DECIBELS,
    DEFAULT_SMOOTHING, MAX_FFT_SIZE, MIN_FFT_SIZE,
};
pub use eq::{
    clamp_gain, Band, BandType, EqConfig, Equalizer, BAND_COUNT, EQ_BANDS, MAX_GAIN_DB,
    MIN_GAIN_DB,
};
pub use error::DspError;
pub use gain::{GainStage, LinearRamp};
pub use presets::{find_preset, Preset, CUSTOM_PRESET, PRESETS};
pub use processor::{AudioProcessor, ProcessContext};
pub use resample::LinearResampler;

//! FFT Analyser
//!
//! A passive tap on the render graph exposing frequency and time-domain
//! snapshots for visualizers, with the Web Audio `AnalyserNode` semantics:
//! Blackman window, magnitude normalized by FFT size, exponential smoothing
//! across analysis frames, and byte output mapped linearly between the
//! configured decibel floor and ceiling.
//!
//! # Threading
//!
//! The render thread writes with [`Analyser::push_interleaved`], which only
//! ever `try_lock`s the sample ring; if a reader is mid-copy the block is
//! dropped from the visualization, never from the audio. Readers compute
//! the FFT on demand, so an analyser nobody reads costs one ring write.

use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::DspError;

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32768;
pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const DEFAULT_MIN_DECIBELS: f32 = -90.0;
pub const DEFAULT_MAX_DECIBELS: f32 = -10.0;

/// Analyser knobs exposed to visualizers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyserConfig {
    /// FFT window length (power of two, 32..=32768)
    pub fft_size: usize,
    /// Weight of the previous frame when smoothing (0.0 = none, 1.0 = frozen)
    pub smoothing_time_constant: f32,
    /// Level mapped to byte value 0
    pub min_decibels: f32,
    /// Level mapped to byte value 255
    pub max_decibels: f32,
    /// Multiplier applied to byte output before clamping
    pub sensitivity: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            smoothing_time_constant: DEFAULT_SMOOTHING,
            min_decibels: DEFAULT_MIN_DECIBELS,
            max_decibels: DEFAULT_MAX_DECIBELS,
            sensitivity: 1.0,
        }
    }
}

impl AnalyserConfig {
    pub fn validate(&self) -> Result<(), DspError> {
        if !self.fft_size.is_power_of_two()
            || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&self.fft_size)
        {
            return Err(DspError::InvalidFftSize(self.fft_size));
        }
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(DspError::InvalidSmoothing(self.smoothing_time_constant));
        }
        if self.min_decibels.is_nan()
            || self.max_decibels.is_nan()
            || self.min_decibels >= self.max_decibels
        {
            return Err(DspError::InvalidDecibelRange {
                min: self.min_decibels,
                max: self.max_decibels,
            });
        }
        Ok(())
    }
}

/// Blackman window coefficient (alpha = 0.16)
fn blackman(n: usize, size: usize) -> f32 {
    let x = 2.0 * std::f32::consts::PI * n as f32 / size as f32;
    0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
}

/// Most recent `fft_size` mono samples
struct SampleRing {
    samples: Vec<f32>,
    write_pos: usize,
    /// Total samples ever written; identifies the analysis frame
    written: u64,
}

struct AnalysisState {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    time_domain: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    /// Smoothed linear magnitudes, one per bin
    smoothed: Vec<f32>,
    /// Smoothed magnitudes converted to dB
    decibels: Vec<f32>,
    /// Ring position (`written`) the cached spectrum belongs to
    analysed_at: Option<u64>,
}

/// Spectrum/waveform tap
pub struct Analyser {
    config: AnalyserConfig,
    sample_rate: f32,
    ring: Mutex<SampleRing>,
    state: Mutex<AnalysisState>,
}

impl Analyser {
    pub fn new(sample_rate: f32, config: AnalyserConfig) -> Result<Self, DspError> {
        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        config.validate()?;

        let size = config.fft_size;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);

        Ok(Self {
            config,
            sample_rate,
            ring: Mutex::new(SampleRing {
                samples: vec![0.0; size],
                write_pos: 0,
                written: 0,
            }),
            state: Mutex::new(AnalysisState {
                fft,
                window: (0..size).map(|n| blackman(n, size)).collect(),
                time_domain: vec![0.0; size],
                buffer: vec![Complex::new(0.0, 0.0); size],
                smoothed: vec![0.0; size / 2],
                decibels: vec![f32::NEG_INFINITY; size / 2],
                analysed_at: None,
            }),
        })
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    /// Number of frequency bins (half the FFT size)
    pub fn frequency_bin_count(&self) -> usize {
        self.config.fft_size / 2
    }

    /// Center frequency of a bin in Hz
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate / self.config.fft_size as f32
    }

    /// Feed an interleaved stereo block (mixed down to mono)
    ///
    /// # Real-time Safety
    /// No allocations; never blocks (drops the block if a reader holds the ring).
    #[inline]
    pub fn push_interleaved(&self, buffer: &[f32]) {
        let Some(mut ring) = self.ring.try_lock() else {
            return;
        };
        let size = ring.samples.len();
        for frame in buffer.chunks_exact(2) {
            let pos = ring.write_pos;
            ring.samples[pos] = (frame[0] + frame[1]) * 0.5;
            ring.write_pos = (pos + 1) % size;
        }
        ring.written += (buffer.len() / 2) as u64;
    }

    /// Fill `out` with the smoothed spectrum in dB (extra slots untouched)
    pub fn get_float_frequency_data(&self, out: &mut [f32]) {
        let mut state = self.state.lock();
        self.analyse(&mut state);
        let n = out.len().min(state.decibels.len());
        out[..n].copy_from_slice(&state.decibels[..n]);
    }

    /// Fill `out` with the spectrum mapped onto 0..=255 between the dB floor and ceiling
    pub fn get_byte_frequency_data(&self, out: &mut [u8]) {
        let mut state = self.state.lock();
        self.analyse(&mut state);
        let n = out.len().min(state.decibels.len());
        for (slot, db) in out[..n].iter_mut().zip(&state.decibels[..n]) {
            *slot = self.db_to_byte(*db);
        }
    }

    /// Fill `out` with the most recent samples, oldest first
    pub fn get_float_time_domain_data(&self, out: &mut [f32]) {
        let ring = self.ring.lock();
        let size = ring.samples.len();
        let n = out.len().min(size);
        for (i, slot) in out[..n].iter_mut().enumerate() {
            *slot = ring.samples[(ring.write_pos + size - n + i) % size];
        }
    }

    /// Time-domain data as bytes (128 = silence)
    pub fn get_byte_time_domain_data(&self, out: &mut [u8]) {
        let ring = self.ring.lock();
        let size = ring.samples.len();
        let n = out.len().min(size);
        for (i, slot) in out[..n].iter_mut().enumerate() {
            let sample = ring.samples[(ring.write_pos + size - n + i) % size];
            *slot = (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8;
        }
    }

    /// Collapse the spectrum into `bands` logarithmically spaced values in 0.0..=1.0
    ///
    /// Convenience for bar-style visualizers that want fewer, perceptually
    /// spaced bins than the raw FFT provides.
    pub fn log_spectrum(&self, bands: usize) -> Vec<f32> {
        let mut state = self.state.lock();
        self.analyse(&mut state);

        let bins = state.decibels.len();
        let log_min = 1.0_f32.ln(); // Skip DC
        let log_max = (bins as f32).ln();
        let log_step = (log_max - log_min) / bands.max(1) as f32;
        let range = self.config.max_decibels - self.config.min_decibels;

        (0..bands)
            .map(|i| {
                let start = ((log_min + i as f32 * log_step).exp() as usize).clamp(1, bins - 1);
                let end = ((log_min + (i + 1) as f32 * log_step).exp() as usize).clamp(start + 1, bins);
                let peak = state.decibels[start..end]
                    .iter()
                    .copied()
                    .fold(f32::NEG_INFINITY, f32::max);
                let level = (peak - self.config.min_decibels) / range * self.config.sensitivity;
                if level.is_nan() {
                    0.0
                } else {
                    level.clamp(0.0, 1.0)
                }
            })
            .collect()
    }

    /// Clear samples and smoothing history
    pub fn reset(&self) {
        let mut ring = self.ring.lock();
        ring.samples.fill(0.0);
        ring.write_pos = 0;
        ring.written = 0;
        drop(ring);

        let mut state = self.state.lock();
        state.smoothed.fill(0.0);
        state.decibels.fill(f32::NEG_INFINITY);
        state.analysed_at = None;
    }

    fn db_to_byte(&self, db: f32) -> u8 {
        let range = self.config.max_decibels - self.config.min_decibels;
        let scaled = 255.0 / range * (db - self.config.min_decibels) * self.config.sensitivity;
        if scaled.is_nan() {
            0
        } else {
            scaled.clamp(0.0, 255.0) as u8
        }
    }

    /// Run one analysis frame unless the ring has not moved since the last one
    fn analyse(&self, state: &mut AnalysisState) {
        let written = {
            let ring = self.ring.lock();
            if state.analysed_at == Some(ring.written) {
                return;
            }
            let size = ring.samples.len();
            for i in 0..size {
                state.time_domain[i] = ring.samples[(ring.write_pos + i) % size];
            }
            ring.written
        };

        let AnalysisState {
            fft,
            window,
            time_domain,
            buffer,
            smoothed,
            decibels,
            analysed_at,
        } = state;

        for ((slot, sample), w) in buffer.iter_mut().zip(time_domain.iter()).zip(window.iter()) {
            *slot = Complex::new(sample * w, 0.0);
        }
        fft.process(buffer);

        let size = self.config.fft_size as f32;
        let tau = self.config.smoothing_time_constant;
        for ((bin, value), db) in buffer.iter().zip(smoothed.iter_mut()).zip(decibels.iter_mut()) {
            let magnitude = bin.norm() / size;
            *value = tau * *value + (1.0 - tau) * magnitude;
            *db = 20.0 * value.log10();
        }
        *analysed_at = Some(written);
    }
}

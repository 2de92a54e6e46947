//! 5-Band Equalizer
//!
//! Five RBJ-cookbook biquads in series per channel: a low shelf, three
//! peaking bands and a high shelf.
//!
//! Gain changes never jump: every band glides toward its target with a
//! first-order (exponential) approach, and the filter coefficients are
//! recomputed every [`COEFF_UPDATE_INTERVAL`] samples while a band is moving.
//! Bypass retargets every band to 0dB instead of removing filters, so an RBJ
//! shelf/peaking stage at 0dB is exactly unity and toggling stays click-free.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};

use crate::error::DspError;

/// Number of equalizer bands
pub const BAND_COUNT: usize = 5;

/// Fixed band center frequencies (Hz)
pub const EQ_BANDS: [f32; BAND_COUNT] = [
    60.0,    // Bass
    250.0,   // Low-mid
    1000.0,  // Mid
    4000.0,  // Presence
    16000.0, // Air
];

/// Lowest accepted band gain (dB)
pub const MIN_GAIN_DB: f32 = -12.0;

/// Highest accepted band gain (dB)
pub const MAX_GAIN_DB: f32 = 12.0;

/// Time constant of the gain glide, in seconds
pub const GAIN_TIME_CONSTANT_SECS: f32 = 0.1;

/// Samples between coefficient recalculations while a band is gliding
pub const COEFF_UPDATE_INTERVAL: usize = 32;

/// Q used for the peaking bands (one octave-ish bandwidth)
const PEAKING_Q: f32 = 1.0;

/// Residual distance (dB) below which a gliding band snaps to its target
const SETTLE_EPSILON_DB: f32 = 0.001;

/// Shelf or peak, fixed per band position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandType {
    LowShelf,
    Peaking,
    HighShelf,
}

/// One band's center/corner frequency, gain and Q
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub frequency: f32,
    pub gain_db: f32,
    pub q: f32,
    pub band_type: BandType,
}

impl Band {
    pub fn new(frequency: f32, band_type: BandType) -> Self {
        let q = match band_type {
            BandType::Peaking => PEAKING_Q,
            BandType::LowShelf | BandType::HighShelf => Q_BUTTERWORTH_F32,
        };
        Self {
            frequency,
            gain_db: 0.0,
            q,
            band_type,
        }
    }

    /// Generate BiQuad coefficients for this band at an explicit gain
    fn coefficients_at(self, gain_db: f32, sample_rate: f32) -> Result<Coefficients<f32>, DspError> {
        let filter = match self.band_type {
            BandType::LowShelf => Type::LowShelf(gain_db),
            BandType::Peaking => Type::PeakingEQ(gain_db),
            BandType::HighShelf => Type::HighShelf(gain_db),
        };

        Coefficients::<f32>::from_params(filter, sample_rate.hz(), self.frequency.hz(), self.q)
            .map_err(|_| DspError::InvalidCoefficients {
                frequency: self.frequency,
                sample_rate,
            })
    }
}

/// Complete EQ configuration for all 5 bands
#[derive(Debug, Clone, PartialEq)]
pub struct EqConfig {
    pub bands: [Band; BAND_COUNT],
    pub enabled: bool,
}

impl Default for EqConfig {
    fn default() -> Self {
        let bands = core::array::from_fn(|i| {
            let band_type = match i {
                0 => BandType::LowShelf,
                i if i == BAND_COUNT - 1 => BandType::HighShelf,
                _ => BandType::Peaking,
            };
            Band::new(EQ_BANDS[i], band_type)
        });

        Self {
            bands,
            enabled: true,
        }
    }
}

impl EqConfig {
    /// Set gain for a specific band (0-4), returning the clamped value
    pub fn set_band_gain(&mut self, band_index: usize, gain_db: f32) -> Result<f32, DspError> {
        let band = self
            .bands
            .get_mut(band_index)
            .ok_or(DspError::InvalidBandIndex(band_index))?;
        band.gain_db = clamp_gain(gain_db);
        Ok(band.gain_db)
    }

    /// Configured gains, regardless of bypass
    pub fn gains(&self) -> [f32; BAND_COUNT] {
        core::array::from_fn(|i| self.bands[i].gain_db)
    }

    /// Gains the filters should actually apply (all 0dB while bypassed)
    pub fn effective_gains(&self) -> [f32; BAND_COUNT] {
        if self.enabled {
            self.gains()
        } else {
            [0.0; BAND_COUNT]
        }
    }
}

/// Clamp a requested gain into the accepted range; NaN maps to 0dB
pub fn clamp_gain(gain_db: f32) -> f32 {
    if gain_db.is_nan() {
        0.0
    } else {
        gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    }
}

/// Stereo equalizer with gliding band gains
///
/// Gain changes glide toward their target instead of jumping, so slider
/// drags and preset switches do not click.
/// `process_*()` never allocates.
pub struct Equalizer {
    filters_left: [DirectForm2Transposed<f32>; BAND_COUNT],
    filters_right: [DirectForm2Transposed<f32>; BAND_COUNT],
    config: EqConfig,
    /// Gain each band is currently applying (gliding toward the effective target)
    current_db: [f32; BAND_COUNT],
    sample_rate: f32,
    /// Fraction of the remaining distance covered per coefficient update
    glide: f32,
    countdown: usize,
}

impl Equalizer {
    /// Create a new equalizer with a flat response
    pub fn new(sample_rate: f32) -> Result<Self, DspError> {
        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }

        let config = EqConfig::default();

        let mut left = Vec::with_capacity(BAND_COUNT);
        let mut right = Vec::with_capacity(BAND_COUNT);
        for band in &config.bands {
            let coeffs = band.coefficients_at(0.0, sample_rate)?;
            left.push(DirectForm2Transposed::<f32>::new(coeffs));
            right.push(DirectForm2Transposed::<f32>::new(coeffs));
        }

        let filters_left: [DirectForm2Transposed<f32>; BAND_COUNT] = left
            .try_into()
            .map_err(|_| DspError::InvalidSampleRate(sample_rate))?;
        let filters_right: [DirectForm2Transposed<f32>; BAND_COUNT] = right
            .try_into()
            .map_err(|_| DspError::InvalidSampleRate(sample_rate))?;

        let block_secs = COEFF_UPDATE_INTERVAL as f32 / sample_rate;
        let glide = 1.0 - (-block_secs / GAIN_TIME_CONSTANT_SECS).exp();

        Ok(Self {
            filters_left,
            filters_right,
            config,
            current_db: [0.0; BAND_COUNT],
            sample_rate,
            glide,
            countdown: 0,
        })
    }

    /// Retarget a single band; the change glides in during processing
    pub fn set_band_gain(&mut self, band_index: usize, gain_db: f32) -> Result<f32, DspError> {
        self.config.set_band_gain(band_index, gain_db)
    }

    /// Retarget all bands at once (same sample for every band)
    pub fn set_gains(&mut self, gains: [f32; BAND_COUNT]) {
        for (band, gain) in self.config.bands.iter_mut().zip(gains) {
            band.gain_db = clamp_gain(gain);
        }
    }

    /// Enable or bypass the equalizer without touching the configured gains
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Jump every band straight to its target (no glide)
    ///
    /// Only safe while no audio is flowing, e.g. when restoring settings
    /// before a stream starts.
    pub fn settle(&mut self) -> Result<(), DspError> {
        let targets = self.config.effective_gains();
        for (i, target) in targets.into_iter().enumerate() {
            self.current_db[i] = target;
            self.apply_band(i)?;
        }
        Ok(())
    }

    /// Gain the given band is applying right now
    pub fn current_gain_db(&self, band_index: usize) -> Option<f32> {
        self.current_db.get(band_index).copied()
    }

    /// Whether every band has reached its target
    pub fn is_settled(&self) -> bool {
        self.current_db
            .iter()
            .zip(self.config.effective_gains())
            .all(|(current, target)| (current - target).abs() <= SETTLE_EPSILON_DB)
    }

    /// Run one frame through all five bands
    ///
    /// # Real-time Safety
    /// Allocation-free; safe on the render thread.
    #[inline]
    pub fn process_sample(&mut self, left: f32, right: f32) -> (f32, f32) {
        if self.countdown == 0 {
            self.advance_glide();
            self.countdown = COEFF_UPDATE_INTERVAL;
        }
        self.countdown -= 1;

        let mut l = left;
        let mut r = right;
        for i in 0..BAND_COUNT {
            l = self.filters_left[i].run(l);
            r = self.filters_right[i].run(r);
        }
        (l, r)
    }

    /// Filter an interleaved stereo quantum in place
    ///
    /// A trailing odd sample is left untouched.
    #[inline]
    pub fn process_interleaved(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let (l, r) = self.process_sample(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }

    /// Target configuration (not the gliding gains)
    pub fn config(&self) -> &EqConfig {
        &self.config
    }

    /// Rate the coefficients were designed for
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Clear the filters' delay lines
    ///
    /// Gains and any glide in progress are left alone; use [`settle`](Self::settle)
    /// to jump them to their targets.
    pub fn reset(&mut self) {
        for i in 0..BAND_COUNT {
            self.filters_left[i].reset_state();
            self.filters_right[i].reset_state();
        }
    }

    fn advance_glide(&mut self) {
        let targets = self.config.effective_gains();
        for (i, target) in targets.into_iter().enumerate() {
            let current = self.current_db[i];
            let distance = target - current;
            if distance == 0.0 {
                continue;
            }
            self.current_db[i] = if distance.abs() <= SETTLE_EPSILON_DB {
                target
            } else {
                current + distance * self.glide
            };
            // Coefficients for a validated band at an in-range gain cannot fail;
            // keep the previous ones if they somehow do.
            let _ = self.apply_band(i);
        }
    }

    fn apply_band(&mut self, band_index: usize) -> Result<(), DspError> {
        let coeffs = self.config.bands[band_index]
            .coefficients_at(self.current_db[band_index], self.sample_rate)?;
        self.filters_left[band_index].update_coefficients(coeffs);
        self.filters_right[band_index].update_coefficients(coeffs);
        Ok(())
    }
}

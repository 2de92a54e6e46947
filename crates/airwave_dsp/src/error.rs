//! DSP Error Types

use thiserror::Error;

/// Rejected DSP parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Invalid band index: {0} (must be 0-4)")]
    InvalidBandIndex(usize),

    #[error("Invalid filter coefficients for frequency {frequency}Hz at sample rate {sample_rate}Hz")]
    InvalidCoefficients { frequency: f32, sample_rate: f32 },

    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("FFT size must be a power of two between 32 and 32768, got {0}")]
    InvalidFftSize(usize),

    #[error("Smoothing time constant must be within 0.0..=1.0, got {0}")]
    InvalidSmoothing(f32),

    #[error("Decibel range is empty: min {min}dB must be below max {max}dB")]
    InvalidDecibelRange { min: f32, max: f32 },

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::InvalidBandIndex(15);
        assert!(err.to_string().contains("15"));

        let err = DspError::InvalidCoefficients {
            frequency: 1000.0,
            sample_rate: 48000.0,
        };
        assert!(err.to_string().contains("1000"));

        let err = DspError::InvalidDecibelRange {
            min: -10.0,
            max: -90.0,
        };
        assert!(err.to_string().contains("-90"));
    }
}

//! Streaming linear resampler
//!
//! Converts decoded stereo frames from a station's native rate to the
//! output device rate. Linear interpolation is plenty for radio-grade
//! material and keeps the render path allocation-free.

use crate::error::DspError;

pub struct LinearResampler {
    /// Input frames advanced per output frame
    ratio: f64,
    /// Fractional read position between `prev` and `next`
    frac: f64,
    prev: [f32; 2],
    next: [f32; 2],
}

impl LinearResampler {
    pub fn new(input_rate: f32, output_rate: f32) -> Result<Self, DspError> {
        let mut resampler = Self {
            ratio: 1.0,
            frac: 1.0,
            prev: [0.0; 2],
            next: [0.0; 2],
        };
        resampler.set_rates(input_rate, output_rate)?;
        Ok(resampler)
    }

    /// Change conversion rates without discarding interpolation state
    pub fn set_rates(&mut self, input_rate: f32, output_rate: f32) -> Result<(), DspError> {
        for rate in [input_rate, output_rate] {
            if rate.is_nan() || rate <= 0.0 {
                return Err(DspError::InvalidSampleRate(rate));
            }
        }
        self.ratio = input_rate as f64 / output_rate as f64;
        Ok(())
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn is_passthrough(&self) -> bool {
        (self.ratio - 1.0).abs() < f64::EPSILON
    }

    /// Fill interleaved stereo `out`, pulling input frames on demand
    ///
    /// Returns the number of output frames written. Stops early when `pull`
    /// runs dry, leaving the remainder of `out` untouched.
    ///
    /// # Real-time Safety
    /// No allocations.
    pub fn process(&mut self, out: &mut [f32], mut pull: impl FnMut() -> Option<[f32; 2]>) -> usize {
        let mut written = 0;
        for frame in out.chunks_exact_mut(2) {
            while self.frac >= 1.0 {
                let Some(input) = pull() else {
                    return written;
                };
                self.prev = self.next;
                self.next = input;
                self.frac -= 1.0;
            }
            let t = self.frac as f32;
            frame[0] = self.prev[0] + (self.next[0] - self.prev[0]) * t;
            frame[1] = self.prev[1] + (self.next[1] - self.prev[1]) * t;
            self.frac += self.ratio;
            written += 1;
        }
        written
    }

    /// Forget buffered frames (used when a source restarts)
    pub fn reset(&mut self) {
        self.frac = 1.0;
        self.prev = [0.0; 2];
        self.next = [0.0; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_preserves_frames() {
        let mut resampler = LinearResampler::new(48000.0, 48000.0).unwrap();
        assert!(resampler.is_passthrough());

        let mut input = (1..=4).map(|i| [i as f32, -(i as f32)]);
        let mut out = vec![0.0; 8];
        let frames = resampler.process(&mut out, || input.next());

        assert_eq!(frames, 4);
        // One frame of latency from the interpolation window
        assert_eq!(out, vec![0.0, 0.0, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
    }

    #[test]
    fn test_upsampling_interpolates() {
        let mut resampler = LinearResampler::new(24000.0, 48000.0).unwrap();
        let mut input = [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]].into_iter();
        let mut out = vec![0.0; 8];
        let frames = resampler.process(&mut out, || input.next());

        assert_eq!(frames, 4);
        let left: Vec<f32> = out.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![0.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_downsampling_consumes_faster() {
        let mut resampler = LinearResampler::new(96000.0, 48000.0).unwrap();
        let mut pulled = 0;
        let mut out = vec![0.0; 20];
        resampler.process(&mut out, || {
            pulled += 1;
            Some([0.0, 0.0])
        });
        assert!(pulled >= 19, "pulled {pulled}");
    }

    #[test]
    fn test_stops_when_input_runs_dry() {
        let mut resampler = LinearResampler::new(44100.0, 48000.0).unwrap();
        let mut out = vec![7.0; 8];
        let frames = resampler.process(&mut out, || None);
        assert_eq!(frames, 0);
        assert_eq!(out, vec![7.0; 8]);
    }

    #[test]
    fn test_invalid_rates_rejected() {
        assert!(LinearResampler::new(0.0, 48000.0).is_err());
        assert!(LinearResampler::new(44100.0, f32::NAN).is_err());
    }
}

//! Gain Stages
//!
//! A gain node whose level never jumps: every change is spread over a short
//! linear ramp so volume moves do not click.

use crate::processor::{AudioProcessor, ProcessContext};

/// Linearly ramped scalar parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
}

impl LinearRamp {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    /// Ramp to `target` over `samples` samples (0 = jump)
    pub fn ramp_to(&mut self, target: f32, samples: u32) {
        self.target = target;
        if samples == 0 {
            self.current = target;
            self.remaining = 0;
            self.step = 0.0;
        } else {
            self.step = (target - self.current) / samples as f32;
            self.remaining = samples;
        }
    }

    /// Advance by one sample and return the new value
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}

/// Stereo gain stage (the Web Audio "GainNode" of the render graph)
pub struct GainStage {
    name: &'static str,
    gain: LinearRamp,
}

impl GainStage {
    pub fn new(name: &'static str, gain: f32) -> Self {
        Self {
            name,
            gain: LinearRamp::new(gain),
        }
    }

    /// Move to `gain` over `samples` samples
    pub fn set_gain(&mut self, gain: f32, samples: u32) {
        self.gain.ramp_to(gain, samples);
    }

    pub fn gain(&self) -> f32 {
        self.gain.value()
    }

    pub fn target(&self) -> f32 {
        self.gain.target()
    }

    /// Apply the gain to an interleaved stereo buffer
    #[inline]
    pub fn process_interleaved(&mut self, buffer: &mut [f32]) {
        if !self.gain.is_ramping() {
            let g = self.gain.value();
            if (g - 1.0).abs() > f32::EPSILON {
                buffer.iter_mut().for_each(|s| *s *= g);
            }
            return;
        }
        for frame in buffer.chunks_exact_mut(2) {
            let g = self.gain.next_value();
            frame[0] *= g;
            frame[1] *= g;
        }
    }
}

impl AudioProcessor for GainStage {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        self.process_interleaved(buffer);
    }

    fn reset(&mut self) {
        let target = self.gain.target();
        self.gain.ramp_to(target, 0);
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

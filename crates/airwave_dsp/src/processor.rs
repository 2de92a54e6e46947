//! Render-Quantum Processors
//!
//! Every stage the render graph runs per quantum (equalizer section,
//! gain stages) implements [`AudioProcessor`], so stages can be chained and
//! benchmarked in isolation.

/// Shape of the quantum being processed
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub sample_rate: f32,
    pub channels: usize,
    /// Frames per channel in this quantum
    pub frames: usize,
}

impl ProcessContext {
    pub fn new(sample_rate: f32, channels: usize, frames: usize) -> Self {
        Self {
            sample_rate,
            channels,
            frames,
        }
    }

    /// Interleaved sample count the buffer should hold
    pub fn samples(&self) -> usize {
        self.frames * self.channels
    }
}

/// A stage on the render path
///
/// `process()` runs on the audio thread: no allocation, no locks that can
/// block on the control plane, bounded work per sample.
pub trait AudioProcessor: Send {
    /// Process interleaved stereo `[L0, R0, L1, R1, ...]` in place
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext);

    /// Forget filter history and jump ramps to their targets
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

impl AudioProcessor for crate::Equalizer {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        self.process_interleaved(buffer);
    }

    fn reset(&mut self) {
        crate::Equalizer::reset(self);
    }

    fn name(&self) -> &'static str {
        "5-Band Equalizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Equalizer, GainStage};

    struct InvertProcessor;

    impl AudioProcessor for InvertProcessor {
        fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
            for sample in buffer.iter_mut() {
                *sample = -*sample;
            }
        }

        fn reset(&mut self) {}

        fn name(&self) -> &'static str {
            "Inverter"
        }
    }

    #[test]
    fn test_processors_compose() {
        let ctx = ProcessContext::new(48000.0, 2, 2);
        let mut stages: Vec<Box<dyn AudioProcessor>> = vec![
            Box::new(InvertProcessor),
            Box::new(GainStage::new("half", 0.5)),
        ];

        let mut buffer = vec![0.5, -0.5];
        for stage in stages.iter_mut() {
            stage.process(&mut buffer, &ctx);
        }

        assert_eq!(buffer, vec![-0.25, 0.25]);
        let names: Vec<_> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Inverter", "half"]);
    }

    #[test]
    fn test_equalizer_as_processor() {
        let ctx = ProcessContext::new(48000.0, 2, 2);
        let mut eq = Equalizer::new(48000.0).unwrap();
        let mut buffer = vec![0.5, -0.5, 0.3, -0.3];

        AudioProcessor::process(&mut eq, &mut buffer, &ctx);
        for sample in &buffer {
            assert!(sample.is_finite());
        }
        assert_eq!(AudioProcessor::name(&eq), "5-Band Equalizer");
        AudioProcessor::reset(&mut eq);
    }

    #[test]
    fn test_context_sample_count() {
        let ctx = ProcessContext::new(44100.0, 2, 128);
        assert_eq!(ctx.frames, 128);
        assert_eq!(ctx.samples(), 256);
    }
}

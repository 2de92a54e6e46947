//! Render Graph
//!
//! The render-thread half of the shared audio graph:
//!
//! ```text
//! sources ──mix──▶ eq input ─▶ 5-band EQ ─▶ eq output ─┬─▶ master gain ─▶ destination
//!                                                       └─▶ analyser taps
//! ```
//!
//! Owned by whichever thread drives the output (the cpal callback or the
//! offline renderer). The control plane talks to it only through the
//! [`GraphCommand`] queue, drained at the start of every quantum.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use airwave_dsp::{Analyser, AudioProcessor, EqConfig, Equalizer, GainStage, ProcessContext};

use crate::error::GraphError;
use crate::message::{AnalyserId, GraphCommand};

use super::source::SourceVoice;

/// Largest block processed in one pass; longer buffers are split
pub const MAX_QUANTUM_FRAMES: usize = 4096;

const MAX_VOICES: usize = 16;
const MAX_ANALYSERS: usize = 16;

/// Equalizer input gain -> filters -> output gain
pub struct EqualizerSection {
    input: GainStage,
    eq: Equalizer,
    output: GainStage,
}

impl EqualizerSection {
    pub fn new(sample_rate: f32, config: &EqConfig) -> Result<Self, GraphError> {
        let mut eq = Equalizer::new(sample_rate)?;
        eq.set_gains(config.gains());
        eq.set_enabled(config.enabled);
        // Start at the configured curve instead of gliding in from flat
        eq.settle()?;

        Ok(Self {
            input: GainStage::new("eq-input", 1.0),
            eq,
            output: GainStage::new("eq-output", 1.0),
        })
    }

    pub fn equalizer(&self) -> &Equalizer {
        &self.eq
    }

    pub fn equalizer_mut(&mut self) -> &mut Equalizer {
        &mut self.eq
    }
}

impl AudioProcessor for EqualizerSection {
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext) {
        self.input.process(buffer, context);
        self.eq.process(buffer, context);
        self.output.process(buffer, context);
    }

    fn reset(&mut self) {
        self.input.reset();
        AudioProcessor::reset(&mut self.eq);
        self.output.reset();
    }

    fn name(&self) -> &'static str {
        "Equalizer Section"
    }
}

pub struct RenderGraph {
    sample_rate: u32,
    commands: Receiver<GraphCommand>,
    voices: Vec<SourceVoice>,
    equalizer: EqualizerSection,
    analysers: Vec<(AnalyserId, Arc<Analyser>)>,
    master: GainStage,
    scratch: Vec<f32>,
    frames_rendered: u64,
}

impl RenderGraph {
    pub fn new(
        sample_rate: u32,
        eq: &EqConfig,
        master_gain: f32,
        commands: Receiver<GraphCommand>,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            sample_rate,
            commands,
            voices: Vec::with_capacity(MAX_VOICES),
            equalizer: EqualizerSection::new(sample_rate as f32, eq)?,
            analysers: Vec::with_capacity(MAX_ANALYSERS),
            master: GainStage::new("master", master_gain),
            scratch: vec![0.0; MAX_QUANTUM_FRAMES * 2],
            frames_rendered: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Re-rate a graph before it starts rendering (device refused the
    /// requested rate). Filters are redesigned for the new rate.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), GraphError> {
        let config = self.equalizer.equalizer().config().clone();
        self.equalizer = EqualizerSection::new(sample_rate as f32, &config)?;
        self.sample_rate = sample_rate;
        Ok(())
    }

    /// Sources currently wired (including ones awaiting removal)
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn analyser_count(&self) -> usize {
        self.analysers.len()
    }

    pub fn master_gain(&self) -> f32 {
        self.master.gain()
    }

    pub fn equalizer(&self) -> &Equalizer {
        self.equalizer.equalizer()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Apply every queued command, in order
    pub fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: GraphCommand) {
        match command {
            GraphCommand::AddSource(voice) => self.voices.push(voice),
            GraphCommand::RemoveSource(id) => self.voices.retain(|v| v.id() != id),
            GraphCommand::SetMasterGain { gain, ramp_samples } => {
                self.master.set_gain(gain, ramp_samples)
            }
            GraphCommand::SetBandGain { band, gain_db } => {
                // Index validated on the control side
                let _ = self.equalizer.equalizer_mut().set_band_gain(band, gain_db);
            }
            GraphCommand::SetGains(gains) => self.equalizer.equalizer_mut().set_gains(gains),
            GraphCommand::SetEqEnabled(enabled) => {
                self.equalizer.equalizer_mut().set_enabled(enabled)
            }
            GraphCommand::AddAnalyser(id, analyser) => self.analysers.push((id, analyser)),
            GraphCommand::RemoveAnalyser(id) => self.analysers.retain(|(a, _)| *a != id),
        }
    }

    /// Render one quantum of interleaved stereo into `out`
    ///
    /// # Real-time Safety
    /// No allocations apart from command payloads; never blocks.
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();

        // Sources whose handle was disconnected go away without waiting for
        // their RemoveSource command
        self.voices.retain(|v| v.is_connected());

        for block in out.chunks_mut(MAX_QUANTUM_FRAMES * 2) {
            self.render_block(block);
        }
    }

    fn render_block(&mut self, block: &mut [f32]) {
        block.fill(0.0);
        let scratch = &mut self.scratch[..block.len()];
        for voice in self.voices.iter_mut() {
            voice.mix_into(block, scratch);
        }

        let context = ProcessContext::new(self.sample_rate as f32, 2, block.len() / 2);
        self.equalizer.process(block, &context);

        for (_, analyser) in &self.analysers {
            analyser.push_interleaved(block);
        }

        self.master.process(block, &context);
        self.frames_rendered += (block.len() / 2) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::source::SourceNode;
    use crate::message::SourceId;
    use airwave_dsp::AnalyserConfig;
    use crossbeam_channel::unbounded;

    fn graph() -> (RenderGraph, crossbeam_channel::Sender<GraphCommand>) {
        let (tx, rx) = unbounded();
        let graph = RenderGraph::new(48000, &EqConfig::default(), 1.0, rx).unwrap();
        (graph, tx)
    }

    fn playing_source(id: u64, value: f32, frames: usize) -> (SourceVoice, crate::graph::SourceHandle) {
        let (mut node, voice) = SourceNode::new(SourceId(id), 48000, frames, 0).unwrap();
        node.writer.write(&vec![value; frames * 2]);
        node.handle.set_playing(true);
        (voice, node.handle)
    }

    #[test]
    fn test_silent_without_sources() {
        let (mut graph, _tx) = graph();
        let mut out = vec![1.0; 256];
        graph.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(graph.frames_rendered(), 128);
    }

    #[test]
    fn test_sources_are_mixed() {
        let (mut graph, tx) = graph();
        let (a, _ha) = playing_source(1, 0.25, 64);
        let (b, _hb) = playing_source(2, 0.5, 64);
        tx.send(GraphCommand::AddSource(a)).unwrap();
        tx.send(GraphCommand::AddSource(b)).unwrap();

        let mut out = vec![0.0; 32];
        graph.render(&mut out);
        assert_eq!(graph.voice_count(), 2);
        // Flat EQ is transparent; skip the resampler's first zero frame
        assert!(out[2..].iter().all(|&s| (s - 0.75).abs() < 1e-4));
    }

    #[test]
    fn test_remove_before_add_in_same_quantum() {
        let (mut graph, tx) = graph();
        let (a, _ha) = playing_source(1, 1.0, 64);
        tx.send(GraphCommand::AddSource(a)).unwrap();
        let mut out = vec![0.0; 32];
        graph.render(&mut out);

        let (b, _hb) = playing_source(2, 0.5, 64);
        tx.send(GraphCommand::RemoveSource(SourceId(1))).unwrap();
        tx.send(GraphCommand::AddSource(b)).unwrap();
        graph.render(&mut out);

        assert_eq!(graph.voice_count(), 1);
        assert!(out[2..].iter().all(|&s| (s - 0.5).abs() < 1e-4));
    }

    #[test]
    fn test_disconnected_voice_dropped_without_command() {
        let (mut graph, tx) = graph();
        let (a, handle) = playing_source(1, 1.0, 64);
        tx.send(GraphCommand::AddSource(a)).unwrap();
        handle.mark_disconnected();

        let mut out = vec![0.0; 32];
        graph.render(&mut out);
        assert_eq!(graph.voice_count(), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_master_gain_ramps() {
        let (mut graph, tx) = graph();
        tx.send(GraphCommand::SetMasterGain {
            gain: 0.0,
            ramp_samples: 16,
        })
        .unwrap();
        let mut out = vec![0.0; 64];
        graph.render(&mut out);
        assert_eq!(graph.master_gain(), 0.0);
    }

    #[test]
    fn test_analyser_taps_pre_master() {
        let (mut graph, tx) = graph();
        let analyser = Arc::new(Analyser::new(48000.0, AnalyserConfig::default()).unwrap());
        let (a, _ha) = playing_source(1, 0.5, 512);
        tx.send(GraphCommand::AddSource(a)).unwrap();
        tx.send(GraphCommand::AddAnalyser(AnalyserId(1), Arc::clone(&analyser)))
            .unwrap();
        tx.send(GraphCommand::SetMasterGain {
            gain: 0.0,
            ramp_samples: 0,
        })
        .unwrap();

        let mut out = vec![0.0; 512];
        graph.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        let mut waveform = vec![0.0; 4];
        analyser.get_float_time_domain_data(&mut waveform);
        assert!(waveform.iter().all(|&s| (s - 0.5).abs() < 1e-4));
    }

    #[test]
    fn test_eq_commands_reach_equalizer() {
        let (mut graph, tx) = graph();
        tx.send(GraphCommand::SetGains([6.0, 4.0, 0.0, 0.0, 0.0])).unwrap();
        tx.send(GraphCommand::SetEqEnabled(false)).unwrap();
        graph.drain_commands();
        assert_eq!(graph.equalizer().config().gains(), [6.0, 4.0, 0.0, 0.0, 0.0]);
        assert!(!graph.equalizer().config().enabled);
    }

    #[test]
    fn test_long_buffers_are_split() {
        let (mut graph, _tx) = graph();
        let mut out = vec![0.0; MAX_QUANTUM_FRAMES * 2 * 2 + 10];
        graph.render(&mut out);
        assert_eq!(graph.frames_rendered(), (MAX_QUANTUM_FRAMES * 2 + 5) as u64);
    }

    #[test]
    fn test_rerate_keeps_equalizer_curve() {
        let (tx, rx) = unbounded();
        let mut config = EqConfig::default();
        for (i, gain) in [4.0, 0.0, -3.0, 0.0, 2.0].into_iter().enumerate() {
            config.set_band_gain(i, gain).unwrap();
        }
        let mut graph = RenderGraph::new(48000, &config, 1.0, rx).unwrap();
        drop(tx);

        graph.set_sample_rate(44100).unwrap();
        assert_eq!(graph.sample_rate(), 44100);
        assert_eq!(graph.equalizer().sample_rate(), 44100.0);
        assert_eq!(graph.equalizer().config().gains(), [4.0, 0.0, -3.0, 0.0, 2.0]);
        assert!(graph.set_sample_rate(0).is_err());
    }
}

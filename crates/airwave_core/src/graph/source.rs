//! Source Nodes
//!
//! A source is one media element's entry point into the render graph. It is
//! split three ways:
//!
//! ```text
//!   SourceWriter ──rtrb──▶ SourceVoice (render thread)
//!        │                      │
//!        └──── SourceShared ────┘ ◀── SourceHandle (control plane)
//! ```
//!
//! The writer is owned by the decoder, the voice by the render graph, and the
//! handle by whoever needs to mute, pause or disconnect the source.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use airwave_dsp::{GainStage, LinearResampler};

use crate::message::SourceId;

/// State shared between a source's writer, voice and handle
pub struct SourceShared {
    /// Cleared synchronously on disconnect; the voice goes silent immediately
    connected: AtomicBool,

    /// Whether the voice pulls from its ring buffer
    playing: AtomicBool,

    /// Element volume (stored as u32, interpreted as f32 bits)
    volume_bits: AtomicU32,

    /// Native rate of the decoded samples
    input_rate: AtomicU32,

    /// Frames mixed into the graph so far
    frames_played: AtomicU64,

    /// Quanta where a playing source had nothing buffered
    underruns: AtomicU64,
}

impl SourceShared {
    fn new(input_rate: u32) -> Self {
        Self {
            connected: AtomicBool::new(true),
            playing: AtomicBool::new(false),
            volume_bits: AtomicU32::new(1.0_f32.to_bits()),
            input_rate: AtomicU32::new(input_rate),
            frames_played: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }
}

/// Control-plane handle on a source
#[derive(Clone)]
pub struct SourceHandle {
    id: SourceId,
    shared: Arc<SourceShared>,
}

impl SourceHandle {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.shared.connected.store(false, Ordering::Release);
        self.shared.playing.store(false, Ordering::Release);
    }

    pub fn set_playing(&self, playing: bool) {
        self.shared.playing.store(playing, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Element volume, clamped to 0.0..=1.0
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.shared.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }

    pub fn frames_played(&self) -> u64 {
        self.shared.frames_played.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }
}

/// Decoder-side writer of interleaved stereo samples
pub struct SourceWriter {
    shared: Arc<SourceShared>,
    producer: Producer<f32>,
}

impl SourceWriter {
    /// Report the native rate of the samples that follow
    pub fn set_input_rate(&self, rate: u32) {
        if rate > 0 {
            self.shared.input_rate.store(rate, Ordering::Relaxed);
        }
    }

    pub fn input_rate(&self) -> u32 {
        self.shared.input_rate.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Push as many whole frames as fit; returns samples written
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let n = self.producer.slots().min(samples.len()) & !1;
        if n == 0 {
            return 0;
        }
        match self.producer.write_chunk_uninit(n) {
            Ok(chunk) => chunk.fill_from_iter(samples[..n].iter().copied()),
            Err(_) => 0,
        }
    }

    /// Frames waiting to be rendered
    pub fn buffered_frames(&self) -> usize {
        (self.producer.buffer().capacity() - self.producer.slots()) / 2
    }

    pub fn capacity_frames(&self) -> usize {
        self.producer.buffer().capacity() / 2
    }
}

/// Render-side voice: ring consumer, resampler and element gain
pub struct SourceVoice {
    id: SourceId,
    shared: Arc<SourceShared>,
    consumer: Consumer<f32>,
    resampler: LinearResampler,
    gain: GainStage,
    input_rate: u32,
    output_rate: u32,
    volume_ramp: u32,
}

impl SourceVoice {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Add up to `out.len() / 2` frames of this source into `out`
    ///
    /// `scratch` must be at least as long as `out`.
    ///
    /// # Real-time Safety
    /// No allocations; never blocks.
    pub(crate) fn mix_into(&mut self, out: &mut [f32], scratch: &mut [f32]) {
        if !self.shared.playing.load(Ordering::Acquire) || !self.is_connected() {
            return;
        }

        let rate = self.shared.input_rate.load(Ordering::Relaxed);
        if rate != self.input_rate
            && self
                .resampler
                .set_rates(rate as f32, self.output_rate as f32)
                .is_ok()
        {
            self.input_rate = rate;
        }

        let volume = f32::from_bits(self.shared.volume_bits.load(Ordering::Relaxed));
        if (volume - self.gain.target()).abs() > f32::EPSILON {
            self.gain.set_gain(volume, self.volume_ramp);
        }

        let scratch = &mut scratch[..out.len()];
        let consumer = &mut self.consumer;
        let frames = self.resampler.process(scratch, || {
            if consumer.slots() < 2 {
                return None;
            }
            let left = consumer.pop().ok()?;
            let right = consumer.pop().ok()?;
            Some([left, right])
        });

        if frames * 2 < out.len() {
            self.shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
        if frames == 0 {
            return;
        }

        let produced = &mut scratch[..frames * 2];
        self.gain.process_interleaved(produced);
        for (dst, src) in out.iter_mut().zip(produced.iter()) {
            *dst += *src;
        }
        self.shared
            .frames_played
            .fetch_add(frames as u64, Ordering::Relaxed);
    }
}

/// The control-side views of a freshly created source
pub struct SourceNode {
    pub handle: SourceHandle,
    pub writer: SourceWriter,
}

impl SourceNode {
    /// Allocate a source with `capacity_frames` of ring buffer, plus the
    /// render-side voice that reads it
    pub(crate) fn new(
        id: SourceId,
        output_rate: u32,
        capacity_frames: usize,
        volume_ramp: u32,
    ) -> Result<(Self, SourceVoice), airwave_dsp::DspError> {
        let shared = Arc::new(SourceShared::new(output_rate));
        let (producer, consumer) = RingBuffer::<f32>::new(capacity_frames.max(1) * 2);
        let resampler = LinearResampler::new(output_rate as f32, output_rate as f32)?;

        let node = Self {
            handle: SourceHandle {
                id,
                shared: Arc::clone(&shared),
            },
            writer: SourceWriter {
                shared: Arc::clone(&shared),
                producer,
            },
        };
        let voice = SourceVoice {
            id,
            shared,
            consumer,
            resampler,
            gain: GainStage::new("element", 1.0),
            input_rate: output_rate,
            output_rate,
            volume_ramp,
        };
        Ok((node, voice))
    }

    pub fn id(&self) -> SourceId {
        self.handle.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> (SourceHandle, SourceWriter, SourceVoice) {
        let (node, voice) = SourceNode::new(SourceId(1), 48000, 64, 0).unwrap();
        (node.handle, node.writer, voice)
    }

    #[test]
    fn test_writer_keeps_frames_whole() {
        let (_handle, mut writer, _voice) = node();
        let samples = vec![0.5; 301];
        let written = writer.write(&samples);
        assert_eq!(written, 128);
        assert_eq!(writer.buffered_frames(), 64);
        assert_eq!(writer.write(&samples), 0);
    }

    #[test]
    fn test_paused_voice_is_silent() {
        let (handle, mut writer, mut voice) = node();
        writer.write(&[1.0; 16]);

        let mut out = vec![0.0; 8];
        let mut scratch = vec![0.0; 8];
        voice.mix_into(&mut out, &mut scratch);
        assert_eq!(out, vec![0.0; 8]);

        handle.set_playing(true);
        voice.mix_into(&mut out, &mut scratch);
        // First frame is the resampler's zero history
        assert_eq!(&out[2..], &[1.0; 6]);
        assert_eq!(handle.frames_played(), 4);
    }

    #[test]
    fn test_disconnect_silences_immediately() {
        let (handle, mut writer, mut voice) = node();
        handle.set_playing(true);
        writer.write(&[1.0; 16]);
        handle.mark_disconnected();

        let mut out = vec![0.0; 8];
        let mut scratch = vec![0.0; 8];
        voice.mix_into(&mut out, &mut scratch);
        assert_eq!(out, vec![0.0; 8]);
        assert!(!writer.is_connected());
    }

    #[test]
    fn test_volume_is_clamped() {
        let (handle, _writer, _voice) = node();
        handle.set_volume(1.7);
        assert_eq!(handle.volume(), 1.0);
        handle.set_volume(-1.0);
        assert_eq!(handle.volume(), 0.0);
        handle.set_volume(f32::NAN);
        assert_eq!(handle.volume(), 0.0);
    }

    #[test]
    fn test_underrun_counted() {
        let (handle, _writer, mut voice) = node();
        handle.set_playing(true);
        let mut out = vec![0.0; 8];
        let mut scratch = vec![0.0; 8];
        voice.mix_into(&mut out, &mut scratch);
        assert_eq!(handle.underruns(), 1);
    }
}

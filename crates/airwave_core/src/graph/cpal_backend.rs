//! CPAL Output Backend
//!
//! Plays the render graph on the default output device. The cpal `Stream`
//! is not `Send` on every platform, so each context gets a dedicated
//! `airwave-audio` thread that builds the stream, owns it, and services
//! play/pause/close requests over a channel until it is closed. Replies come
//! back on tokio oneshots, so no runtime worker waits on the device.
//!
//! The graph's standard rate is asked for first; a device that cannot run it
//! (or has no f32 output) is opened at its own default rate and sample format,
//! and the render graph is re-rated to match before the first callback.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig as CpalStreamConfig, SupportedStreamConfig,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::GraphError;

use super::backend::{
    Activation, AudioBackend, AudioContextDriver, AutoplayPolicy, ContextOptions, ContextState,
    Lifecycle,
};
use super::render::{RenderGraph, MAX_QUANTUM_FRAMES};

/// How long to wait for the audio thread to open the device
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the audio thread to acknowledge a request
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

type Reply = oneshot::Sender<Result<(), String>>;

enum DeviceRequest {
    Play(Reply),
    Pause(Reply),
    Close,
}

/// Backend for the system's default output device
pub struct CpalBackend {
    policy: AutoplayPolicy,
}

impl CpalBackend {
    pub fn new(policy: AutoplayPolicy) -> Self {
        Self { policy }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new(AutoplayPolicy::Allowed)
    }
}

#[async_trait]
impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    async fn create_context(
        &self,
        options: ContextOptions,
        graph: RenderGraph,
    ) -> Result<Box<dyn AudioContextDriver>, GraphError> {
        let (request_tx, request_rx) = bounded::<DeviceRequest>(8);
        let (ready_tx, ready_rx) = bounded::<Result<u32, String>>(1);
        let start_running = self.policy.initial_state() == ContextState::Running;

        let thread = thread::Builder::new()
            .name("airwave-audio".into())
            .spawn(move || audio_thread_main(options, graph, start_running, request_rx, ready_tx))
            .map_err(|e| GraphError::Init(e.to_string()))?;

        // The device may take a while to open; don't stall the runtime
        let opened = tokio::task::spawn_blocking(move || ready_rx.recv_timeout(OPEN_TIMEOUT))
            .await
            .map_err(|e| GraphError::Init(e.to_string()))?;

        let sample_rate = match opened {
            Ok(Ok(rate)) => rate,
            Ok(Err(message)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                return Err(GraphError::Init(message));
            }
            Err(_) => {
                let _ = request_tx.try_send(DeviceRequest::Close);
                return Err(GraphError::Init("Timed out opening output device".to_string()));
            }
        };

        Ok(Box::new(CpalContext {
            requests: request_tx,
            lifecycle: Mutex::new(Lifecycle::new(self.policy)),
            thread: Mutex::new(Some(thread)),
            sample_rate,
        }))
    }
}

struct CpalContext {
    requests: Sender<DeviceRequest>,
    lifecycle: Mutex<Lifecycle>,
    thread: Mutex<Option<JoinHandle<()>>>,
    sample_rate: u32,
}

impl CpalContext {
    async fn request(&self, make: impl FnOnce(Reply) -> DeviceRequest) -> Result<(), String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .try_send(make(reply_tx))
            .map_err(|_| "audio thread is not accepting requests".to_string())?;
        match timeout(REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("audio thread has exited".to_string()),
            Err(_) => Err("audio thread did not respond".to_string()),
        }
    }
}

#[async_trait]
impl AudioContextDriver for CpalContext {
    fn state(&self) -> ContextState {
        self.lifecycle.lock().state()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn resume(&self, activation: Activation) -> Result<ContextState, GraphError> {
        let start = self.lifecycle.lock().begin_resume(activation)?;
        if start {
            self.request(DeviceRequest::Play)
                .await
                .map_err(GraphError::Resume)?;
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state() == ContextState::Closed {
                return Err(GraphError::Closed);
            }
            lifecycle.set_state(ContextState::Running);
        }
        Ok(self.lifecycle.lock().state())
    }

    async fn suspend(&self) -> Result<ContextState, GraphError> {
        match self.lifecycle.lock().state() {
            ContextState::Closed => return Err(GraphError::Closed),
            ContextState::Suspended => return Ok(ContextState::Suspended),
            ContextState::Running => {}
        }
        if let Err(e) = self.request(DeviceRequest::Pause).await {
            warn!("Failed to pause output stream: {}", e);
        }
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state() == ContextState::Closed {
            return Err(GraphError::Closed);
        }
        lifecycle.set_state(ContextState::Suspended);
        Ok(ContextState::Suspended)
    }

    async fn close(&self) -> Result<(), GraphError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state() == ContextState::Closed {
                return Ok(());
            }
            lifecycle.set_state(ContextState::Closed);
        }

        let requests = self.requests.clone();
        let thread = self.thread.lock().take();
        let joined = tokio::task::spawn_blocking(move || {
            let _ = requests.send(DeviceRequest::Close);
            if let Some(handle) = thread {
                let _ = handle.join();
            }
        })
        .await;
        if let Err(e) = joined {
            warn!("Audio thread shutdown failed: {}", e);
        }
        info!("Output context closed");
        Ok(())
    }
}

impl Drop for CpalContext {
    fn drop(&mut self) {
        // The thread exits on its own once it sees Close; not joined here
        let _ = self.requests.try_send(DeviceRequest::Close);
    }
}

/// Audio thread main loop: open the device, then serve requests until closed
fn audio_thread_main(
    options: ContextOptions,
    graph: RenderGraph,
    start_running: bool,
    requests: Receiver<DeviceRequest>,
    ready: Sender<Result<u32, String>>,
) {
    info!("Audio thread started");

    let stream = match open_output(options, graph) {
        Ok((stream, rate)) => {
            let started = if start_running {
                stream.play().map_err(|e| e.to_string())
            } else {
                stream.pause().map_err(|e| e.to_string())
            };
            if let Err(e) = started {
                let _ = ready.send(Err(format!("Failed to start output stream: {e}")));
                return;
            }
            let _ = ready.send(Ok(rate));
            stream
        }
        Err(message) => {
            error!("{}", message);
            let _ = ready.send(Err(message));
            return;
        }
    };

    while let Ok(request) = requests.recv() {
        match request {
            DeviceRequest::Play(reply) => {
                let _ = reply.send(stream.play().map_err(|e| e.to_string()));
            }
            DeviceRequest::Pause(reply) => {
                let _ = reply.send(stream.pause().map_err(|e| e.to_string()));
            }
            DeviceRequest::Close => break,
        }
    }

    drop(stream);
    info!("Audio thread stopped");
}

fn open_output(options: ContextOptions, mut graph: RenderGraph) -> Result<(Stream, u32), String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "No output device available".to_string())?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = choose_config(&device, options.sample_rate)?;
    let rate = supported.sample_rate().0;
    let format = supported.sample_format();
    let channels = supported.channels().max(1);

    if rate != graph.sample_rate() {
        info!(
            "{} cannot run at {}Hz, using its default {}Hz",
            device_name, options.sample_rate, rate
        );
        graph.set_sample_rate(rate).map_err(|e| e.to_string())?;
    }

    let fixed = CpalStreamConfig {
        channels,
        sample_rate: SampleRate(rate),
        buffer_size: BufferSize::Fixed(options.latency_hint.buffer_frames()),
    };

    // The graph moves into whichever callback is built; keep it shareable
    // until then so a failed first attempt doesn't lose it.
    let graph = Arc::new(Mutex::new(Some(graph)));

    let stream = match build_stream(&device, format, &fixed, Arc::clone(&graph)) {
        Ok(stream) => stream,
        Err(e) => {
            debug!("Fixed buffer size rejected ({}), using device default", e);
            let fallback = CpalStreamConfig {
                buffer_size: BufferSize::Default,
                ..fixed
            };
            build_stream(&device, format, &fallback, graph)
                .map_err(|e| format!("Failed to build output stream on {device_name}: {e}"))?
        }
    };

    info!(
        "Output stream open on {} ({} channels @ {}Hz, {})",
        device_name, channels, rate, format
    );
    Ok((stream, rate))
}

/// `rate` in f32 when the device offers it, else the device's own default
fn choose_config(device: &cpal::Device, rate: u32) -> Result<SupportedStreamConfig, String> {
    let default = device
        .default_output_config()
        .map_err(|e| format!("No usable output configuration: {e}"))?;
    let channels = default.channels();

    let preferred = device.supported_output_configs().ok().and_then(|mut ranges| {
        ranges.find(|range| {
            range.channels() == channels
                && range.sample_format() == SampleFormat::F32
                && range.min_sample_rate().0 <= rate
                && rate <= range.max_sample_rate().0
        })
    });
    Ok(match preferred {
        Some(range) => range.with_sample_rate(SampleRate(rate)),
        None => default,
    })
}

fn build_stream(
    device: &cpal::Device,
    format: SampleFormat,
    config: &CpalStreamConfig,
    graph: Arc<Mutex<Option<RenderGraph>>>,
) -> Result<Stream, String> {
    let built = match format {
        SampleFormat::F32 => build_typed::<f32>(device, config, graph),
        SampleFormat::I16 => build_typed::<i16>(device, config, graph),
        SampleFormat::U16 => build_typed::<u16>(device, config, graph),
        SampleFormat::I32 => build_typed::<i32>(device, config, graph),
        other => return Err(format!("Unsupported sample format {other}")),
    };
    built.map_err(|e| e.to_string())
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    graph: Arc<Mutex<Option<RenderGraph>>>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut stereo = vec![0.0_f32; MAX_QUANTUM_FRAMES * 2];

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            // Real-time audio callback - NO allocations allowed here
            let Some(mut guard) = graph.try_lock() else {
                data.fill(T::EQUILIBRIUM);
                return;
            };
            let Some(graph) = guard.as_mut() else {
                data.fill(T::EQUILIBRIUM);
                return;
            };

            for block in data.chunks_mut(MAX_QUANTUM_FRAMES * channels) {
                let frames = block.len() / channels;
                let stereo = &mut stereo[..frames * 2];
                graph.render(stereo);
                for (frame, lr) in block.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                    if channels == 1 {
                        frame[0] = T::from_sample((lr[0] + lr[1]) * 0.5);
                    } else {
                        frame[0] = T::from_sample(lr[0]);
                        frame[1] = T::from_sample(lr[1]);
                        frame[2..].fill(T::EQUILIBRIUM);
                    }
                }
            }
        },
        move |err| {
            warn!("Output stream error: {}", err);
        },
        None,
    )
}

//! Shared fixtures for unit tests: canned HTTP streams, a scripted resolver
//! and scripted media elements.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::error::StreamError;
use crate::graph::{GraphState, SourceHandle, SourceWriter};
use crate::media::{
    MediaElement, MediaElementFactory, MediaError, MediaErrorKind, MediaEvent, MediaRequest,
    PlayError,
};
use crate::resolver::{Resolution, StreamResolver};

/// Serve `body` at `route` for both HEAD and GET
pub(crate) async fn mount_stream(server: &MockServer, route: &str, content_type: &str, body: Vec<u8>) {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", content_type))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
        .mount(server)
        .await;
}

/// 16-bit PCM WAV holding a 440 Hz sine
pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, frames: usize, amplitude: f32) -> Vec<u8> {
    let data_len = (frames * channels as usize * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for n in 0..frames {
        let value = amplitude * (TAU * 440.0 * n as f32 / sample_rate as f32).sin();
        let sample = (value * i16::MAX as f32) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

/// Resolver that echoes its input and records every call
#[derive(Default)]
pub(crate) struct MockResolver {
    calls: Mutex<Vec<String>>,
    fallback: bool,
}

impl MockResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every lookup fails and falls back to the raw URL
    pub(crate) fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fallback: true,
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StreamResolver for MockResolver {
    async fn resolve(&self, url: &str) -> Resolution {
        self.calls.lock().push(url.to_string());
        if self.fallback {
            Resolution::Fallback {
                url: url.to_string(),
                reason: StreamError::Resolution("no route to host".to_string()),
            }
        } else {
            Resolution::Resolved {
                url: url.to_string(),
                format: None,
            }
        }
    }
}

/// How a scripted element behaves after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    /// `Waiting` then `CanPlay` straight away
    Ready,
    /// `Waiting`, then `CanPlay` after the delay
    ReadyAfter(Duration),
    /// Fails with a network error
    Unreachable,
    /// Never produces an event
    Silent,
    /// Becomes ready but `play()` is always refused
    PlayDenied,
    /// Fails with an unsupported format
    Unsupported,
}

/// Media factory whose elements follow a per-URL [`Script`]
#[derive(Default)]
pub(crate) struct ScriptedMediaFactory {
    scripts: Mutex<HashMap<String, Script>>,
    elements: Mutex<Vec<Arc<ScriptedElement>>>,
}

impl ScriptedMediaFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, url: &str, script: Script) {
        self.scripts.lock().insert(url.to_string(), script);
    }

    pub(crate) fn created_count(&self) -> usize {
        self.elements.lock().len()
    }

    /// Creation times, in order
    pub(crate) fn created_at(&self) -> Vec<Instant> {
        self.elements.lock().iter().map(|e| e.created_at).collect()
    }

    pub(crate) fn element(&self, index: usize) -> Arc<ScriptedElement> {
        Arc::clone(&self.elements.lock()[index])
    }

    pub(crate) fn last(&self) -> Arc<ScriptedElement> {
        let elements = self.elements.lock();
        Arc::clone(&elements[elements.len() - 1])
    }
}

impl MediaElementFactory for ScriptedMediaFactory {
    fn create(&self, request: MediaRequest) -> Result<Arc<dyn MediaElement>, MediaError> {
        let script = self
            .scripts
            .lock()
            .get(&request.url)
            .copied()
            .unwrap_or(Script::Ready);
        let (tx, rx) = mpsc::unbounded_channel();
        let element = Arc::new(ScriptedElement {
            url: request.url,
            script,
            handle: request.handle,
            writer: Mutex::new(request.writer),
            context: request.context,
            tx: tx.clone(),
            rx: tokio::sync::Mutex::new(rx),
            stopped: CancellationToken::new(),
            play_calls: AtomicU32::new(0),
            created_at: Instant::now(),
        });

        match script {
            Script::Ready | Script::PlayDenied => {
                let _ = tx.send(MediaEvent::Waiting);
                let _ = tx.send(MediaEvent::CanPlay);
            }
            Script::ReadyAfter(delay) => {
                let _ = tx.send(MediaEvent::Waiting);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(MediaEvent::CanPlay);
                });
            }
            Script::Unreachable => {
                let _ = tx.send(MediaEvent::Error(MediaErrorKind::Network));
            }
            Script::Unsupported => {
                let _ = tx.send(MediaEvent::Error(MediaErrorKind::NotSupported));
            }
            Script::Silent => {}
        }

        self.elements.lock().push(Arc::clone(&element));
        Ok(element)
    }
}

pub(crate) struct ScriptedElement {
    pub(crate) url: String,
    script: Script,
    handle: SourceHandle,
    writer: Mutex<SourceWriter>,
    context: watch::Receiver<GraphState>,
    tx: mpsc::UnboundedSender<MediaEvent>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MediaEvent>>,
    stopped: CancellationToken,
    play_calls: AtomicU32,
    created_at: Instant,
}

impl ScriptedElement {
    pub(crate) fn emit(&self, event: MediaEvent) {
        let _ = self.tx.send(event);
    }

    /// Push `frames` stereo frames of a constant value into the source
    pub(crate) fn feed(&self, value: f32, frames: usize) -> usize {
        self.writer.lock().write(&vec![value; frames * 2])
    }

    pub(crate) fn handle(&self) -> &SourceHandle {
        &self.handle
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    pub(crate) fn play_calls(&self) -> u32 {
        self.play_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MediaElement for ScriptedElement {
    async fn next_event(&self) -> Option<MediaEvent> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.stopped.cancelled() => None,
            event = rx.recv() => event,
        }
    }

    async fn play(&self) -> Result<(), PlayError> {
        self.play_calls.fetch_add(1, Ordering::Relaxed);
        if self.stopped.is_cancelled() {
            return Err(PlayError::Other("element stopped".to_string()));
        }
        if self.script == Script::PlayDenied || *self.context.borrow() != GraphState::Running {
            return Err(PlayError::NotAllowed);
        }
        self.handle.set_playing(true);
        Ok(())
    }

    fn pause(&self) {
        self.handle.set_playing(false);
    }

    fn set_volume(&self, volume: f32) {
        self.handle.set_volume(volume);
    }

    fn stop(&self) {
        self.handle.set_playing(false);
        self.stopped.cancel();
    }
}

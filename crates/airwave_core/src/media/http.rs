//! HTTP Media Element
//!
//! ```text
//!   reqwest body ──(fetch task)──▶ mpsc<Vec<u8>> ──▶ ChannelReader
//!                                                        │
//!                          symphonia probe/decode ◀──────┘  (decoder thread)
//!                                   │
//!                                   ▼
//!                         SourceWriter ──rtrb──▶ render graph
//! ```
//!
//! The fetch task owns the network side and watches for stalls; the decoder
//! thread blocks on both ends and never touches the async runtime.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::describe_http_error;
use crate::graph::{GraphState, SourceHandle, SourceWriter};
use crate::resolver::format_from_content_type;

use super::{
    MediaElement, MediaElementFactory, MediaError, MediaErrorKind, MediaEvent, MediaRequest,
    PlayError,
};

/// No body data for this long counts as a stall
const STALL_TIMEOUT: Duration = Duration::from_secs(4);

/// Decoded audio buffered before `CanPlay` is reported
const CAN_PLAY_SECS: f32 = 0.5;

/// Network chunks queued ahead of the decoder
const CHUNK_QUEUE: usize = 64;

/// How long the decoder sleeps while the ring buffer is full
const WRITE_BACKOFF: Duration = Duration::from_millis(5);

/// Creates [`HttpMediaElement`]s sharing one HTTP client
pub struct HttpMediaFactory {
    client: reqwest::Client,
}

impl HttpMediaFactory {
    pub fn new(config: &ResolverConfig) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| MediaError::new(MediaErrorKind::Aborted, e.to_string()))?;
        Ok(Self { client })
    }
}

impl MediaElementFactory for HttpMediaFactory {
    fn create(&self, request: MediaRequest) -> Result<Arc<dyn MediaElement>, MediaError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MediaError::new(MediaErrorKind::Aborted, e.to_string()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let emitter = Arc::new(Emitter {
            tx: event_tx,
            failed: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();

        let fetch = Fetch {
            client: self.client.clone(),
            url: request.url.clone(),
            format_hint: request.format_hint,
            writer: request.writer,
            emitter: Arc::clone(&emitter),
            cancel: cancel.clone(),
        };
        runtime.spawn(fetch.run());

        debug!("Media element created for {}", request.url);
        Ok(Arc::new(HttpMediaElement {
            url: request.url,
            handle: request.handle,
            context: request.context,
            events: tokio::sync::Mutex::new(event_rx),
            emitter,
            cancel,
        }))
    }
}

/// Event sender shared by the fetch task and the decoder thread
struct Emitter {
    tx: mpsc::UnboundedSender<MediaEvent>,
    /// Set by the first error; later events would contradict it
    failed: AtomicBool,
}

impl Emitter {
    fn emit(&self, event: MediaEvent) {
        if !self.failed.load(Ordering::SeqCst) {
            let _ = self.tx.send(event);
        }
    }

    fn fail(&self, kind: MediaErrorKind, message: &str) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            warn!("Media error ({:?}): {}", kind, message);
            let _ = self.tx.send(MediaEvent::Error(kind));
        }
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

pub struct HttpMediaElement {
    url: String,
    handle: SourceHandle,
    context: watch::Receiver<GraphState>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<MediaEvent>>,
    emitter: Arc<Emitter>,
    cancel: CancellationToken,
}

#[async_trait]
impl MediaElement for HttpMediaElement {
    async fn next_event(&self) -> Option<MediaEvent> {
        let mut events = self.events.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = events.recv() => event,
        }
    }

    async fn play(&self) -> Result<(), PlayError> {
        if self.cancel.is_cancelled() {
            return Err(PlayError::Other("media element was stopped".to_string()));
        }
        if self.emitter.has_failed() {
            return Err(PlayError::Other("media failed to load".to_string()));
        }
        if *self.context.borrow() != GraphState::Running {
            return Err(PlayError::NotAllowed);
        }
        self.handle.set_playing(true);
        info!("Playing {}", self.url);
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
        self.cancel.cancel();
    }
}

impl Drop for HttpMediaElement {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Network half of an element
struct Fetch {
    client: reqwest::Client,
    url: String,
    format_hint: Option<String>,
    writer: SourceWriter,
    emitter: Arc<Emitter>,
    cancel: CancellationToken,
}

impl Fetch {
    async fn run(self) {
        let Fetch {
            client,
            url,
            format_hint,
            writer,
            emitter,
            cancel,
        } = self;

        let response = tokio::select! {
            _ = cancel.cancelled() => return,
            response = client.get(&url).send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                emitter.fail(MediaErrorKind::Network, &describe_http_error(&e));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            emitter.fail(MediaErrorKind::Network, &format!("HTTP {status} from {url}"));
            return;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("text/") {
            emitter.fail(
                MediaErrorKind::NotSupported,
                &format!("{url} is not audio ({content_type})"),
            );
            return;
        }

        let hint = format_hint.or_else(|| format_from_content_type(&content_type).map(String::from));
        let finite = response.content_length().is_some();
        debug!(
            "Loading {} ({}, {})",
            url,
            if content_type.is_empty() { "no content-type" } else { &content_type },
            if finite { "finite" } else { "live" }
        );
        emitter.emit(MediaEvent::Waiting);

        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(CHUNK_QUEUE);
        let reader = ChannelReader::new(chunk_rx);
        let decode = DecodeJob {
            hint,
            writer,
            emitter: Arc::clone(&emitter),
            cancel: cancel.clone(),
            finite,
        };
        if let Err(e) = thread::Builder::new()
            .name("airwave-decode".into())
            .spawn(move || decode.run(reader))
        {
            emitter.fail(MediaErrorKind::Decode, &e.to_string());
            return;
        }

        let mut body = response.bytes_stream();
        let mut stalled = false;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = tokio::time::timeout(STALL_TIMEOUT, body.next()) => next,
            };
            match next {
                Err(_) => {
                    if !stalled {
                        debug!("No data from {} for {:?}", url, STALL_TIMEOUT);
                        stalled = true;
                        emitter.emit(MediaEvent::Waiting);
                    }
                }
                Ok(Some(Ok(chunk))) => {
                    if stalled {
                        stalled = false;
                        emitter.emit(MediaEvent::Playing);
                    }
                    if chunk_tx.send(chunk.to_vec()).await.is_err() {
                        // Decoder is gone; it already reported why
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    emitter.fail(MediaErrorKind::Network, &describe_http_error(&e));
                    break;
                }
                Ok(None) => {
                    debug!("End of body from {}", url);
                    break;
                }
            }
        }
    }
}

/// Blocking `Read` over the chunks sent by the fetch task
struct ChannelReader {
    rx: mpsc::Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.chunk.len() {
            match self.rx.blocking_recv() {
                Some(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Decoder half of an element; runs on its own thread
struct DecodeJob {
    hint: Option<String>,
    writer: SourceWriter,
    emitter: Arc<Emitter>,
    cancel: CancellationToken,
    finite: bool,
}

impl DecodeJob {
    fn stopped(&self) -> bool {
        self.cancel.is_cancelled() || !self.writer.is_connected()
    }

    fn run(mut self, reader: ChannelReader) {
        let mut hint = Hint::new();
        if let Some(ext) = self.hint.as_deref() {
            hint.with_extension(ext);
        }
        let stream = MediaSourceStream::new(Box::new(ReadOnlySource::new(reader)), Default::default());

        let probed = symphonia::default::get_probe().format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        );
        let mut format = match probed {
            Ok(probed) => probed.format,
            Err(_) if self.stopped() => return,
            Err(SymphoniaError::IoError(e)) => {
                self.emitter.fail(MediaErrorKind::Network, &format!("Stream ended during probe: {e}"));
                return;
            }
            Err(e) => {
                self.emitter.fail(MediaErrorKind::NotSupported, &format!("Probe failed: {e}"));
                return;
            }
        };

        let (track_id, mut decoder) = match open_decoder(format.as_ref()) {
            Ok(opened) => opened,
            Err(message) => {
                self.emitter.fail(MediaErrorKind::NotSupported, &message);
                return;
            }
        };

        let mut samples: Option<SampleBuffer<f32>> = None;
        let mut stereo = Vec::new();
        let mut ready = false;
        let mut decode_errors = 0u64;

        loop {
            if self.stopped() {
                return;
            }

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.finish(ready);
                    return;
                }
                Err(SymphoniaError::ResetRequired) => {
                    // Chained streams (e.g. Ogg) change parameters between tracks
                    match open_decoder(format.as_ref()) {
                        Ok((_, fresh)) => {
                            decoder = fresh;
                            continue;
                        }
                        Err(message) => {
                            self.emitter.fail(MediaErrorKind::Decode, &message);
                            return;
                        }
                    }
                }
                Err(_) if self.stopped() => return,
                Err(e) => {
                    self.emitter.fail(MediaErrorKind::Network, &e.to_string());
                    return;
                }
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    decode_errors += 1;
                    debug!("Skipping corrupt packet ({} so far): {}", decode_errors, e);
                    continue;
                }
                Err(e) => {
                    self.emitter.fail(MediaErrorKind::Decode, &e.to_string());
                    return;
                }
            };

            let spec = *decoded.spec();
            if self.writer.input_rate() != spec.rate {
                debug!("Decoding at {}Hz, {} channels", spec.rate, spec.channels.count());
                self.writer.set_input_rate(spec.rate);
            }

            let capacity = decoded.capacity();
            if samples.as_ref().map_or(true, |b| b.capacity() < capacity) {
                samples = Some(SampleBuffer::new(capacity as u64, spec));
            }
            if let Some(buffer) = samples.as_mut() {
                buffer.copy_interleaved_ref(decoded);
                to_stereo(buffer.samples(), spec.channels.count(), &mut stereo);
            }

            if !self.write_all(&stereo, &mut ready) {
                return;
            }
            if !ready && self.writer.buffered_frames() as f32 >= CAN_PLAY_SECS * spec.rate as f32 {
                ready = true;
                self.emitter.emit(MediaEvent::CanPlay);
            }
        }
    }

    /// Write every frame, waiting while the ring is full
    fn write_all(&mut self, mut samples: &[f32], ready: &mut bool) -> bool {
        while !samples.is_empty() {
            if self.stopped() {
                return false;
            }
            let written = self.writer.write(samples);
            samples = &samples[written..];
            if written == 0 {
                // A full ring is as ready as it gets
                if !*ready {
                    *ready = true;
                    self.emitter.emit(MediaEvent::CanPlay);
                }
                thread::sleep(WRITE_BACKOFF);
            }
        }
        true
    }

    /// Clean end of data
    fn finish(&self, ready: bool) {
        if !self.finite {
            self.emitter
                .fail(MediaErrorKind::Network, "Live stream ended unexpectedly");
            return;
        }
        if self.emitter.has_failed() {
            return;
        }
        if !ready {
            self.emitter.emit(MediaEvent::CanPlay);
        }
        while self.writer.buffered_frames() > 0 {
            if self.stopped() {
                return;
            }
            thread::sleep(WRITE_BACKOFF);
        }
        self.emitter.emit(MediaEvent::Ended);
    }
}

fn open_decoder(format: &dyn FormatReader) -> Result<(u32, Box<dyn Decoder>), String> {
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| "No audio track found".to_string())?;
    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| format!("Unsupported codec: {e}"))?;
    Ok((track.id, decoder))
}

/// Fold any channel layout into interleaved stereo
fn to_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    match channels {
        0 => {}
        1 => out.extend(samples.iter().flat_map(|&s| [s, s])),
        2 => out.extend_from_slice(samples),
        n => {
            for frame in samples.chunks_exact(n) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::{Activation, AudioGraphManager, AutoplayPolicy, OfflineBackend};
    use crate::test_support::{mount_stream, wav_bytes};
    use wiremock::MockServer;

    async fn setup(
        policy: AutoplayPolicy,
    ) -> (Arc<AudioGraphManager>, OfflineBackend, HttpMediaFactory) {
        let backend = OfflineBackend::new(policy);
        let graph = Arc::new(AudioGraphManager::new(
            Arc::new(backend.clone()),
            GraphConfig::default(),
        ));
        graph.initialize().await.unwrap();
        let factory = HttpMediaFactory::new(&ResolverConfig::default()).unwrap();
        (graph, backend, factory)
    }

    fn request(graph: &AudioGraphManager, url: String) -> MediaRequest {
        let node = graph.create_source().unwrap();
        MediaRequest {
            url,
            format_hint: None,
            handle: node.handle,
            writer: node.writer,
            context: graph.state_watch(),
        }
    }

    async fn next(element: &Arc<dyn MediaElement>) -> Option<MediaEvent> {
        tokio::time::timeout(Duration::from_secs(5), element.next_event())
            .await
            .ok()
            .flatten()
    }

    #[test]
    fn test_to_stereo() {
        let mut out = Vec::new();
        to_stereo(&[0.1, 0.2], 1, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);

        to_stereo(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn test_channel_reader_concatenates_chunks() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(b"ab".to_vec()).unwrap();
        tx.try_send(b"cde".to_vec()).unwrap();
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut all = Vec::new();
        reader.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"abcde");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_finite_wav_plays_to_end() {
        let server = MockServer::start().await;
        mount_stream(&server, "/clip.wav", "audio/wav", wav_bytes(48000, 2, 4800, 0.25)).await;
        let (graph, backend, factory) = setup(AutoplayPolicy::Allowed).await;
        let element = factory.create(request(&graph, format!("{}/clip.wav", server.uri()))).unwrap();

        assert_eq!(next(&element).await, Some(MediaEvent::Waiting));
        assert_eq!(next(&element).await, Some(MediaEvent::CanPlay));
        element.play().await.unwrap();

        let renderer = backend.renderer();
        let mut heard = false;
        let mut ended = false;
        for _ in 0..200 {
            let out = renderer.render(1024);
            heard |= out.iter().any(|s| s.abs() > 0.1);
            if let Ok(event) =
                tokio::time::timeout(Duration::from_millis(10), element.next_event()).await
            {
                if event == Some(MediaEvent::Ended) {
                    ended = true;
                    break;
                }
            }
        }
        assert!(heard);
        assert!(ended);
    }

    #[tokio::test]
    async fn test_http_error_is_network_failure() {
        let server = MockServer::start().await;
        let (graph, _backend, factory) = setup(AutoplayPolicy::Allowed).await;
        let element = factory.create(request(&graph, format!("{}/missing", server.uri()))).unwrap();
        assert_eq!(
            next(&element).await,
            Some(MediaEvent::Error(MediaErrorKind::Network))
        );
        assert!(element.play().await.is_err());
    }

    #[tokio::test]
    async fn test_html_page_is_not_supported() {
        let server = MockServer::start().await;
        mount_stream(&server, "/page", "text/html", b"<html></html>".to_vec()).await;
        let (graph, _backend, factory) = setup(AutoplayPolicy::Allowed).await;
        let element = factory.create(request(&graph, format!("{}/page", server.uri()))).unwrap();
        assert_eq!(
            next(&element).await,
            Some(MediaEvent::Error(MediaErrorKind::NotSupported))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_play_refused_while_context_suspended() {
        let server = MockServer::start().await;
        mount_stream(&server, "/clip.wav", "audio/wav", wav_bytes(44100, 1, 441, 0.5)).await;
        let (graph, _backend, factory) = setup(AutoplayPolicy::RequireGesture).await;
        let element = factory.create(request(&graph, format!("{}/clip.wav", server.uri()))).unwrap();

        assert_eq!(next(&element).await, Some(MediaEvent::Waiting));
        assert_eq!(next(&element).await, Some(MediaEvent::CanPlay));
        assert_eq!(element.play().await, Err(PlayError::NotAllowed));

        graph.resume(Activation::UserGesture).await.unwrap();
        assert_eq!(element.play().await, Ok(()));
    }

    #[tokio::test]
    async fn test_stop_ends_event_stream() {
        let server = MockServer::start().await;
        let (graph, _backend, factory) = setup(AutoplayPolicy::Allowed).await;
        let element = factory.create(request(&graph, format!("{}/x", server.uri()))).unwrap();
        element.stop();
        assert_eq!(element.next_event().await, None);
    }
}

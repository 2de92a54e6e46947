//! Stream Session
//!
//! One logical stream at a time: resolve the URL, bind a media element to a
//! fresh source node, wait for readiness under a single timeout, then watch
//! the element until it ends or fails.
//!
//! ```text
//!  idle ─connect─▶ resolving ─▶ connecting ─▶ buffering ─▶ connected
//!                     ▲                                      │  ▲
//!                     │                 stall ◀──────────────┘  │
//!                     └── error (retrying) ◀── failure      data resumes
//! ```
//!
//! Every `connect` bumps a generation counter. Async steps re-check it after
//! each await; a step whose generation is stale gives up with
//! [`StreamError::Superseded`] and touches nothing.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use airwave_dsp::AnalyserConfig;

use crate::config::SessionConfig;
use crate::error::{StreamError, StreamErrorKind, StreamResult};
use crate::graph::{AnalyserHandle, AudioGraphManager, SourceHandle};
use crate::media::{
    MediaElement, MediaElementFactory, MediaError, MediaErrorKind, MediaEvent, MediaRequest,
    PlayError,
};
use crate::message::SessionEvent;
use crate::resolver::{Resolution, StreamResolver};

const EVENT_CAPACITY: usize = 64;

/// A connection that lived this long resets the reconnect backoff
const STABLE_UPTIME: Duration = Duration::from_secs(30);

/// Connection lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Resolving,
    Connecting,
    Buffering,
    Connected,
    Error,
    Disconnected,
}

impl ConnectionState {
    /// A stream is being set up or is playing
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Resolving
                | ConnectionState::Connecting
                | ConnectionState::Buffering
                | ConnectionState::Connected
        )
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub url: Option<String>,
    pub resolved_url: Option<String>,
    pub retry_count: u32,
    /// In `error` but a retry is scheduled
    pub retrying: bool,
    pub error_kind: Option<StreamErrorKind>,
    pub error_message: Option<String>,
    pub volume: f32,
    pub muted: bool,
    pub paused: bool,
    pub has_analyser: bool,
}

/// How a connected stream came to an end
enum Lifecycle {
    Ended,
    Lost { error: StreamError, uptime: Duration },
}

/// The element and source currently wired for this session
struct Binding {
    source: SourceHandle,
    element: Option<Arc<dyn MediaElement>>,
}

struct SessionState {
    generation: u64,
    state: ConnectionState,
    url: Option<String>,
    resolved_url: Option<String>,
    retry_count: u32,
    retrying: bool,
    last_error: Option<StreamError>,
    cancel: Option<CancellationToken>,
    binding: Option<Binding>,
    analyser: Option<AnalyserHandle>,
    volume: f32,
    muted: bool,
    paused: bool,
}

impl SessionState {
    fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    fn element(&self) -> Option<Arc<dyn MediaElement>> {
        self.binding.as_ref().and_then(|b| b.element.clone())
    }
}

/// Outcome of the first connection of a generation
#[derive(Clone)]
struct Progress {
    generation: u64,
    settled: Option<Result<(), StreamError>>,
}

struct SessionInner {
    graph: Arc<AudioGraphManager>,
    resolver: Arc<dyn StreamResolver>,
    media: Arc<dyn MediaElementFactory>,
    config: SessionConfig,
    analyser_config: AnalyserConfig,
    state: Mutex<SessionState>,
    progress: watch::Sender<Progress>,
    events: broadcast::Sender<SessionEvent>,
}

/// A supervised connection to one stream URL at a time
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<SessionInner>,
}

impl StreamSession {
    pub fn new(
        graph: Arc<AudioGraphManager>,
        resolver: Arc<dyn StreamResolver>,
        media: Arc<dyn MediaElementFactory>,
        config: SessionConfig,
        analyser_config: AnalyserConfig,
    ) -> Self {
        let (progress, _) = watch::channel(Progress {
            generation: 0,
            settled: None,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                graph,
                resolver,
                media,
                config,
                analyser_config,
                state: Mutex::new(SessionState {
                    generation: 0,
                    state: ConnectionState::Idle,
                    url: None,
                    resolved_url: None,
                    retry_count: 0,
                    retrying: false,
                    last_error: None,
                    cancel: None,
                    binding: None,
                    analyser: None,
                    volume: 1.0,
                    muted: false,
                    paused: false,
                }),
                progress,
                events,
            }),
        }
    }

    /// Connect to `url`, replacing whatever this session was doing.
    ///
    /// Resolves once the stream is playing, or with the terminal error after
    /// retries are exhausted. A later `connect` or `disconnect` makes this
    /// call return [`StreamError::Superseded`].
    pub async fn connect(&self, url: &str) -> StreamResult<()> {
        let inner = &self.inner;
        let (generation, token) = {
            let mut st = inner.state.lock();
            inner.teardown(&mut st);
            st.generation += 1;
            st.url = Some(url.to_string());
            st.resolved_url = None;
            st.retry_count = 0;
            st.retrying = false;
            st.last_error = None;
            st.paused = false;
            let token = CancellationToken::new();
            st.cancel = Some(token.clone());
            // Published under the lock so a racing connect cannot reorder it
            inner.progress.send_replace(Progress {
                generation: st.generation,
                settled: None,
            });
            (st.generation, token)
        };

        info!("Connecting to {} (generation {})", url, generation);
        tokio::spawn(Arc::clone(inner).supervise(generation, url.to_string(), token));
        self.wait_settled(generation).await
    }

    async fn wait_settled(&self, generation: u64) -> StreamResult<()> {
        let mut rx = self.inner.progress.subscribe();
        loop {
            {
                let progress = rx.borrow_and_update();
                if progress.generation != generation {
                    return Err(StreamError::Superseded);
                }
                if let Some(result) = &progress.settled {
                    return result.clone();
                }
            }
            if rx.changed().await.is_err() {
                return Err(StreamError::Superseded);
            }
        }
    }

    /// Stop the stream and release its source. No-op when idle.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let mut st = inner.state.lock();
        if st.cancel.is_none()
            && st.binding.is_none()
            && matches!(st.state, ConnectionState::Idle | ConnectionState::Disconnected)
        {
            return;
        }

        inner.teardown(&mut st);
        st.generation += 1;
        st.retrying = false;
        st.paused = false;
        inner.progress.send_replace(Progress {
            generation: st.generation,
            settled: None,
        });
        info!("Disconnected from {:?}", st.url);
        inner.set_state(&mut st, ConnectionState::Disconnected);
    }

    /// Pause the element in place; the connection stays open
    pub fn pause(&self) {
        let mut st = self.inner.state.lock();
        if let Some(element) = st.element() {
            element.pause();
        }
        st.paused = true;
    }

    /// Restart a paused element
    pub async fn resume_playback(&self) -> StreamResult<()> {
        let element = {
            let mut st = self.inner.state.lock();
            st.paused = false;
            // Not ready yet: the connect path starts playback itself
            if matches!(
                st.state,
                ConnectionState::Resolving | ConnectionState::Connecting
            ) {
                return Ok(());
            }
            st.element()
        };
        match element {
            Some(element) => element.play().await.map_err(play_failure),
            None => {
                debug!("Resume requested with nothing bound");
                Ok(())
            }
        }
    }

    /// Element volume in [0, 1]; remembered across reconnects
    pub fn set_volume(&self, level: f32) -> f32 {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        let mut st = self.inner.state.lock();
        st.volume = level;
        if let Some(element) = st.element() {
            element.set_volume(st.effective_volume());
        }
        level
    }

    pub fn set_muted(&self, muted: bool) {
        let mut st = self.inner.state.lock();
        st.muted = muted;
        if let Some(element) = st.element() {
            element.set_volume(st.effective_volume());
        }
    }

    /// Analyser fed by the graph; only while connected
    pub fn analyser(&self) -> Option<AnalyserHandle> {
        let st = self.inner.state.lock();
        st.analyser
            .clone()
            .filter(|_| st.state == ConnectionState::Connected)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    pub fn url(&self) -> Option<String> {
        self.inner.state.lock().url.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.state.lock().retry_count
    }

    pub fn is_retrying(&self) -> bool {
        self.inner.state.lock().retrying
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    pub fn last_error(&self) -> Option<StreamError> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.inner.state.lock();
        SessionSnapshot {
            state: st.state,
            url: st.url.clone(),
            resolved_url: st.resolved_url.clone(),
            retry_count: st.retry_count,
            retrying: st.retrying,
            error_kind: st.last_error.as_ref().map(StreamError::kind),
            error_message: st.last_error.as_ref().map(StreamError::user_message),
            volume: st.volume,
            muted: st.muted,
            paused: st.paused,
            has_analyser: st.analyser.is_some() && st.state == ConnectionState::Connected,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, st: &mut SessionState, state: ConnectionState) {
        if st.state == state {
            return;
        }
        debug!("Session state {:?} -> {:?}", st.state, state);
        st.state = state;
        self.emit(SessionEvent::StateChanged {
            state,
            retry_count: st.retry_count,
        });
    }

    /// Run `f` only while `generation` is current
    fn with_current<T>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> StreamResult<T> {
        let mut st = self.state.lock();
        if st.generation != generation {
            return Err(StreamError::Superseded);
        }
        Ok(f(&mut *st))
    }

    fn check(&self, generation: u64) -> StreamResult<()> {
        self.with_current(generation, |_| ())
    }

    fn transition(&self, generation: u64, state: ConnectionState) -> StreamResult<()> {
        let mut st = self.state.lock();
        if st.generation != generation {
            return Err(StreamError::Superseded);
        }
        self.set_state(&mut st, state);
        Ok(())
    }

    /// Stop the element and unwire its source
    fn unbind(&self, st: &mut SessionState) {
        if let Some(binding) = st.binding.take() {
            if let Some(element) = binding.element {
                element.stop();
            }
            self.graph.disconnect_source(binding.source.id());
        }
    }

    fn teardown(&self, st: &mut SessionState) {
        if let Some(token) = st.cancel.take() {
            token.cancel();
        }
        self.unbind(st);
    }

    fn settle(&self, generation: u64, result: Result<(), StreamError>) {
        self.progress.send_if_modified(|progress| {
            if progress.generation == generation && progress.settled.is_none() {
                progress.settled = Some(result);
                true
            } else {
                false
            }
        });
    }

    async fn supervise(self: Arc<Self>, generation: u64, url: String, token: CancellationToken) {
        let mut retries = 0u32;
        let mut drops = 0u32;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                outcome = self.attempt(generation, &url) => outcome,
            };

            match outcome {
                Ok(Lifecycle::Ended) => {
                    self.finish(generation);
                    return;
                }
                Ok(Lifecycle::Lost { error, uptime }) if error.is_retriable() => {
                    retries = 0;
                    drops = if uptime >= STABLE_UPTIME { 1 } else { drops + 1 };
                    let delay = self.config.backoff_delay(drops);
                    warn!(
                        "Stream {} dropped after {}s: {}; reconnecting in {}ms",
                        url,
                        uptime.as_secs(),
                        error,
                        delay.as_millis()
                    );
                    let unbound = self.with_current(generation, |st| {
                        self.unbind(st);
                        self.set_state(st, ConnectionState::Buffering);
                    });
                    if unbound.is_err() {
                        return;
                    }
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
                Ok(Lifecycle::Lost { error, .. }) => {
                    self.fail(generation, error);
                    return;
                }
                Err(StreamError::Superseded) => return,
                Err(err) if err.is_retriable() && retries < self.config.max_retries => {
                    retries += 1;
                    let delay = self.config.backoff_delay(retries);
                    if self.schedule_retry(generation, retries, delay, err).is_err() {
                        return;
                    }
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
                Err(err) => {
                    let err = if err.is_retriable() && retries > 0 {
                        StreamError::MaxRetriesExceeded {
                            attempts: retries + 1,
                            last: Box::new(err),
                        }
                    } else {
                        err
                    };
                    self.fail(generation, err);
                    return;
                }
            }
        }
    }

    /// One pass from `resolving` until the stream ends or fails
    async fn attempt(&self, generation: u64, url: &str) -> StreamResult<Lifecycle> {
        self.transition(generation, ConnectionState::Resolving)?;
        let resolution = self.resolver.resolve(url).await;
        if let Resolution::Fallback { reason, .. } = &resolution {
            debug!("Using unresolved URL {}: {}", url, reason);
        }
        self.with_current(generation, |st| {
            st.resolved_url = Some(resolution.url().to_string())
        })?;

        self.graph.initialize().await?;
        self.check(generation)?;

        let node = self.graph.create_source()?;
        let source = node.handle.clone();
        let bound = self.with_current(generation, |st| {
            st.binding = Some(Binding {
                source: source.clone(),
                element: None,
            })
        });
        if let Err(e) = bound {
            self.graph.disconnect_source(source.id());
            return Err(e);
        }
        self.ensure_analyser(generation)?;

        let element = self
            .media
            .create(MediaRequest {
                url: resolution.url().to_string(),
                format_hint: resolution.format().map(str::to_string),
                handle: node.handle,
                writer: node.writer,
                context: self.graph.state_watch(),
            })
            .map_err(media_error)?;
        let stored = self.with_current(generation, |st| {
            element.set_volume(st.effective_volume());
            if let Some(binding) = st.binding.as_mut() {
                binding.element = Some(Arc::clone(&element));
            }
        });
        if let Err(e) = stored {
            element.stop();
            return Err(e);
        }

        self.transition(generation, ConnectionState::Connecting)?;
        self.await_ready(generation, element.as_ref()).await?;
        self.mark_connected(generation)?;
        let connected_at = Instant::now();
        let lifecycle = self.monitor(generation, element.as_ref()).await?;
        Ok(match lifecycle {
            Lifecycle::Lost { error, .. } => Lifecycle::Lost {
                error,
                uptime: connected_at.elapsed(),
            },
            ended => ended,
        })
    }

    /// Wait for `CanPlay` and a successful `play()` under one deadline
    async fn await_ready(&self, generation: u64, element: &dyn MediaElement) -> StreamResult<()> {
        let limit = self.config.connect_timeout;
        let deadline = Instant::now() + limit;
        loop {
            let event = timeout_at(deadline, element.next_event())
                .await
                .map_err(|_| StreamError::ConnectTimeout(limit))?;
            self.check(generation)?;

            match event {
                Some(MediaEvent::Waiting) | Some(MediaEvent::Playing) => {
                    self.transition(generation, ConnectionState::Buffering)?;
                }
                Some(MediaEvent::CanPlay) => {
                    self.transition(generation, ConnectionState::Buffering)?;
                    // Paused while connecting: stay loaded, resume_playback starts it
                    if self.with_current(generation, |st| st.paused)? {
                        debug!("Stream ready while paused; holding playback");
                        return Ok(());
                    }
                    let played = timeout_at(deadline, element.play())
                        .await
                        .map_err(|_| StreamError::ConnectTimeout(limit))?;
                    played.map_err(play_failure)?;
                    // A pause that raced play() still wins
                    return self.with_current(generation, |st| {
                        if st.paused {
                            element.pause();
                        }
                    });
                }
                Some(MediaEvent::Ended) => {
                    return Err(StreamError::Network(
                        "Stream ended before playback started".to_string(),
                    ));
                }
                Some(MediaEvent::Error(kind)) => return Err(media_failure(kind)),
                None => {
                    return Err(StreamError::Network("Media element closed".to_string()));
                }
            }
        }
    }

    async fn monitor(&self, generation: u64, element: &dyn MediaElement) -> StreamResult<Lifecycle> {
        loop {
            let event = element.next_event().await;
            self.check(generation)?;
            match event {
                Some(MediaEvent::Waiting) => {
                    self.transition(generation, ConnectionState::Buffering)?;
                }
                Some(MediaEvent::Playing) | Some(MediaEvent::CanPlay) => {
                    self.transition(generation, ConnectionState::Connected)?;
                }
                Some(MediaEvent::Ended) => return Ok(Lifecycle::Ended),
                Some(MediaEvent::Error(kind)) => {
                    return Ok(Lifecycle::Lost {
                        error: media_failure(kind),
                        uptime: Duration::ZERO,
                    });
                }
                None => {
                    return Ok(Lifecycle::Lost {
                        error: StreamError::Network("Media element closed".to_string()),
                        uptime: Duration::ZERO,
                    });
                }
            }
        }
    }

    fn ensure_analyser(&self, generation: u64) -> StreamResult<()> {
        let existing = self.with_current(generation, |st| st.analyser.clone())?;
        if let Some(analyser) = existing {
            if self.graph.analyser_attached(analyser.id()) {
                return Ok(());
            }
        }

        let created = self.graph.create_analyser(self.analyser_config)?;
        let stale = created.clone();
        if let Err(e) = self.with_current(generation, |st| st.analyser = created) {
            if let Some(analyser) = stale {
                self.graph.remove_analyser(analyser.id());
            }
            return Err(e);
        }
        Ok(())
    }

    fn mark_connected(&self, generation: u64) -> StreamResult<()> {
        let url = self.with_current(generation, |st| {
            st.retry_count = 0;
            st.retrying = false;
            st.last_error = None;
            self.set_state(st, ConnectionState::Connected);
            st.resolved_url.clone().or_else(|| st.url.clone()).unwrap_or_default()
        })?;
        info!("Connected to {}", url);
        self.emit(SessionEvent::Connected { url });
        self.settle(generation, Ok(()));
        Ok(())
    }

    fn schedule_retry(
        &self,
        generation: u64,
        attempt: u32,
        delay: Duration,
        err: StreamError,
    ) -> StreamResult<()> {
        self.with_current(generation, |st| {
            warn!(
                "Attempt {} failed: {}; retrying in {}ms",
                attempt,
                err,
                delay.as_millis()
            );
            self.unbind(st);
            st.retry_count = attempt;
            st.retrying = true;
            st.last_error = Some(err);
            self.set_state(st, ConnectionState::Error);
            self.emit(SessionEvent::RetryScheduled {
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
        })
    }

    fn fail(&self, generation: u64, err: StreamError) {
        let applied = self.with_current(generation, |st| {
            error!("Stream {:?} failed: {}", st.url, err);
            self.unbind(st);
            st.cancel = None;
            st.retrying = false;
            st.last_error = Some(err.clone());
            if st.state == ConnectionState::Error {
                // Already in error while retrying; subscribers still need
                // to see that it is now terminal
                self.emit(SessionEvent::StateChanged {
                    state: ConnectionState::Error,
                    retry_count: st.retry_count,
                });
            } else {
                self.set_state(st, ConnectionState::Error);
            }
            self.emit(SessionEvent::error(&err));
        });
        if applied.is_ok() {
            self.settle(generation, Err(err));
        }
    }

    fn finish(&self, generation: u64) {
        let _ = self.with_current(generation, |st| {
            info!("Stream {:?} ended", st.url);
            self.unbind(st);
            st.cancel = None;
            self.set_state(st, ConnectionState::Disconnected);
            self.emit(SessionEvent::Ended);
        });
    }
}

fn media_failure(kind: MediaErrorKind) -> StreamError {
    match kind {
        MediaErrorKind::Network => StreamError::Network("Stream connection failed".to_string()),
        MediaErrorKind::Aborted => StreamError::Network("Stream was aborted".to_string()),
        MediaErrorKind::Decode => {
            StreamError::FormatUnsupported("Stream could not be decoded".to_string())
        }
        MediaErrorKind::NotSupported => {
            StreamError::FormatUnsupported("No decoder for this stream".to_string())
        }
    }
}

fn media_error(err: MediaError) -> StreamError {
    match err.kind {
        MediaErrorKind::Network | MediaErrorKind::Aborted => StreamError::Network(err.message),
        MediaErrorKind::Decode | MediaErrorKind::NotSupported => {
            StreamError::FormatUnsupported(err.message)
        }
    }
}

fn play_failure(err: PlayError) -> StreamError {
    match err {
        PlayError::NotAllowed => StreamError::PlaybackPermission,
        PlayError::NotSupported(message) => StreamError::FormatUnsupported(message),
        PlayError::Other(message) => StreamError::Network(message),
    }
}

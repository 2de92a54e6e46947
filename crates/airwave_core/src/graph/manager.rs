//! Audio Graph Manager
//!
//! Owns the single shared audio graph. Everything that changes the graph's
//! topology goes through here: sources and analysers are wired by sending
//! [`GraphCommand`]s to the render graph owned by the backend context.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use airwave_dsp::{Analyser, AnalyserConfig};

use crate::config::GraphConfig;
use crate::equalizer::EqualizerController;
use crate::error::{GraphError, GraphResult};
use crate::message::{AnalyserId, GraphCommand, SourceId};

use super::backend::{Activation, AudioBackend, AudioContextDriver, ContextOptions, ContextState};
use super::render::RenderGraph;
use super::source::{SourceHandle, SourceNode};
use super::{AnalyserHandle, GraphState, GraphStatus};

/// Everything that exists only while a context is alive
struct LiveGraph {
    /// Distinguishes this context from one built after it
    epoch: u64,
    driver: Arc<dyn AudioContextDriver>,
    commands: Sender<GraphCommand>,
    sources: HashMap<SourceId, SourceHandle>,
    analysers: HashSet<AnalyserId>,
    sample_rate: u32,
}

impl LiveGraph {
    fn send(&self, command: GraphCommand) {
        debug!("Graph command: {:?}", command);
        // The receiver lives as long as the context; after close the
        // command has nothing left to act on
        let _ = self.commands.send(command);
    }
}

struct GraphInner {
    state: GraphState,
    master_volume: f32,
    last_error: Option<GraphError>,
    live: Option<LiveGraph>,
}

/// The shared audio graph: one context, one master gain, one equalizer
pub struct AudioGraphManager {
    backend: Arc<dyn AudioBackend>,
    config: GraphConfig,

    /// Serializes initialization and teardown; overlapping callers wait here
    init_guard: tokio::sync::Mutex<()>,

    inner: Mutex<GraphInner>,
    equalizer: EqualizerController,
    next_id: AtomicU64,
    state_tx: watch::Sender<GraphState>,
}

impl AudioGraphManager {
    pub fn new(backend: Arc<dyn AudioBackend>, config: GraphConfig) -> Self {
        let (state_tx, _) = watch::channel(GraphState::Uninitialized);
        Self {
            backend,
            config,
            init_guard: tokio::sync::Mutex::new(()),
            inner: Mutex::new(GraphInner {
                state: GraphState::Uninitialized,
                master_volume: 1.0,
                last_error: None,
                live: None,
            }),
            equalizer: EqualizerController::new(),
            next_id: AtomicU64::new(1),
            state_tx,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn equalizer(&self) -> &EqualizerController {
        &self.equalizer
    }

    pub fn state(&self) -> GraphState {
        self.inner.lock().state
    }

    /// Follow state changes (used by media elements to gate `play()`)
    pub fn state_watch(&self) -> watch::Receiver<GraphState> {
        self.state_tx.subscribe()
    }

    /// Rate of the live context
    pub fn sample_rate(&self) -> Option<u32> {
        self.inner.lock().live.as_ref().map(|live| live.sample_rate)
    }

    pub fn last_error(&self) -> Option<GraphError> {
        self.inner.lock().last_error.clone()
    }

    fn publish(&self, inner: &mut GraphInner, state: GraphState) {
        if inner.state != state {
            info!("Audio graph: {:?} -> {:?}", inner.state, state);
        }
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    /// Result for callers that need no new context, or `None` to build one
    fn settled(&self) -> Option<GraphResult<GraphState>> {
        let inner = self.inner.lock();
        match inner.state {
            GraphState::Running | GraphState::Suspended => Some(Ok(inner.state)),
            GraphState::Closed => Some(Err(GraphError::Closed)),
            GraphState::Error => Some(Err(inner
                .last_error
                .clone()
                .unwrap_or_else(|| GraphError::Init("unknown failure".to_string())))),
            GraphState::Uninitialized | GraphState::Initializing => None,
        }
    }

    /// Build the context if it does not exist yet
    ///
    /// Idempotent: a live graph resolves immediately, and callers that arrive
    /// while another initialization is in flight wait for its outcome instead
    /// of building a second context. After a failure the stored error is
    /// returned until [`retry`](Self::retry) is called.
    pub async fn initialize(&self) -> GraphResult<GraphState> {
        if let Some(settled) = self.settled() {
            return settled;
        }

        let _guard = self.init_guard.lock().await;
        if let Some(settled) = self.settled() {
            return settled;
        }

        self.build().await
    }

    /// Create the context; the caller holds `init_guard`
    async fn build(&self) -> GraphResult<GraphState> {
        let master_volume = {
            let mut inner = self.inner.lock();
            self.publish(&mut inner, GraphState::Initializing);
            inner.master_volume
        };

        let options = ContextOptions {
            sample_rate: self.config.sample_rate,
            latency_hint: self.config.latency_hint,
        };
        info!(
            "Creating {} audio context ({}Hz, {:?}, ~{:.1}ms)",
            self.backend.name(),
            options.sample_rate,
            options.latency_hint,
            self.config.latency_ms()
        );

        let (commands, receiver) = unbounded();
        let created = match RenderGraph::new(
            self.config.sample_rate,
            &self.equalizer.config(),
            master_volume,
            receiver,
        ) {
            Ok(graph) => self.backend.create_context(options, graph).await,
            Err(e) => Err(GraphError::Init(e.to_string())),
        };

        let mut inner = self.inner.lock();
        match created {
            Ok(driver) => {
                let state = GraphState::from(driver.state());
                let sample_rate = driver.sample_rate();
                self.equalizer.attach(commands.clone());
                inner.live = Some(LiveGraph {
                    epoch: self.next_id.fetch_add(1, Ordering::Relaxed),
                    driver: Arc::from(driver),
                    commands,
                    sources: HashMap::new(),
                    analysers: HashSet::new(),
                    sample_rate,
                });
                inner.last_error = None;
                self.publish(&mut inner, state);
                Ok(state)
            }
            Err(e) => {
                let e = match e {
                    GraphError::Init(_) => e,
                    other => GraphError::Init(other.to_string()),
                };
                error!("Audio graph initialization failed: {}", e);
                inner.last_error = Some(e.clone());
                self.publish(&mut inner, GraphState::Error);
                Err(e)
            }
        }
    }

    /// Ensure the graph exists, then leave `suspended`
    ///
    /// A refusal (autoplay policy, device hiccup) is recoverable: the graph
    /// stays suspended and the next gesture can try again.
    pub async fn resume(&self, activation: Activation) -> GraphResult<GraphState> {
        self.initialize().await?;

        let (epoch, driver) = self.current_driver()?;
        let result = driver.resume(activation).await;

        let mut inner = self.inner.lock();
        if let Some(stale) = Self::replaced(&inner, epoch) {
            return stale;
        }
        match result {
            Ok(state) => {
                inner.last_error = None;
                let state = GraphState::from(state);
                self.publish(&mut inner, state);
                Ok(state)
            }
            Err(e @ GraphError::Resume(_)) => {
                warn!("Resume refused ({:?}): {}", activation, e);
                inner.last_error = Some(e.clone());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Explicit suspend; a graph that was never built stays as it is
    pub async fn suspend(&self) -> GraphResult<GraphState> {
        let (epoch, driver) = match self.current_driver() {
            Ok(current) => current,
            Err(GraphError::NotInitialized) => return Ok(self.state()),
            Err(e) => return Err(e),
        };
        let result = driver.suspend().await;

        let mut inner = self.inner.lock();
        if let Some(stale) = Self::replaced(&inner, epoch) {
            return stale;
        }
        let state = GraphState::from(result?);
        self.publish(&mut inner, state);
        Ok(state)
    }

    /// The live driver, cloned out so its transitions run without the lock
    fn current_driver(&self) -> GraphResult<(u64, Arc<dyn AudioContextDriver>)> {
        let inner = self.inner.lock();
        match inner.live.as_ref() {
            Some(live) => Ok((live.epoch, Arc::clone(&live.driver))),
            None if inner.state == GraphState::Closed => Err(GraphError::Closed),
            None => Err(GraphError::NotInitialized),
        }
    }

    /// Outcome for a driver call whose context was closed or replaced meanwhile
    fn replaced(inner: &GraphInner, epoch: u64) -> Option<GraphResult<GraphState>> {
        if inner.live.as_ref().is_some_and(|live| live.epoch == epoch) {
            return None;
        }
        Some(match inner.state {
            GraphState::Closed => Err(GraphError::Closed),
            state => Ok(state),
        })
    }

    /// Returning to the foreground tries a programmatic resume
    ///
    /// Hiding never suspends; a refused resume leaves the graph suspended.
    pub async fn on_visibility_change(&self, visible: bool) -> GraphState {
        if visible && self.state() == GraphState::Suspended {
            if let Err(e) = self.resume(Activation::Programmatic).await {
                debug!("Foreground resume did not start audio: {}", e);
            }
        }
        self.state()
    }

    /// Tap the post-equalizer signal; `Ok(None)` until the graph is live
    pub fn create_analyser(&self, config: AnalyserConfig) -> GraphResult<Option<AnalyserHandle>> {
        let mut inner = self.inner.lock();
        let Some(live) = inner.live.as_mut() else {
            return Ok(None);
        };

        let analyser = Arc::new(Analyser::new(live.sample_rate as f32, config)?);
        let id = AnalyserId(self.next_id.fetch_add(1, Ordering::Relaxed));
        live.analysers.insert(id);
        live.send(GraphCommand::AddAnalyser(id, Arc::clone(&analyser)));
        Ok(Some(AnalyserHandle::new(id, analyser)))
    }

    pub fn remove_analyser(&self, id: AnalyserId) {
        let mut inner = self.inner.lock();
        if let Some(live) = inner.live.as_mut() {
            if live.analysers.remove(&id) {
                live.send(GraphCommand::RemoveAnalyser(id));
            }
        }
    }

    /// Whether `id` is still tapped into the live graph
    pub fn analyser_attached(&self, id: AnalyserId) -> bool {
        self.inner
            .lock()
            .live
            .as_ref()
            .is_some_and(|live| live.analysers.contains(&id))
    }

    /// Allocate a source and wire it into the equalizer input
    pub fn create_source(&self) -> GraphResult<SourceNode> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        let Some(live) = inner.live.as_mut() else {
            return Err(match state {
                GraphState::Closed => GraphError::Closed,
                _ => GraphError::NotInitialized,
            });
        };

        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let capacity = (self.config.source_buffer_secs * live.sample_rate as f32) as usize;
        let (node, voice) = SourceNode::new(
            id,
            live.sample_rate,
            capacity,
            self.config.ramp_samples(self.config.master_ramp_ms),
        )?;

        live.sources.insert(id, node.handle.clone());
        live.send(GraphCommand::AddSource(voice));
        debug!("Wired {} ({} sources)", id, live.sources.len());
        Ok(node)
    }

    /// Unwire a source; silent from the next render quantum. Idempotent.
    pub fn disconnect_source(&self, id: SourceId) {
        let mut inner = self.inner.lock();
        let Some(live) = inner.live.as_mut() else {
            return;
        };
        if let Some(handle) = live.sources.remove(&id) {
            handle.mark_disconnected();
            live.send(GraphCommand::RemoveSource(id));
            debug!("Unwired {} ({} sources)", id, live.sources.len());
        }
    }

    pub fn active_source_count(&self) -> usize {
        self.inner
            .lock()
            .live
            .as_ref()
            .map_or(0, |live| live.sources.len())
    }

    /// Set the master level; returns the clamped value
    ///
    /// Remembered while no graph exists and applied to the next one.
    pub fn set_master_volume(&self, level: f32) -> f32 {
        let level = if level.is_nan() {
            0.0
        } else {
            level.clamp(0.0, 1.0)
        };

        let mut inner = self.inner.lock();
        inner.master_volume = level;
        if let Some(live) = inner.live.as_ref() {
            live.send(GraphCommand::SetMasterGain {
                gain: level,
                ramp_samples: self.config.ramp_samples(self.config.master_ramp_ms),
            });
        }
        level
    }

    pub fn master_volume(&self) -> f32 {
        self.inner.lock().master_volume
    }

    /// Fade out, close the context and drop every node; idempotent
    pub async fn teardown(&self) {
        let _guard = self.init_guard.lock().await;
        if self.state() == GraphState::Closed {
            return;
        }

        self.fade_out().await;
        let live = {
            let mut inner = self.inner.lock();
            let live = inner.live.take();
            self.equalizer.detach();
            self.publish(&mut inner, GraphState::Closed);
            live
        };
        if let Some(live) = live {
            close_live(live).await;
        }
    }

    /// Throw away the current context (if any) and build a new one
    ///
    /// The path out of `error`; also valid from a live state.
    pub async fn retry(&self) -> GraphResult<GraphState> {
        let _guard = self.init_guard.lock().await;
        let live = {
            let mut inner = self.inner.lock();
            if inner.state == GraphState::Closed {
                return Err(GraphError::Closed);
            }
            let live = inner.live.take();
            self.equalizer.detach();
            inner.last_error = None;
            self.publish(&mut inner, GraphState::Uninitialized);
            live
        };
        if let Some(live) = live {
            close_live(live).await;
        }
        info!("Retrying audio graph initialization");
        self.build().await
    }

    /// Ramp the master gain to zero before a running context is closed
    async fn fade_out(&self) {
        let running = {
            let inner = self.inner.lock();
            match inner.live.as_ref() {
                Some(live) if live.driver.state() == ContextState::Running => {
                    live.send(GraphCommand::SetMasterGain {
                        gain: 0.0,
                        ramp_samples: self.config.ramp_samples(self.config.teardown_ramp_ms),
                    });
                    true
                }
                _ => false,
            }
        };
        if running {
            tokio::time::sleep(Duration::from_millis(self.config.teardown_ramp_ms as u64)).await;
        }
    }

    pub fn status(&self) -> GraphStatus {
        let inner = self.inner.lock();
        GraphStatus {
            state: inner.state,
            master_volume: inner.master_volume,
            eq_bypassed: !self.equalizer.is_enabled(),
            sample_rate: inner.live.as_ref().map(|live| live.sample_rate),
            active_sources: inner.live.as_ref().map_or(0, |live| live.sources.len()),
            analysers: inner.live.as_ref().map_or(0, |live| live.analysers.len()),
            last_error: inner.last_error.as_ref().map(|e| e.to_string()),
        }
    }
}

fn release_sources(live: &LiveGraph) {
    for handle in live.sources.values() {
        handle.mark_disconnected();
    }
}

/// Called without the state lock held; closing may wait on the device
async fn close_live(live: LiveGraph) {
    release_sources(&live);
    if let Err(e) = live.driver.close().await {
        warn!("Error closing audio context: {}", e);
    }
}

impl Drop for AudioGraphManager {
    fn drop(&mut self) {
        // Dropping the driver releases the device without waiting on it
        if let Some(live) = self.inner.get_mut().live.take() {
            release_sources(&live);
        }
    }
}

//! Offline Backend
//!
//! Renders the graph on demand instead of on a device callback. Used for
//! headless operation (no sound card) and to drive the graph deterministically
//! in tests: call [`OfflineRenderer::render`] to pull a block of output.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::GraphError;

use super::backend::{
    Activation, AudioBackend, AudioContextDriver, AutoplayPolicy, ContextOptions, ContextState,
    Lifecycle,
};
use super::render::RenderGraph;

struct OfflineContextSlot {
    /// Bumped for every context, so a stale driver cannot close a newer one
    epoch: u64,
    lifecycle: Lifecycle,
    graph: Option<RenderGraph>,
}

struct OfflineShared {
    policy: AutoplayPolicy,
    slot: Mutex<OfflineContextSlot>,
    fail_init: AtomicBool,
    contexts_created: AtomicU64,
}

/// Backend whose contexts render only when asked to
#[derive(Clone)]
pub struct OfflineBackend {
    shared: Arc<OfflineShared>,
}

impl OfflineBackend {
    pub fn new(policy: AutoplayPolicy) -> Self {
        Self {
            shared: Arc::new(OfflineShared {
                policy,
                slot: Mutex::new(OfflineContextSlot {
                    epoch: 0,
                    lifecycle: Lifecycle::new(policy),
                    graph: None,
                }),
                fail_init: AtomicBool::new(false),
                contexts_created: AtomicU64::new(0),
            }),
        }
    }

    /// Handle for pulling rendered audio
    pub fn renderer(&self) -> OfflineRenderer {
        OfflineRenderer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Make subsequent `create_context` calls fail (simulates a missing device)
    pub fn set_fail_init(&self, fail: bool) {
        self.shared.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Number of contexts successfully created so far
    pub fn contexts_created(&self) -> u64 {
        self.shared.contexts_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioBackend for OfflineBackend {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn create_context(
        &self,
        options: ContextOptions,
        graph: RenderGraph,
    ) -> Result<Box<dyn AudioContextDriver>, GraphError> {
        if self.shared.fail_init.load(Ordering::SeqCst) {
            return Err(GraphError::Init("offline backend unavailable".to_string()));
        }

        let mut slot = self.shared.slot.lock();
        slot.epoch += 1;
        slot.lifecycle = Lifecycle::new(self.shared.policy);
        slot.graph = Some(graph);
        self.shared.contexts_created.fetch_add(1, Ordering::SeqCst);

        info!(
            "Offline context #{} created at {}Hz ({:?})",
            slot.epoch,
            options.sample_rate,
            slot.lifecycle.state()
        );

        Ok(Box::new(OfflineContext {
            shared: Arc::clone(&self.shared),
            epoch: slot.epoch,
            sample_rate: options.sample_rate,
        }))
    }
}

struct OfflineContext {
    shared: Arc<OfflineShared>,
    epoch: u64,
    sample_rate: u32,
}

impl OfflineContext {
    fn with_slot<T>(
        &self,
        f: impl FnOnce(&mut OfflineContextSlot) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        let mut slot = self.shared.slot.lock();
        if slot.epoch != self.epoch {
            return Err(GraphError::Closed);
        }
        f(&mut slot)
    }
}

#[async_trait]
impl AudioContextDriver for OfflineContext {
    fn state(&self) -> ContextState {
        self.with_slot(|slot| Ok(slot.lifecycle.state()))
            .unwrap_or(ContextState::Closed)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn resume(&self, activation: Activation) -> Result<ContextState, GraphError> {
        self.with_slot(|slot| {
            if slot.lifecycle.begin_resume(activation)? {
                slot.lifecycle.set_state(ContextState::Running);
                debug!("Offline context resumed ({:?})", activation);
            }
            Ok(slot.lifecycle.state())
        })
    }

    async fn suspend(&self) -> Result<ContextState, GraphError> {
        self.with_slot(|slot| match slot.lifecycle.state() {
            ContextState::Closed => Err(GraphError::Closed),
            _ => {
                slot.lifecycle.set_state(ContextState::Suspended);
                Ok(ContextState::Suspended)
            }
        })
    }

    async fn close(&self) -> Result<(), GraphError> {
        let mut slot = self.shared.slot.lock();
        if slot.epoch == self.epoch {
            slot.lifecycle.set_state(ContextState::Closed);
            slot.graph = None;
        }
        Ok(())
    }
}

/// Pulls audio out of the current offline context
#[derive(Clone)]
pub struct OfflineRenderer {
    shared: Arc<OfflineShared>,
}

impl OfflineRenderer {
    /// Render `frames` frames of interleaved stereo
    ///
    /// Returns silence while the context is suspended, closed or absent;
    /// queued graph commands wait until it runs again.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        self.render_into(&mut out);
        out
    }

    pub fn render_into(&self, out: &mut [f32]) {
        let mut slot = self.shared.slot.lock();
        let running = slot.lifecycle.state() == ContextState::Running;
        match slot.graph.as_mut() {
            Some(graph) if running => graph.render(out),
            _ => out.fill(0.0),
        }
    }

    /// Inspect the live render graph, if any
    pub fn with_graph<T>(&self, f: impl FnOnce(&RenderGraph) -> T) -> Option<T> {
        let slot = self.shared.slot.lock();
        slot.graph.as_ref().map(f)
    }

    pub fn state(&self) -> ContextState {
        let slot = self.shared.slot.lock();
        if slot.graph.is_none() {
            return ContextState::Closed;
        }
        slot.lifecycle.state()
    }
}

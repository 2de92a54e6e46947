//! Audio Backend Traits
//!
//! An [`AudioBackend`] turns a [`RenderGraph`] into a running audio context.
//! The context is driven through [`AudioContextDriver`], which mirrors the
//! lifecycle of a browser `AudioContext`: it may start suspended, resume only
//! with user activation, and closes for good.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LatencyHint;
use crate::error::GraphError;

use super::render::RenderGraph;

/// Lifecycle of a backend context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// Where a resume request originates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Directly caused by a user interaction (click, key press, play request)
    UserGesture,
    /// Anything else: timers, visibility changes, reconnects
    Programmatic,
}

/// When a context is allowed to produce sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoplayPolicy {
    /// Contexts start running and resume freely
    #[default]
    Allowed,
    /// Contexts start suspended; the first resume must be a user gesture.
    /// After that the context counts as activated and programmatic resumes
    /// succeed.
    RequireGesture,
}

impl AutoplayPolicy {
    pub fn initial_state(&self) -> ContextState {
        match self {
            AutoplayPolicy::Allowed => ContextState::Running,
            AutoplayPolicy::RequireGesture => ContextState::Suspended,
        }
    }

    /// Whether a resume from `activation` may proceed
    pub fn permits(&self, activation: Activation, activated: bool) -> bool {
        match self {
            AutoplayPolicy::Allowed => true,
            AutoplayPolicy::RequireGesture => activated || activation == Activation::UserGesture,
        }
    }
}

/// Parameters for a new context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextOptions {
    pub sample_rate: u32,
    pub latency_hint: LatencyHint,
}

/// A running (or suspended) audio context
///
/// Transitions may wait on a device thread, so they are async and must not
/// block the runtime.
#[async_trait]
pub trait AudioContextDriver: Send + Sync {
    fn state(&self) -> ContextState;

    /// Rate the context actually runs at
    fn sample_rate(&self) -> u32;

    /// Leave `suspended`; a refusal is [`GraphError::Resume`]
    async fn resume(&self, activation: Activation) -> Result<ContextState, GraphError>;

    async fn suspend(&self) -> Result<ContextState, GraphError>;

    /// Stop rendering and release the device; idempotent
    async fn close(&self) -> Result<(), GraphError>;
}

/// Context state plus sticky user activation, shared by the backends
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lifecycle {
    policy: AutoplayPolicy,
    state: ContextState,
    activated: bool,
}

impl Lifecycle {
    pub(crate) fn new(policy: AutoplayPolicy) -> Self {
        Self {
            policy,
            state: policy.initial_state(),
            activated: false,
        }
    }

    pub(crate) fn state(&self) -> ContextState {
        self.state
    }

    /// Validate a resume; the caller starts the device on `Ok(true)`
    pub(crate) fn begin_resume(&mut self, activation: Activation) -> Result<bool, GraphError> {
        match self.state {
            ContextState::Closed => Err(GraphError::Closed),
            ContextState::Running => {
                if activation == Activation::UserGesture {
                    self.activated = true;
                }
                Ok(false)
            }
            ContextState::Suspended => {
                if !self.policy.permits(activation, self.activated) {
                    return Err(GraphError::Resume(
                        "autoplay policy requires a user gesture".to_string(),
                    ));
                }
                if activation == Activation::UserGesture {
                    self.activated = true;
                }
                Ok(true)
            }
        }
    }

    pub(crate) fn set_state(&mut self, state: ContextState) {
        self.state = state;
    }
}

#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &'static str;

    /// Start a context that renders `graph`
    async fn create_context(
        &self,
        options: ContextOptions,
        graph: RenderGraph,
    ) -> Result<Box<dyn AudioContextDriver>, GraphError>;
}

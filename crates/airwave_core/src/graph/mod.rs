//! Shared Audio Graph
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Control plane (tokio)                  │
//! │  AudioGraphManager ──GraphCommand──▶ RenderGraph             │
//! │        │                                 ▲                   │
//! │        └── AudioBackend ── driver ───────┘ (owns / renders)  │
//! └──────────────────────────────────────────────────────────────┘
//!            decoded PCM ──rtrb──▶ SourceVoice (render thread)
//! ```

mod backend;
mod cpal_backend;
mod manager;
mod offline;
mod render;
mod source;

use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use airwave_dsp::Analyser;

use crate::message::AnalyserId;

pub use backend::{
    Activation, AudioBackend, AudioContextDriver, AutoplayPolicy, ContextOptions, ContextState,
};
pub use cpal_backend::CpalBackend;
pub use manager::AudioGraphManager;
pub use offline::{OfflineBackend, OfflineRenderer};
pub use render::{EqualizerSection, RenderGraph, MAX_QUANTUM_FRAMES};
pub use source::{SourceHandle, SourceNode, SourceVoice, SourceWriter};

/// Lifecycle of the shared graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    Uninitialized,
    Initializing,
    Running,
    Suspended,
    /// Terminal
    Closed,
    Error,
}

impl GraphState {
    /// A context exists and can accept sources
    pub fn is_live(&self) -> bool {
        matches!(self, GraphState::Running | GraphState::Suspended)
    }
}

impl From<ContextState> for GraphState {
    fn from(state: ContextState) -> Self {
        match state {
            ContextState::Running => GraphState::Running,
            ContextState::Suspended => GraphState::Suspended,
            ContextState::Closed => GraphState::Closed,
        }
    }
}

/// Snapshot of the graph for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStatus {
    pub state: GraphState,
    pub master_volume: f32,
    /// Equalizer bypassed (all bands at 0 dB)
    pub eq_bypassed: bool,
    pub sample_rate: Option<u32>,
    pub active_sources: usize,
    pub analysers: usize,
    pub last_error: Option<String>,
}

/// A registered analyser tap
#[derive(Clone)]
pub struct AnalyserHandle {
    id: AnalyserId,
    analyser: Arc<Analyser>,
}

impl AnalyserHandle {
    pub(crate) fn new(id: AnalyserId, analyser: Arc<Analyser>) -> Self {
        Self { id, analyser }
    }

    pub fn id(&self) -> AnalyserId {
        self.id
    }
}

impl Deref for AnalyserHandle {
    type Target = Analyser;

    fn deref(&self) -> &Analyser {
        &self.analyser
    }
}

impl std::fmt::Debug for AnalyserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyserHandle")
            .field("id", &self.id)
            .field("fft_size", &self.analyser.fft_size())
            .finish()
    }
}

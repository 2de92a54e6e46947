//! Message Types for Thread Communication
//!
//! Graph commands flow from the control plane -> render thread.
//! Session events flow from a stream session -> its subscribers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use airwave_dsp::{Analyser, BAND_COUNT};

use crate::error::StreamErrorKind;
use crate::graph::SourceVoice;
use crate::session::ConnectionState;

/// Identifies a source node wired into the render graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u64);

/// Identifies an analyser tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalyserId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

impl fmt::Display for AnalyserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "analyser#{}", self.0)
    }
}

/// Commands sent from the control plane to the render graph
///
/// Drained in FIFO order at the start of every render quantum, so a removal
/// queued before an addition always takes effect first.
pub enum GraphCommand {
    /// Wire a new source into the equalizer input
    AddSource(SourceVoice),

    /// Unwire a source and release its ring buffer
    RemoveSource(SourceId),

    /// Ramp the master gain to `gain` over `ramp_samples`
    SetMasterGain { gain: f32, ramp_samples: u32 },

    /// Set gain for a single equalizer band
    SetBandGain { band: usize, gain_db: f32 },

    /// Set all five band gains in the same quantum (presets)
    SetGains([f32; BAND_COUNT]),

    /// Enable/disable the equalizer (disabled = all bands glide to 0 dB)
    SetEqEnabled(bool),

    /// Tap the post-equalizer signal
    AddAnalyser(AnalyserId, Arc<Analyser>),

    RemoveAnalyser(AnalyserId),
}

impl fmt::Debug for GraphCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphCommand::AddSource(voice) => write!(f, "AddSource({})", voice.id()),
            GraphCommand::RemoveSource(id) => write!(f, "RemoveSource({id})"),
            GraphCommand::SetMasterGain { gain, ramp_samples } => {
                write!(f, "SetMasterGain({gain}, {ramp_samples})")
            }
            GraphCommand::SetBandGain { band, gain_db } => write!(f, "SetBandGain({band}, {gain_db})"),
            GraphCommand::SetGains(gains) => write!(f, "SetGains({gains:?})"),
            GraphCommand::SetEqEnabled(enabled) => write!(f, "SetEqEnabled({enabled})"),
            GraphCommand::AddAnalyser(id, _) => write!(f, "AddAnalyser({id})"),
            GraphCommand::RemoveAnalyser(id) => write!(f, "RemoveAnalyser({id})"),
        }
    }
}

/// Events published by a stream session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionEvent {
    /// Connection state changed
    StateChanged {
        state: ConnectionState,
        retry_count: u32,
    },

    /// A transient failure will be retried after `delay_ms`
    RetryScheduled { attempt: u32, delay_ms: u64 },

    /// Playback started on `url` (after resolution)
    Connected { url: String },

    /// Terminal failure, shown to the user
    Error {
        kind: StreamErrorKind,
        message: String,
    },

    /// A finite track played to the end
    Ended,
}

impl SessionEvent {
    /// Create an error event from a classified stream error
    pub fn error(err: &crate::error::StreamError) -> Self {
        SessionEvent::Error {
            kind: err.kind(),
            message: err.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::StateChanged {
            state: ConnectionState::Buffering,
            retry_count: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("StateChanged"));
        assert!(json.contains("\"buffering\""));

        let deserialized: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[test]
    fn test_error_event() {
        let event = SessionEvent::error(&StreamError::PlaybackPermission);
        if let SessionEvent::Error { kind, message } = event {
            assert_eq!(kind, StreamErrorKind::PlaybackPermission);
            assert_eq!(message, "Press play to start listening.");
        } else {
            panic!("Should be Error variant");
        }
    }

    #[test]
    fn test_command_debug_is_compact() {
        let cmd = GraphCommand::SetMasterGain {
            gain: 0.5,
            ramp_samples: 1440,
        };
        assert_eq!(format!("{cmd:?}"), "SetMasterGain(0.5, 1440)");
        assert_eq!(format!("{:?}", GraphCommand::RemoveSource(SourceId(3))), "RemoveSource(source#3)");
    }
}

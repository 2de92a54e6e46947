//! Graph, Session and Resolver Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How eagerly the output device should be driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyHint {
    /// Small buffers, for responsive controls
    Interactive,
    /// Larger buffers, for glitch resistance
    Playback,
}

impl LatencyHint {
    /// Device buffer size in frames requested for this hint
    pub fn buffer_frames(&self) -> u32 {
        match self {
            LatencyHint::Interactive => 256,
            LatencyHint::Playback => 1024,
        }
    }
}

/// Shared audio graph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Context sample rate in Hz
    pub sample_rate: u32,

    pub latency_hint: LatencyHint,

    /// Ramp length for master volume changes
    pub master_ramp_ms: u32,

    /// Fade-out before the context is closed
    pub teardown_ramp_ms: u32,

    /// Decoded audio buffered per source, in seconds at the source rate
    pub source_buffer_secs: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            latency_hint: LatencyHint::Interactive,
            master_ramp_ms: 30,
            teardown_ramp_ms: 50,
            source_buffer_secs: 2.0,
        }
    }
}

impl GraphConfig {
    /// Calculate output latency in milliseconds for this configuration
    pub fn latency_ms(&self) -> f32 {
        (self.latency_hint.buffer_frames() as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Samples per channel spanned by a ramp of `ms` milliseconds
    pub fn ramp_samples(&self, ms: u32) -> u32 {
        (self.sample_rate as u64 * ms as u64 / 1000) as u32
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        if self.master_ramp_ms > 1000 {
            return Err(format!("Master ramp too long: {}ms", self.master_ramp_ms));
        }
        if !(0.1..=30.0).contains(&self.source_buffer_secs) {
            return Err(format!("Invalid source buffer: {}s", self.source_buffer_secs));
        }
        Ok(())
    }
}

/// Stream session supervision policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Authoritative bound on `connecting`/`buffering`
    pub connect_timeout: Duration,

    /// First backoff delay; doubles on each retry
    pub retry_base_delay: Duration,

    /// Retries after the first attempt before giving up
    pub max_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(12),
            retry_base_delay: Duration::from_secs(2),
            max_retries: 3,
        }
    }
}

impl SessionConfig {
    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base...
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(5);
        self.retry_base_delay.saturating_mul(1u32 << exp)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be positive".to_string());
        }
        if self.max_retries > 10 {
            return Err(format!("Too many retries: {}", self.max_retries));
        }
        Ok(())
    }
}

/// Stream URL discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub request_timeout: Duration,

    /// Nested playlists followed before giving up
    pub max_playlist_depth: usize,

    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(8),
            max_playlist_depth: 5,
            user_agent: concat!("airwave/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.latency_hint, LatencyHint::Interactive);
        assert_eq!(config.master_ramp_ms, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_latency_calculation() {
        let config = GraphConfig::default();
        // 256 frames at 48kHz
        assert!((config.latency_ms() - 5.333).abs() < 0.01);
        assert_eq!(config.ramp_samples(30), 1440);
    }

    #[test]
    fn test_validation() {
        let invalid_rate = GraphConfig {
            sample_rate: 100,
            ..Default::default()
        };
        assert!(invalid_rate.validate().is_err());

        let invalid_buffer = GraphConfig {
            source_buffer_secs: 0.0,
            ..Default::default()
        };
        assert!(invalid_buffer.validate().is_err());

        let invalid_session = SessionConfig {
            connect_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid_session.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let config = SessionConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(config.connect_timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_config_serialization() {
        let config = GraphConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"interactive\""));
        let deserialized: GraphConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.sample_rate, deserialized.sample_rate);
    }
}

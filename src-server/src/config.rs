//! Command-line configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use airwave_core::{GraphConfig, LatencyHint, ResolverConfig, SessionConfig};

/// Which audio backend drives the shared graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Default output device
    Cpal,
    /// No device; audio is rendered only on demand (headless hosts, CI)
    Offline,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "airwave", version, about = "Radio stream proxy and player daemon")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "AIRWAVE_LISTEN", default_value = "127.0.0.1:7878")]
    pub listen: SocketAddr,

    /// Station/track catalog (JSON)
    #[arg(long, env = "AIRWAVE_CATALOG", default_value = "catalog.json")]
    pub catalog: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendKind::Cpal)]
    pub backend: BackendKind,

    /// Settings file; defaults to the platform config dir
    #[arg(long, env = "AIRWAVE_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Do not write settings back to disk
    #[arg(long)]
    pub no_persist: bool,

    #[arg(long, default_value_t = 48000)]
    pub sample_rate: u32,

    /// Use larger device buffers
    #[arg(long)]
    pub playback_latency: bool,

    /// Seconds a stream may take to become playable
    #[arg(long, default_value_t = 12)]
    pub connect_timeout: u64,

    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Start the station that was playing when the daemon last stopped
    #[arg(long)]
    pub resume_last: bool,

    /// Seconds open connections get to finish after shutdown starts
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace: u64,
}

impl Args {
    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            sample_rate: self.sample_rate,
            latency_hint: if self.playback_latency {
                LatencyHint::Playback
            } else {
                LatencyHint::Interactive
            },
            ..Default::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            max_retries: self.max_retries,
            ..Default::default()
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::default()
    }

    /// Check every derived config before anything is started
    pub fn validate(&self) -> Result<(), String> {
        self.graph_config().validate()?;
        self.session_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["airwave"]);
        assert_eq!(args.listen, "127.0.0.1:7878".parse().unwrap());
        assert_eq!(args.backend, BackendKind::Cpal);
        assert_eq!(args.session_config().connect_timeout, Duration::from_secs(12));
        assert_eq!(args.graph_config().latency_hint, LatencyHint::Interactive);
        assert!(!args.resume_last);
        assert_eq!(args.shutdown_grace(), Duration::from_secs(5));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from([
            "airwave",
            "--backend",
            "offline",
            "--playback-latency",
            "--max-retries",
            "1",
            "--sample-rate",
            "100",
        ]);
        assert_eq!(args.backend, BackendKind::Offline);
        assert_eq!(args.session_config().max_retries, 1);
        assert_eq!(args.graph_config().latency_hint, LatencyHint::Playback);
        assert!(args.validate().is_err());
    }
}

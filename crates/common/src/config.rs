//! Application configuration.
//!
//! The loaded [`AppConfig`] is read once at startup and its parts are passed
//! by value into the components that need them; nothing in the engine reads
//! configuration from ambient state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ReelkitError, ReelkitResult};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Encoding resources: threads, memory budget, remote servers.
    #[serde(default)]
    pub encoding: EncodingConfig,

    /// Defaults applied to newly created projects.
    #[serde(default)]
    pub defaults: ProjectDefaults,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Encode worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Local encode threads (at least one).
    pub threads: usize,

    /// Frames kept in memory per thread; scales both the encoder's in-flight
    /// bound and the preview read-ahead.
    pub frames_in_memory_multiplier: usize,

    /// Remote encode servers (`host` or `host:port`).
    pub servers: Vec<String>,

    /// Base TCP port; encode and status ports are derived from it.
    pub server_port_base: u16,

    /// Per-frame timeout for remote encodes.
    pub remote_timeout_ms: u64,

    /// Consecutive failures after which a server is deprioritized.
    pub remote_failure_limit: u32,

    /// Pause before each attempt on a deprioritized server.
    pub deprioritized_backoff_ms: u64,
}

/// Per-project defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectDefaults {
    /// Output video frame rate.
    pub video_frame_rate: u32,

    /// Output audio sample rate.
    pub audio_sample_rate: u32,

    /// Output audio channels.
    pub audio_channels: usize,

    /// Picture bit rate in bits per second.
    pub j2k_bandwidth: u64,

    /// Reel size budget for length-based splitting, in bytes.
    pub reel_length_bytes: u64,

    /// Output picture size.
    pub width: u32,
    pub height: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reelkit_player=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// TCP ports derived from a base port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPorts {
    pub encode: u16,
    pub status: u16,
}

impl ServerPorts {
    pub fn from_base(base: u16) -> Self {
        Self {
            encode: base,
            status: base.saturating_add(2),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            encoding: EncodingConfig::default(),
            defaults: ProjectDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            frames_in_memory_multiplier: 3,
            servers: vec![],
            server_port_base: 6192,
            remote_timeout_ms: 30_000,
            remote_failure_limit: 3,
            deprioritized_backoff_ms: 10_000,
        }
    }
}

impl Default for ProjectDefaults {
    fn default() -> Self {
        Self {
            video_frame_rate: 24,
            audio_sample_rate: 48_000,
            audio_channels: 6,
            j2k_bandwidth: 150_000_000,
            reel_length_bytes: 2_000_000_000,
            width: 1998,
            height: 1080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl EncodingConfig {
    /// Upper bound on encode jobs submitted but not yet handed back.
    pub fn max_in_flight(&self) -> usize {
        (self.threads.max(1) * self.frames_in_memory_multiplier.max(1)).max(1)
    }

    pub fn ports(&self) -> ServerPorts {
        ServerPorts::from_base(self.server_port_base)
    }

    pub fn validate(&self) -> ReelkitResult<()> {
        // Remote failures fall back to local threads, so at least one must exist.
        if self.threads == 0 {
            return Err(ReelkitError::config(
                "At least one local encode thread is required",
            ));
        }
        if self.frames_in_memory_multiplier == 0 {
            return Err(ReelkitError::config(
                "frames_in_memory_multiplier must be at least 1",
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("reelkit").join("config.json")
}

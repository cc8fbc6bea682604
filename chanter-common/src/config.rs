//! Configuration loading
//!
//! All tunable timings of the streaming core live here. Every field has a
//! default matching production behavior, so an empty (or missing) TOML file
//! yields a fully usable configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Streaming session tuning
    #[serde(default)]
    pub stream: StreamSettings,

    /// Idle-channel teardown tuning
    #[serde(default)]
    pub idle: IdleSettings,
}

/// Tuning for one streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Decoder binary invoked to turn a source URL into raw PCM
    #[serde(default = "default_decoder_bin")]
    pub decoder_bin: String,

    /// Target encoder bitrate in bits per second
    #[serde(default = "default_bitrate_bps")]
    pub bitrate_bps: u32,

    /// How long to wait for the transport sink to become ready
    #[serde(default = "default_ready_wait_secs")]
    pub ready_wait_secs: u64,

    /// Maximum time between decoder reads before the read is abandoned
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Send timeout on the outbound frame channel; frames are dropped past it
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Delay before the health-check loop starts polling
    #[serde(default = "default_health_grace_secs")]
    pub health_grace_secs: u64,

    /// Health-check polling interval
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// No frames produced for longer than this counts as a stall
    #[serde(default = "default_stall_secs")]
    pub stall_secs: u64,

    /// Restart budget per session; the session stops once the counter hits it
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Fixed delay applied before each restart attempt
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
}

/// Tuning for the idle-channel monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleSettings {
    /// A channel with no user activity for this long is torn down
    #[serde(default = "default_idle_timeout_secs")]
    pub timeout_secs: u64,

    /// How often the monitor scans tracked channels
    #[serde(default = "default_idle_scan_secs")]
    pub scan_interval_secs: u64,
}

fn default_decoder_bin() -> String {
    "ffmpeg".to_string()
}
fn default_bitrate_bps() -> u32 {
    128_000
}
fn default_ready_wait_secs() -> u64 {
    10
}
fn default_read_timeout_secs() -> u64 {
    15
}
fn default_send_timeout_ms() -> u64 {
    100
}
fn default_health_grace_secs() -> u64 {
    5
}
fn default_health_interval_secs() -> u64 {
    5
}
fn default_stall_secs() -> u64 {
    20
}
fn default_max_restarts() -> u32 {
    3
}
fn default_restart_delay_secs() -> u64 {
    2
}
fn default_idle_timeout_secs() -> u64 {
    300
}
fn default_idle_scan_secs() -> u64 {
    30
}

impl Default for StreamSettings {
    fn default() -> Self {
        toml::from_str("").expect("empty stream settings must deserialize")
    }
}

impl Default for IdleSettings {
    fn default() -> Self {
        toml::from_str("").expect("empty idle settings must deserialize")
    }
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// A missing file is not an error: defaults are returned so a host can
    /// run without any configuration on disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

impl StreamSettings {
    pub fn ready_wait(&self) -> Duration {
        Duration::from_secs(self.ready_wait_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn health_grace(&self) -> Duration {
        Duration::from_secs(self.health_grace_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

impl IdleSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

//! Channel configuration
//!
//! Defaults match the remote side's expectations; a TOML file can override
//! any field and `TETHER_*` environment variables override the file.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tether_network::DEFAULT_MAX_FRAME_LEN;
use tether_state::Markers;
use thiserror::Error;

pub const DEFAULT_TERMINATED_NOTICE: &str = "Application terminated\nClose browser tab.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Delay before the first reconnect attempt after a drop
    pub reconnect_delay_ms: u64,
    /// Delay between failed reconnect attempts
    pub retry_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Diff marker dialect used by the remote encoder
    pub markers: Markers,
    /// Largest frame accepted from or sent to the transport
    pub max_frame_len: usize,
    /// Text handed to the default action when the channel is gone for good
    pub terminated_notice: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1000,
            retry_delay_ms: 5000,
            max_reconnect_attempts: 10,
            markers: Markers::Underscore,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            terminated_notice: DEFAULT_TERMINATED_NOTICE.to_string(),
        }
    }
}

impl ChannelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load `path` if given, falling back to defaults on any error
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let mut config = match path {
            Some(path) => Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("config load failed, using defaults: {e}");
                Self::default()
            }),
            None => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `TETHER_*` overrides read through `lookup`; unparsable values are ignored
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TETHER_RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.reconnect_delay_ms = v;
        }
        if let Some(v) = lookup("TETHER_RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.retry_delay_ms = v;
        }
        if let Some(v) = lookup("TETHER_MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.max_reconnect_attempts = v;
        }
        match lookup("TETHER_MARKERS").as_deref() {
            Some("underscore") => self.markers = Markers::Underscore,
            Some("dollar") => self.markers = Markers::Dollar,
            _ => {}
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

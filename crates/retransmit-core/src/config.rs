//! Configuration for retransmit.
//!
//! Resolution order: command-line flags → environment variables → config
//! file → defaults. Flags are applied by the binary; everything else lives
//! here.
//!
//! Config file location:
//!   1. $RETRANSMIT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/retransmit/config.toml
//!   3. ~/.config/retransmit/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::wire::MAX_PAYLOAD;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetransmitConfig {
    pub link: LinkConfig,
    pub send: SendConfig,
    pub recv: RecvConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Deadline for every dial, frame read and frame write.
    pub timeout_secs: u64,
    /// Pause between failed connection attempts.
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    /// Payload bytes per frame.
    pub frame_size: usize,
    /// Frames read ahead of the connection loop.
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecvConfig {
    /// Payload chunks buffered ahead of the output writer.
    pub delivery_depth: usize,
    /// How long to keep re-acknowledging after the stream completed.
    /// Unset means three timeouts plus one backoff pause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linger_ms: Option<u64>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            backoff_ms: 1000,
        }
    }
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            frame_size: 64 * 1024,
            queue_depth: 16,
        }
    }
}

impl Default for RecvConfig {
    fn default() -> Self {
        Self {
            delivery_depth: 16,
            linger_ms: None,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("retransmit")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RetransmitConfig {
    /// Load config from the default location: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load config from `path` (defaults if it does not exist), then apply
    /// environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            RetransmitConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RETRANSMIT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config to `path` if nothing is there yet.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&RetransmitConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Reject settings the engines cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.timeout_secs == 0 {
            return Err(ConfigError::Invalid("link.timeout_secs", "must be > 0".into()));
        }
        if self.send.frame_size == 0 || self.send.frame_size > MAX_PAYLOAD {
            return Err(ConfigError::Invalid(
                "send.frame_size",
                format!("must be in 1..={MAX_PAYLOAD}, got {}", self.send.frame_size),
            ));
        }
        if self.send.queue_depth == 0 {
            return Err(ConfigError::Invalid("send.queue_depth", "must be > 0".into()));
        }
        if self.recv.delivery_depth == 0 {
            return Err(ConfigError::Invalid("recv.delivery_depth", "must be > 0".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.link.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.link.backoff_ms)
    }

    /// Long enough for a sender that lost the final ack to time out on it,
    /// back off, redial and resend.
    pub fn linger(&self) -> Duration {
        match self.recv.linger_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.timeout() * 3 + self.backoff(),
        }
    }

    /// Apply RETRANSMIT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Unparseable values are ignored, leaving the file/default value.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let num = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = num("RETRANSMIT_LINK__TIMEOUT_SECS") {
            self.link.timeout_secs = v;
        }
        if let Some(v) = num("RETRANSMIT_LINK__BACKOFF_MS") {
            self.link.backoff_ms = v;
        }
        if let Some(v) = num("RETRANSMIT_SEND__FRAME_SIZE") {
            self.send.frame_size = v as usize;
        }
        if let Some(v) = num("RETRANSMIT_SEND__QUEUE_DEPTH") {
            self.send.queue_depth = v as usize;
        }
        if let Some(v) = num("RETRANSMIT_RECV__DELIVERY_DEPTH") {
            self.recv.delivery_depth = v as usize;
        }
        if let Some(v) = num("RETRANSMIT_RECV__LINGER_MS") {
            self.recv.linger_ms = Some(v);
        }
    }
}

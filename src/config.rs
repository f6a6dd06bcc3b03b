//! Runtime settings, optionally loaded from a TOML file.
//!
//! The file is optional: a missing file yields `Settings::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::DEFAULT_USER_AGENT;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in settings file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings file exceeds maximum allowed size.
    #[error("Settings file too large: {0}")]
    TooLarge(String),

    /// A value is out of its allowed range.
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

// ============================================================================
// Settings
// ============================================================================

/// Process-wide configuration values.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the per-user `*.json` feed configurations.
    pub feeds_dir: PathBuf,

    /// Size of the shared fetch worker budget.
    pub max_concurrent_fetches: usize,

    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,

    /// Added to connect + read timeout to form the result poll deadline.
    pub poll_slack_ms: u64,

    pub max_redirects: usize,
    pub max_feed_bytes: usize,

    /// Quiet window before filesystem changes trigger a rescan.
    pub rescan_quiet_secs: u64,

    /// Conditional-GET window for clients of the combined feed, in hours.
    pub client_cache_hours: u64,

    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feeds_dir: PathBuf::from("conf"),
            max_concurrent_fetches: default_pool_size(),
            connect_timeout_ms: 4000,
            read_timeout_ms: 4000,
            poll_slack_ms: 500,
            max_redirects: 3,
            max_feed_bytes: 10 * 1024 * 1024, // 10MB
            rescan_quiet_secs: 10,
            client_cache_hours: 3,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Twice the available parallelism.
fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_mul(2)
}

impl Settings {
    /// Maximum settings file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "feeds_dir",
        "max_concurrent_fetches",
        "connect_timeout_ms",
        "read_timeout_ms",
        "poll_slack_ms",
        "max_redirects",
        "max_feed_bytes",
        "rescan_quiet_secs",
        "client_cache_hours",
        "user_agent",
    ];

    /// Load settings from a TOML file.
    ///
    /// - Missing file → `Ok(Settings::default())`
    /// - Empty file → `Ok(Settings::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Zero pool size or quiet window → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Settings file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Settings file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let settings = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds_dir = %settings.feeds_dir.display(),
            pool = settings.max_concurrent_fetches,
            "Loaded settings"
        );
        Ok(settings)
    }

    /// Parse settings from TOML text. Blank text yields defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in settings file, ignoring");
                }
            }
        }

        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        if self.rescan_quiet_secs == 0 {
            return Err(ConfigError::Invalid(
                "rescan_quiet_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// How long a consumer waits for the next completed fetch before
    /// treating the remaining ones as stalled.
    pub fn poll_deadline(&self) -> Duration {
        Duration::from_millis(
            self.connect_timeout_ms
                .saturating_add(self.read_timeout_ms)
                .saturating_add(self.poll_slack_ms),
        )
    }

    pub fn rescan_quiet(&self) -> Duration {
        Duration::from_secs(self.rescan_quiet_secs)
    }

    pub fn client_cache(&self) -> Duration {
        Duration::from_secs(self.client_cache_hours.saturating_mul(3600))
    }
}

// ============================================================================
// Tests
// ============================================================================

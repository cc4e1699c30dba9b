//! Configuration structures.
//!
//! Configuration is fixed when the watchdog starts. It can come from a JSON
//! file, from environment overrides, or (most commonly) from the command
//! line flags the daemonizer passes to the `serve` subcommand.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{Error, Result};
use crate::validation::validate_positive;

/// Environment override for the arm period, in milliseconds.
pub const PERIOD_ENV: &str = "WATCHDOG_PERIOD_MS";

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Watchdog behaviour.
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load a JSON config file. Missing sections fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply environment overrides on top of the loaded values.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(PERIOD_ENV) {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("{PERIOD_ENV} is not a number: {raw:?}")))?;
            self.watchdog.period = Duration::from_millis(ms);
        }
        Ok(self)
    }
}

/// What the read loop does once every writer has closed the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelClosePolicy {
    /// Stop reading and let the deadline run out. Nobody can arm anymore,
    /// so the watchdog trips within two periods.
    #[default]
    Silence,
    /// Treat closure as an implicit `quit`.
    Quit,
}

impl ChannelClosePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelClosePolicy::Silence => "silence",
            ChannelClosePolicy::Quit => "quit",
        }
    }
}

/// Watchdog configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Arm period. The owner must arm at least once per period.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Size of a single channel read.
    pub read_buffer_bytes: usize,

    /// Process exit status used when the watchdog trips.
    pub trip_exit_code: i32,

    /// Behaviour when the channel is closed by the owner.
    #[serde(default)]
    pub on_channel_closed: ChannelClosePolicy,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(1000),
            read_buffer_bytes: 128,
            trip_exit_code: 32,
            on_channel_closed: ChannelClosePolicy::Silence,
        }
    }
}

impl WatchdogConfig {
    /// Config with the given period and defaults for everything else.
    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_positive(self.period.as_millis() as u64, "period")?;
        validate_positive(self.read_buffer_bytes as u64, "read_buffer_bytes")?;
        Ok(())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable JSON log formatting.
    #[serde(default)]
    pub json_logs: bool,

    /// Append logs to this file instead of stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

//! Configuration file support for ditty
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/ditty/config.toml`
//! - macOS: `~/Library/Application Support/ditty/config.toml`
//! - Windows: `%APPDATA%\ditty\config.toml`

use crate::error::{Error, Result};
use crate::events::DEFAULT_LOOP_LENGTH;
use crate::timing::validate_bpm;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default fraction of a window's span available for emitting its events.
pub const DEFAULT_DEADLINE_FRACTION: f64 = 0.9;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Window scheduler settings
    pub scheduler: SchedulerConfig,
    /// Loop registry settings
    pub loops: LoopsConfig,
    /// Window clock settings for the live runtime
    pub transport: TransportConfig,
}

/// What happens to an event that is due in the current window but could
/// not be emitted before the window's deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Discard the event. A trigger is lost under overload.
    #[default]
    Drop,
    /// Put the event back on the deferred queue; the next window emits it late.
    Requeue,
}

/// Window scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Share of the window duration, on the scheduler clock, after which
    /// emission of new events stops.
    pub deadline_fraction: f64,
    /// Policy for events that miss the deadline
    pub overrun: OverrunPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deadline_fraction: DEFAULT_DEADLINE_FRACTION,
            overrun: OverrunPolicy::Drop,
        }
    }
}

/// Loop registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopsConfig {
    /// Loop length (beats) used when a loop does not specify one
    pub default_length: f64,
}

impl Default for LoopsConfig {
    fn default() -> Self {
        Self {
            default_length: DEFAULT_LOOP_LENGTH,
        }
    }
}

/// Live runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Tempo in beats per minute
    pub bpm: f64,
    /// Wall-clock span of one window, also the driver's polling interval
    #[serde(with = "humantime_duration")]
    pub tick: Duration,
    /// How far ahead of real time windows are scheduled
    #[serde(with = "humantime_duration")]
    pub lookahead: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            tick: Duration::from_millis(25),
            lookahead: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load and validate configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let fraction = self.scheduler.deadline_fraction;
        if !(fraction.is_finite() && fraction > 0.0 && fraction <= 1.0) {
            return Err(Error::Config(format!(
                "scheduler.deadline_fraction must be in (0, 1], got {fraction}"
            )));
        }
        let length = self.loops.default_length;
        if !(length.is_finite() && length > 0.0) {
            return Err(Error::Config(format!(
                "loops.default_length must be > 0, got {length}"
            )));
        }
        validate_bpm(self.transport.bpm)?;
        if self.transport.tick.is_zero() {
            return Err(Error::Config("transport.tick must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "ditty") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::write_default_config_file(&path)?;
        Ok(path)
    }

    /// Write the commented default config to `path`
    pub fn write_default_config_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG)?;
        Ok(())
    }
}

const DEFAULT_CONFIG: &str = r#"# ditty configuration file

[scheduler]
# Share of each window's duration available for emitting its events.
# Events still unsent when it runs out are handled by `overrun`.
deadline_fraction = 0.9

# "drop" discards late events, "requeue" sends them with the next window
overrun = "drop"

[loops]
# Loop length in beats when a loop does not set one
default_length = 8

[transport]
# Tempo in beats per minute (1 to 999)
bpm = 120

# Wall-clock span of one scheduling window
tick = "25ms"

# How far ahead of real time events are produced
lookahead = "100ms"
"#;

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

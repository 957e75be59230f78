//! Configuration file support for medrem.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medrem/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub reminders: ReminderConfig,

    #[serde(default)]
    pub adherence: AdherenceConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Reminder and sweep timing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How many minutes before a dose the reminder becomes due
    #[serde(default = "default_advance_minutes")]
    pub advance_minutes: i64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_upcoming_window_minutes")]
    pub upcoming_window_minutes: i64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            advance_minutes: default_advance_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            upcoming_window_minutes: default_upcoming_window_minutes(),
        }
    }
}

/// Adherence thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdherenceConfig {
    #[serde(default = "default_on_time_window_minutes")]
    pub on_time_window_minutes: i64,

    #[serde(default = "default_high_adherence_percent")]
    pub high_adherence_percent: f64,
}

impl Default for AdherenceConfig {
    fn default() -> Self {
        Self {
            on_time_window_minutes: default_on_time_window_minutes(),
            high_adherence_percent: default_high_adherence_percent(),
        }
    }
}

/// Schedule generation parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Horizon used for medicines without a course duration
    #[serde(default = "default_open_ended_days")]
    pub open_ended_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            open_ended_days: default_open_ended_days(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local/share")
    });
    base.join("medrem")
}

fn default_true() -> bool {
    true
}

fn default_advance_minutes() -> i64 {
    15
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_upcoming_window_minutes() -> i64 {
    240
}

fn default_on_time_window_minutes() -> i64 {
    5
}

fn default_high_adherence_percent() -> f64 {
    90.0
}

fn default_open_ended_days() -> u32 {
    365
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".config")
        });
        base.join("medrem").join("config.toml")
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.reminders.advance_minutes < 0 {
            return Err(Error::Config("reminders.advance_minutes must be >= 0".into()));
        }
        if self.reminders.sweep_interval_secs == 0 {
            return Err(Error::Config("reminders.sweep_interval_secs must be > 0".into()));
        }
        if self.adherence.on_time_window_minutes < 0 {
            return Err(Error::Config(
                "adherence.on_time_window_minutes must be >= 0".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.adherence.high_adherence_percent) {
            return Err(Error::Config(
                "adherence.high_adherence_percent must be within 0..=100".into(),
            ));
        }
        if self.schedule.open_ended_days == 0 {
            return Err(Error::Config("schedule.open_ended_days must be > 0".into()));
        }
        Ok(())
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

//! Store configuration
//!
//! Every value the lifecycle, feedback and learning components consume is
//! passed in explicitly through [`StoreConfig`]; nothing is read from globals.

use crate::error::{StoreError, StoreResult};
use anyhow::Context;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the signal lifecycle and feedback-learning store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Directory holding one JSON file per collection
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum number of signals kept in the current collection
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Maximum number of history entries, oldest dropped first
    #[serde(default = "default_max_history_items")]
    pub max_history_items: usize,

    /// Maximum number of lessons, oldest dropped first
    #[serde(default = "default_max_lessons")]
    pub max_lessons: usize,

    /// Minimum confidence a generator must enforce before calling save.
    /// The store does not re-check it.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Upper bound for a signal's duration; longer candidates are clamped
    #[serde(default = "default_max_duration_minutes")]
    pub max_duration_minutes: u32,

    /// Duration assumed for signals that do not declare one
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: u32,

    /// How long after its window ends a signal survives a cleanup pass
    #[serde(default = "default_grace_minutes")]
    pub active_signal_grace_minutes: u32,

    /// Cleanup never shrinks the current collection below this many signals
    #[serde(default = "default_cleanup_floor")]
    pub cleanup_floor: usize,

    /// Run cleanup after every N successful saves (0 disables)
    #[serde(default = "default_cleanup_every_saves")]
    pub cleanup_every_saves: u32,

    #[serde(default = "default_feedback_enabled")]
    pub feedback_enabled: bool,

    /// IANA zone used for every time comparison
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            capacity: default_capacity(),
            max_history_items: default_max_history_items(),
            max_lessons: default_max_lessons(),
            min_confidence: default_min_confidence(),
            max_duration_minutes: default_max_duration_minutes(),
            default_duration_minutes: default_duration_minutes(),
            active_signal_grace_minutes: default_grace_minutes(),
            cleanup_floor: default_cleanup_floor(),
            cleanup_every_saves: default_cleanup_every_saves(),
            feedback_enabled: default_feedback_enabled(),
            timezone: default_timezone(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_capacity() -> usize {
    3
}

fn default_max_history_items() -> usize {
    100
}

fn default_max_lessons() -> usize {
    1000
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_max_duration_minutes() -> u32 {
    5
}

fn default_duration_minutes() -> u32 {
    2
}

fn default_grace_minutes() -> u32 {
    5
}

fn default_cleanup_floor() -> usize {
    1
}

fn default_cleanup_every_saves() -> u32 {
    10
}

fn default_feedback_enabled() -> bool {
    true
}

fn default_timezone() -> String {
    "Europe/Kyiv".to_string()
}

impl StoreConfig {
    /// Parsed timezone
    pub fn tz(&self) -> StoreResult<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            StoreError::InvalidConfig(format!("unknown timezone '{}': {}", self.timezone, e))
        })
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.capacity == 0 {
            return Err(StoreError::InvalidConfig("capacity must be at least 1".to_string()));
        }
        if self.max_history_items == 0 {
            return Err(StoreError::InvalidConfig(
                "max_history_items must be at least 1".to_string(),
            ));
        }
        if self.max_duration_minutes == 0 {
            return Err(StoreError::InvalidConfig(
                "max_duration_minutes must be at least 1".to_string(),
            ));
        }
        if self.default_duration_minutes == 0
            || self.default_duration_minutes > self.max_duration_minutes
        {
            return Err(StoreError::InvalidConfig(format!(
                "default_duration_minutes must be in 1..={}",
                self.max_duration_minutes
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(StoreError::InvalidConfig(
                "min_confidence must be within [0, 1]".to_string(),
            ));
        }
        self.tz()?;
        Ok(())
    }
}

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<StoreConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: StoreConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to a TOML file
pub fn save_config(config: &StoreConfig, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path.as_ref(), content)
        .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
    Ok(())
}

/// Write a commented configuration template
pub fn create_config_template(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let template = "# Signal store configuration

# Directory with signals.json, history.json, feedback.json and lessons.json
data_dir = \"data\"

# Maximum signals kept in the current collection
capacity = 3

# History entries kept, oldest dropped first
max_history_items = 100

# Lessons kept, oldest dropped first
max_lessons = 1000

# Enforced by the generator before saving, not by the store
min_confidence = 0.7

# Signal duration bounds (minutes)
max_duration_minutes = 5
default_duration_minutes = 2

# Cleanup keeps expired signals this long after their window ends
active_signal_grace_minutes = 5

# Cleanup never leaves fewer signals than this
cleanup_floor = 1

# Run cleanup after every N saves (0 disables)
cleanup_every_saves = 10

feedback_enabled = true

timezone = \"Europe/Kyiv\"
";

    std::fs::write(path.as_ref(), template)
        .with_context(|| format!("Failed to write config template: {}", path.as_ref().display()))?;
    Ok(())
}

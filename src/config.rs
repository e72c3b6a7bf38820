// Engine configuration - RON file with defaults for every field

use crate::error::EngineError;
use crate::pattern::trigger::{MAX_SEQUENCE_LENGTH, MIN_SEQUENCE_LENGTH};
use crate::scheduler::queue::SchedulerSettings;
use crate::timing::Ticks;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] EngineError),
}

/// Keys of the input keyboard reserved for live controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveControls {
    pub enabled: bool,
    /// Flips the direction of newly triggered patterns (A0)
    pub direction_key: u8,
    /// Sequence length + 1 (C7)
    pub length_up_key: u8,
    /// Sequence length - 1 (B6)
    pub length_down_key: u8,
}

impl Default for LiveControls {
    fn default() -> Self {
        Self {
            enabled: true,
            direction_key: 21,
            length_up_key: 96,
            length_down_key: 95,
        }
    }
}

impl LiveControls {
    pub fn is_control(&self, pitch: u8) -> bool {
        self.enabled
            && (pitch == self.direction_key
                || pitch == self.length_up_key
                || pitch == self.length_down_key)
    }
}

/// Echo latency measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub enabled: bool,
    pub window_ms: u32,
    pub history: usize,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_ms: 500,
            history: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ticks_per_second: u32,
    pub tolerance: f64,
    pub sequence_length: usize,
    pub anticipation_ms: u32,
    pub poll_interval_ms: u32,
    pub slot_count: usize,
    pub event_capacity: usize,
    pub pitch_min: u8,
    pub pitch_max: u8,
    pub channel: u8,
    pub queue_capacity: usize,
    pub controls: LiveControls,
    pub response: ResponseConfig,
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 1000,
            tolerance: 0.90,
            sequence_length: 4,
            anticipation_ms: 125,
            poll_interval_ms: 10,
            slot_count: 256,
            event_capacity: 2048,
            pitch_min: 21,
            pitch_max: 96,
            channel: 0,
            queue_capacity: 512,
            controls: LiveControls::default(),
            response: ResponseConfig::default(),
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    /// Per-user config file (`~/.config/tumbler/config.ron` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tumbler").join("config.ron"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: EngineConfig = ron::from_str(&text)?;
        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load `path`, or the per-user file if it exists, or the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::Configuration(msg));

        if self.ticks_per_second == 0 {
            return invalid("ticks_per_second must be positive".to_string());
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return invalid(format!("tolerance must be in (0, 1), got {}", self.tolerance));
        }
        if !(MIN_SEQUENCE_LENGTH..=MAX_SEQUENCE_LENGTH).contains(&self.sequence_length) {
            return invalid(format!(
                "sequence_length must be in {}..={}, got {}",
                MIN_SEQUENCE_LENGTH, MAX_SEQUENCE_LENGTH, self.sequence_length
            ));
        }
        if self.pitch_min > self.pitch_max || self.pitch_max > 127 {
            return invalid(format!(
                "invalid pitch range {}..={}",
                self.pitch_min, self.pitch_max
            ));
        }
        if self.channel > 15 {
            return invalid(format!("MIDI channel must be 0..=15, got {}", self.channel));
        }
        if self.slot_count == 0 || self.event_capacity == 0 || self.queue_capacity == 0 {
            return invalid("slot, event and queue capacities must be positive".to_string());
        }
        if self.response.history == 0 {
            return invalid("response history must be positive".to_string());
        }
        Ok(())
    }

    /// Convert a duration in milliseconds to scheduler ticks
    pub fn ms_to_ticks(&self, ms: u32) -> Ticks {
        ms as Ticks * self.ticks_per_second as Ticks / 1000
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            anticipation: self.ms_to_ticks(self.anticipation_ms),
            poll_interval: self.ms_to_ticks(self.poll_interval_ms),
            pitch_min: self.pitch_min as i32,
            pitch_max: self.pitch_max as i32,
            channel: self.channel,
            capacity: self.event_capacity,
        }
    }
}

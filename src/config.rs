//! Settings
//!
//! Plugin-wide settings shared by every rack: the default sample rate and
//! whether new modules start with the dark panel. Settings are plain serde
//! types stored as JSON.

use crate::expander::PanelTheme;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Current settings schema version
pub const SETTINGS_VERSION: u32 = 1;

/// Error type for loading and saving settings
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Reading or writing the settings file failed
    Io(String),
    /// The settings text is not valid
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Settings I/O failed: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Invalid settings: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Plugin-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Schema version for forward compatibility
    pub version: u32,

    /// Sample rate of racks created from these settings
    pub sample_rate: f64,

    /// New modules start with the dark panel
    pub dark_as_default: bool,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_dark_as_default(mut self, dark: bool) -> Self {
        self.dark_as_default = dark;
        self
    }

    /// Panel theme of newly created modules
    pub fn default_theme(&self) -> PanelTheme {
        PanelTheme::from_dark(self.dark_as_default)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Deserialize from JSON string; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if !(settings.sample_rate.is_finite() && settings.sample_rate > 0.0) {
            return Err(ConfigError::Parse(format!(
                "sample rate must be positive, got {}",
                settings.sample_rate
            )));
        }
        Ok(settings)
    }

    /// Load settings from a file, falling back to defaults when it does not
    /// exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let settings = Self::from_json(&text)?;
        info!(
            path = %path.display(),
            dark_as_default = settings.dark_as_default,
            "settings loaded"
        );
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|e| ConfigError::Io(e.to_string()))?;
        info!(path = %path.display(), "settings saved");
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            sample_rate: 44100.0,
            dark_as_default: false,
        }
    }
}

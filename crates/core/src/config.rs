//! Engine configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Values can be overridden from `REDLINE_*` environment
//! variables.

use crate::annotation::Color;
use redline_scheduler::RetryPolicy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_multiplier(self.multiplier)
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

/// Draft write batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftSettings {
    /// Quiet period after the last change before writing
    pub debounce_ms: u64,
    /// Longest a dirty draft may wait under continuous changes
    pub max_debounce_ms: u64,
    /// Draft directory for the file-backed store; platform default when unset
    pub directory: Option<PathBuf>,
}

impl Default for DraftSettings {
    fn default() -> Self {
        Self { debounce_ms: 1_500, max_debounce_ms: 10_000, directory: None }
    }
}

impl DraftSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_debounce(&self) -> Duration {
        Duration::from_millis(self.max_debounce_ms.max(self.debounce_ms))
    }
}

/// Initial tool settings, in overlay pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolDefaults {
    #[serde(serialize_with = "color_to_hex", deserialize_with = "color_from_hex")]
    pub color: Color,
    pub thickness_px: f32,
    pub font_size_px: f32,
    /// Width of a newly placed stamp; height follows the image aspect ratio
    pub stamp_width_px: f32,
}

impl Default for ToolDefaults {
    fn default() -> Self {
        Self { color: Color::RED, thickness_px: 2.0, font_size_px: 16.0, stamp_width_px: 150.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeSettings {
    /// Bake raster pixels per PDF point
    pub raster_scale: f32,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self { raster_scale: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Review backend base URL, e.g. `https://reviews.example.com/api`
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self { base_url: None, timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetrySettings,
    pub draft: DraftSettings,
    pub tools: ToolDefaults,
    pub bake: BakeSettings,
    pub transport: TransportSettings,
    /// Extra slack around hit boxes, in overlay pixels
    pub hit_tolerance_px: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            draft: DraftSettings::default(),
            tools: ToolDefaults::default(),
            bake: BakeSettings::default(),
            transport: TransportSettings::default(),
            hit_tolerance_px: 4.0,
        }
    }
}

impl EngineConfig {
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_draft_debounce(mut self, debounce: Duration, max_debounce: Duration) -> Self {
        self.draft.debounce_ms = debounce.as_millis() as u64;
        self.draft.max_debounce_ms = max_debounce.as_millis() as u64;
        self
    }

    pub fn with_draft_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.draft.directory = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_raster_scale(mut self, scale: f32) -> Self {
        self.bake.raster_scale = scale;
        self
    }

    pub fn with_tool_color(mut self, color: Color) -> Self {
        self.tools.color = color;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.transport.base_url = Some(url.into());
        self
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// ```toml
    /// hit_tolerance_px = 4.0
    ///
    /// [retry]
    /// max_attempts = 3
    /// initial_delay_ms = 500
    ///
    /// [tools]
    /// color = "#ff0000"
    /// stamp_width_px = 150.0
    ///
    /// [bake]
    /// raster_scale = 2.0
    /// ```
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Defaults overridden by environment variables.
    ///
    /// - `REDLINE_RETRY_MAX_ATTEMPTS`
    /// - `REDLINE_RETRY_INITIAL_DELAY_MS`
    /// - `REDLINE_DRAFT_DEBOUNCE_MS`
    /// - `REDLINE_DRAFT_DIR`
    /// - `REDLINE_TOOL_COLOR` (`#rrggbb` or `#rrggbbaa`)
    /// - `REDLINE_BAKE_RASTER_SCALE`
    /// - `REDLINE_BASE_URL`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Apply `REDLINE_*` overrides on top of `self`
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_parse("REDLINE_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = value;
        }
        if let Some(value) = env_parse("REDLINE_RETRY_INITIAL_DELAY_MS")? {
            self.retry.initial_delay_ms = value;
        }
        if let Some(value) = env_parse("REDLINE_DRAFT_DEBOUNCE_MS")? {
            self.draft.debounce_ms = value;
        }
        if let Ok(value) = std::env::var("REDLINE_DRAFT_DIR") {
            self.draft.directory = Some(PathBuf::from(value));
        }
        if let Some(value) = env_parse("REDLINE_TOOL_COLOR")? {
            self.tools.color = value;
        }
        if let Some(value) = env_parse("REDLINE_BAKE_RASTER_SCALE")? {
            self.bake.raster_scale = value;
        }
        if let Ok(value) = std::env::var("REDLINE_BASE_URL") {
            self.transport.base_url = Some(value);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("retry.max_attempts".to_string()));
        }
        if !(self.bake.raster_scale > 0.0 && self.bake.raster_scale <= 16.0) {
            return Err(ConfigError::InvalidValue("bake.raster_scale".to_string()));
        }
        let tools = &self.tools;
        if !(tools.thickness_px > 0.0 && tools.font_size_px > 0.0 && tools.stamp_width_px > 0.0) {
            return Err(ConfigError::InvalidValue("tools".to_string()));
        }
        if self.hit_tolerance_px < 0.0 {
            return Err(ConfigError::InvalidValue("hit_tolerance_px".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

fn color_to_hex<S: Serializer>(color: &Color, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!(
        "#{:02x}{:02x}{:02x}{:02x}",
        color.r, color.g, color.b, color.a
    ))
}

fn color_from_hex<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Color, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

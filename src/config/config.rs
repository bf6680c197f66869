use crate::error::ConfigError;
use crate::events::ModuleTag;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest scheduler interval accepted; shorter positive values are clamped up
pub const MIN_INTERVAL_MS: u64 = 1_000;

/// Longest accepted alert lifetime (30 days)
pub const MAX_ALERT_TTL_MS: u64 = 30 * 24 * 3_600_000;

/// Top-level engine configuration
///
/// Every field has a default, so a partial TOML file (or none at all) yields
/// a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Whether the observer scheduler runs after initialization
    pub enabled: bool,
    /// Period between analysis cycles in milliseconds
    pub interval_ms: u64,
    /// Module tags tracked by the engine
    pub modules: Vec<ModuleTag>,
    pub buffer: BufferConfig,
    pub ai: AIConfig,
    pub alerts: AlertConfig,
    pub logging: LoggingConfig,
}

/// Observation buffer limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Buffer length that triggers trimming
    pub max_size: usize,
    /// Length kept after trimming (most recent entries)
    pub trim_to: usize,
    /// Number of most recent observations sampled per analysis cycle
    pub sample_size: usize,
}

/// Reasoning collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AIConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upper bound on a single collaborator call
    pub timeout_ms: u64,
    pub backend: AIBackendConfig,
}

/// Which reasoning backend to talk to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AIBackendConfig {
    Ollama {
        endpoint: String,
    },
    OpenAI {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
    },
    Mock,
}

/// Alert retention settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    /// Lifetime of a new alert in milliseconds
    pub ttl_ms: u64,
    pub max_active: usize,
    pub max_recent_insights: usize,
}

/// Operational log limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log length that triggers eviction
    pub max_entries: usize,
    /// Entries kept after eviction (most recent)
    pub retain_entries: usize,
}

/// Partial configuration merged over an existing one
///
/// Used both for the overrides passed to `initialize` and for runtime
/// `update_config` calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfigUpdate {
    pub enabled: Option<bool>,
    pub interval_ms: Option<u64>,
    pub modules: Option<Vec<ModuleTag>>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            modules: ModuleTag::ALL.to_vec(),
            buffer: BufferConfig::default(),
            ai: AIConfig::default(),
            alerts: AlertConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            trim_to: 500,
            sample_size: 50,
        }
    }
}

impl Default for AIConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 1000,
            timeout_ms: 10_000,
            backend: AIBackendConfig::Mock,
        }
    }
}

impl AlertConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.ttl_ms.min(MAX_ALERT_TTL_MS) as i64)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 3_600_000,
            max_active: 50,
            max_recent_insights: 20,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            retain_entries: 5_000,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, a TOML
    /// error if it does not parse, and `ValidationError` for out-of-range values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants and normalize clampable values in place
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.interval_ms = normalize_interval(self.interval_ms)?;

        if self.modules.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one module must be tracked".to_string(),
            ));
        }
        self.modules.sort();
        self.modules.dedup();

        if self.buffer.trim_to == 0 || self.buffer.trim_to > self.buffer.max_size {
            return Err(ConfigError::ValidationError(format!(
                "buffer.trim_to must be in 1..={} (got {})",
                self.buffer.max_size, self.buffer.trim_to
            )));
        }
        if self.buffer.sample_size == 0 {
            return Err(ConfigError::ValidationError(
                "buffer.sample_size must be positive".to_string(),
            ));
        }
        if self.logging.retain_entries > self.logging.max_entries {
            return Err(ConfigError::ValidationError(format!(
                "logging.retain_entries ({}) exceeds logging.max_entries ({})",
                self.logging.retain_entries, self.logging.max_entries
            )));
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "ai.temperature must be in 0..=2 (got {})",
                self.ai.temperature
            )));
        }
        if self.alerts.ttl_ms == 0 || self.alerts.ttl_ms > MAX_ALERT_TTL_MS {
            return Err(ConfigError::ValidationError(format!(
                "alerts.ttl_ms must be in 1..={} (got {})",
                MAX_ALERT_TTL_MS, self.alerts.ttl_ms
            )));
        }
        if self.alerts.max_active == 0 {
            return Err(ConfigError::ValidationError(
                "alerts.max_active must be positive".to_string(),
            ));
        }
        if self.ai.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "ai.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge a partial update over this configuration
    ///
    /// The result is validated before it replaces `self`; on error `self` is
    /// left untouched.
    pub fn merge(&mut self, update: &ConfigUpdate) -> Result<(), ConfigError> {
        let mut merged = self.clone();
        if let Some(enabled) = update.enabled {
            merged.enabled = enabled;
        }
        if let Some(interval_ms) = update.interval_ms {
            merged.interval_ms = interval_ms;
        }
        if let Some(ref modules) = update.modules {
            merged.modules = modules.clone();
        }
        if let Some(ref model) = update.model {
            merged.ai.model = model.clone();
        }
        if let Some(temperature) = update.temperature {
            merged.ai.temperature = temperature;
        }
        if let Some(max_tokens) = update.max_tokens {
            merged.ai.max_tokens = max_tokens;
        }
        if let Some(timeout_ms) = update.timeout_ms {
            merged.ai.timeout_ms = timeout_ms;
        }
        merged.validate()?;
        *self = merged;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.ai.timeout_ms)
    }
}

/// Reject a zero interval and clamp short ones up to `MIN_INTERVAL_MS`
fn normalize_interval(interval_ms: u64) -> Result<u64, ConfigError> {
    if interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "interval_ms must be positive".to_string(),
        ));
    }
    if interval_ms < MIN_INTERVAL_MS {
        warn!(
            "interval_ms {} is below the minimum, clamping to {}",
            interval_ms, MIN_INTERVAL_MS
        );
        return Ok(MIN_INTERVAL_MS);
    }
    Ok(interval_ms)
}

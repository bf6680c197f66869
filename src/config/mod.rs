/// Engine configuration, defaults and partial updates
#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    AIBackendConfig, AIConfig, AlertConfig, BufferConfig, Config, ConfigUpdate, LoggingConfig,
    MAX_ALERT_TTL_MS, MIN_INTERVAL_MS,
};

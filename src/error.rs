use thiserror::Error;

/// Errors that can occur while talking to the reasoning backend
///
/// These never escape an analysis cycle: the insight generator catches them
/// at the boundary and degrades to zero insights.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Backend communication failed: {0}")]
    BackendError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors raised by external collaborators (event bus, logger) when forwarding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    #[error("No subscribers for {0}")]
    NoSubscribers(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the inbound channel router
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Unknown inbound channel: {0}")]
    UnknownChannel(String),
}

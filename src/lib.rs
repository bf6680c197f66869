/// Error types for the situational-awareness engine
pub mod error;

/// Core data model: observations, insights, alerts and state
pub mod events;

/// Configuration management
pub mod config;

/// Observation buffer, module health and status derivation
pub mod aggregator;

/// Insight generation and reasoning backends
pub mod ai;

/// Alert escalation and tactical suggestions
pub mod alerts;

/// Outbound notifications and collaborator ports
pub mod bus;

/// Inbound channel routing into the engine
pub mod inbound;

/// Bounded operational log
pub mod log_sink;

/// Single-flight analysis scheduling
pub mod scheduler;

/// Engine facade and lifecycle
pub mod core;

// Re-export commonly used types
#[doc(hidden)]
pub use serde_json;
pub use crate::core::SituationalAwareness;
pub use config::{Config, ConfigUpdate};
pub use error::{AnalysisError, ConfigError, ForwardError, RouteError};

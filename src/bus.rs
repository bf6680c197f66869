//! Outbound notifications and the collaborator ports they travel through
//!
//! The engine publishes lifecycle and analysis notifications to an event bus
//! and mirrors every operational log entry to an external logger. Both are
//! best-effort: a failing collaborator returns a `ForwardError`, which callers
//! swallow.

use crate::error::ForwardError;
use crate::events::{
    Alert, Insight, LogEntry, LogLevel, ModuleTag, OverallStatus, Payload, Timestamp,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Notification published by the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum Notification {
    #[serde(rename = "situational-awareness:initialized")]
    Initialized { timestamp: Timestamp },

    #[serde(rename = "situational-awareness:context-collected")]
    ContextCollected {
        source: ModuleTag,
        timestamp: Timestamp,
    },

    #[serde(
        rename = "situational-awareness:analysis-complete",
        rename_all = "camelCase"
    )]
    AnalysisComplete {
        timestamp: Timestamp,
        insights: Vec<Insight>,
        alerts: Vec<Alert>,
        overall_status: OverallStatus,
    },

    #[serde(rename = "situational-awareness:log")]
    Log { entry: LogEntry },

    #[serde(rename = "situational-awareness:cleanup")]
    Cleanup { timestamp: Timestamp },
}

impl Notification {
    /// Topic name the notification is published under
    pub fn topic(&self) -> &'static str {
        match self {
            Notification::Initialized { .. } => "situational-awareness:initialized",
            Notification::ContextCollected { .. } => "situational-awareness:context-collected",
            Notification::AnalysisComplete { .. } => "situational-awareness:analysis-complete",
            Notification::Log { .. } => "situational-awareness:log",
            Notification::Cleanup { .. } => "situational-awareness:cleanup",
        }
    }
}

/// Port to the event-bus collaborator
#[cfg_attr(test, mockall::automock)]
pub trait EventBus: Send + Sync {
    fn publish(&self, notification: &Notification) -> Result<(), ForwardError>;
}

/// Port to the external leveled logger collaborator
#[cfg_attr(test, mockall::automock)]
pub trait ExternalLogger: Send + Sync {
    fn write(&self, level: LogLevel, message: &str, context: &Payload) -> Result<(), ForwardError>;
}

/// In-process event bus backed by a tokio broadcast channel
///
/// Slow subscribers lag and lose the oldest notifications rather than
/// applying backpressure to the engine.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, notification: &Notification) -> Result<(), ForwardError> {
        self.sender
            .send(notification.clone())
            .map(|_| ())
            .map_err(|_| ForwardError::NoSubscribers(notification.topic().to_string()))
    }
}

/// Event bus that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBus;

impl EventBus for NullBus {
    fn publish(&self, _notification: &Notification) -> Result<(), ForwardError> {
        Ok(())
    }
}

/// External logger that writes through the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacadeLogger;

const OPLOG_TARGET: &str = "sitaware::oplog";

impl ExternalLogger for LogFacadeLogger {
    fn write(&self, level: LogLevel, message: &str, context: &Payload) -> Result<(), ForwardError> {
        let facade_level = match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        };
        if !log::log_enabled!(target: OPLOG_TARGET, facade_level) {
            return Err(ForwardError::Unavailable(format!(
                "{} disabled at {:?}",
                OPLOG_TARGET, facade_level
            )));
        }

        let context = if context.is_empty() {
            String::new()
        } else {
            serde_json::to_string(context).unwrap_or_default()
        };
        match level {
            LogLevel::Debug => debug!(target: OPLOG_TARGET, "{} {}", message, context),
            LogLevel::Info => info!(target: OPLOG_TARGET, "{} {}", message, context),
            LogLevel::Warn => warn!(target: OPLOG_TARGET, "{} {}", message, context),
            LogLevel::Error => error!(target: OPLOG_TARGET, "{} {}", message, context),
        }
        Ok(())
    }
}

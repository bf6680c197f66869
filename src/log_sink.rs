//! Bounded operational log
//!
//! Every entry is kept in memory for `getLogs` style queries and mirrored to
//! the external logger and the event bus. Forwarding never fails the caller.

use crate::bus::{EventBus, ExternalLogger, LogFacadeLogger, Notification};
use crate::config::LoggingConfig;
use crate::events::{LogCategory, LogEntry, LogLevel, Payload};
use chrono::Utc;
use log::trace;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub struct LogSink {
    entries: Mutex<VecDeque<LogEntry>>,
    max_entries: usize,
    retain_entries: usize,
    counter: AtomicU64,
    logger: Arc<dyn ExternalLogger>,
    bus: Arc<dyn EventBus>,
}

impl LogSink {
    pub fn new(config: &LoggingConfig, bus: Arc<dyn EventBus>) -> Self {
        Self::with_logger(config, Arc::new(LogFacadeLogger), bus)
    }

    pub fn with_logger(
        config: &LoggingConfig,
        logger: Arc<dyn ExternalLogger>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let max_entries = config.max_entries.max(1);
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries,
            retain_entries: config.retain_entries.min(max_entries),
            counter: AtomicU64::new(0),
            logger,
            bus,
        }
    }

    /// Record an entry and forward it
    ///
    /// When the log grows past `max_entries` it is cut back to the most
    /// recent `retain_entries`.
    pub fn log(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
        context: Payload,
    ) -> LogEntry {
        let timestamp = Utc::now();
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let entry = LogEntry {
            id: format!("log-{}-{}", timestamp.timestamp_millis(), sequence),
            timestamp,
            level,
            category,
            message: message.into(),
            context,
        };

        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.push_back(entry.clone());
            if entries.len() > self.max_entries {
                let excess = entries.len() - self.retain_entries;
                entries.drain(..excess);
            }
        }

        if let Err(e) = self.logger.write(level, &entry.message, &entry.context) {
            trace!("External logger rejected entry {}: {}", entry.id, e);
        }
        if let Err(e) = self.bus.publish(&Notification::Log {
            entry: entry.clone(),
        }) {
            trace!("Log notification for {} not delivered: {}", entry.id, e);
        }

        entry
    }

    pub fn debug(&self, category: LogCategory, message: impl Into<String>, context: Payload) {
        self.log(LogLevel::Debug, category, message, context);
    }

    pub fn info(&self, category: LogCategory, message: impl Into<String>, context: Payload) {
        self.log(LogLevel::Info, category, message, context);
    }

    pub fn warn(&self, category: LogCategory, message: impl Into<String>, context: Payload) {
        self.log(LogLevel::Warn, category, message, context);
    }

    pub fn error(&self, category: LogCategory, message: impl Into<String>, context: Payload) {
        self.log(LogLevel::Error, category, message, context);
    }

    /// Most recent entries, oldest first, at most `limit` of them
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Build a log context from key/value pairs
#[macro_export]
macro_rules! log_context {
    () => {
        $crate::events::Payload::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut context = $crate::events::Payload::new();
        $(context.insert($key.to_string(), $crate::serde_json::json!($value));)+
        context
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MockEventBus, MockExternalLogger, NullBus};
    use crate::error::ForwardError;

    fn config(max_entries: usize, retain_entries: usize) -> LoggingConfig {
        LoggingConfig {
            max_entries,
            retain_entries,
        }
    }

    fn sink(max_entries: usize, retain_entries: usize) -> LogSink {
        let mut logger = MockExternalLogger::new();
        logger.expect_write().returning(|_, _, _| Ok(()));
        LogSink::with_logger(
            &config(max_entries, retain_entries),
            Arc::new(logger),
            Arc::new(NullBus),
        )
    }

    #[test]
    fn test_log_records_entry() {
        let sink = sink(10, 5);
        let entry = sink.log(
            LogLevel::Info,
            LogCategory::Analysis,
            "Analysis complete",
            log_context!("insights" => 2),
        );

        assert!(entry.id.starts_with("log-"));
        assert_eq!(entry.context["insights"], serde_json::json!(2));

        let recent = sink.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0], entry);
    }

    #[test]
    fn test_ids_are_unique_within_a_millisecond() {
        let sink = sink(100, 50);
        let a = sink.log(LogLevel::Debug, LogCategory::Alert, "a", Payload::new());
        let b = sink.log(LogLevel::Debug, LogCategory::Alert, "b", Payload::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_overflow_retains_most_recent() {
        let sink = sink(10_000, 5_000);
        for i in 0..10_001 {
            sink.log(
                LogLevel::Debug,
                LogCategory::DataCollection,
                format!("entry {}", i),
                Payload::new(),
            );
        }

        assert_eq!(sink.len(), 5_000);
        let recent = sink.recent(usize::MAX);
        assert_eq!(recent.first().unwrap().message, "entry 5001");
        assert_eq!(recent.last().unwrap().message, "entry 10000");
    }

    #[test]
    fn test_recent_limit_returns_tail() {
        let sink = sink(100, 50);
        for i in 0..5 {
            sink.info(LogCategory::Decision, format!("entry {}", i), Payload::new());
        }
        let messages: Vec<String> = sink.recent(2).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 3", "entry 4"]);
        assert!(sink.recent(0).is_empty());
    }

    #[test]
    fn test_forwarding_failures_are_swallowed() {
        let mut logger = MockExternalLogger::new();
        logger
            .expect_write()
            .times(1)
            .returning(|_, _, _| Err(ForwardError::Unavailable("down".to_string())));
        let mut bus = MockEventBus::new();
        bus.expect_publish()
            .times(1)
            .returning(|_| Err(ForwardError::NoSubscribers("log".to_string())));

        let sink = LogSink::with_logger(&config(10, 5), Arc::new(logger), Arc::new(bus));
        sink.error(LogCategory::Analysis, "still recorded", Payload::new());

        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_entries_are_forwarded_to_logger_and_bus() {
        let mut logger = MockExternalLogger::new();
        logger
            .expect_write()
            .withf(|level, message, _| {
                *level == LogLevel::Warn && message.to_string() == "dropped"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut bus = MockEventBus::new();
        bus.expect_publish()
            .withf(|n| matches!(n, Notification::Log { entry } if entry.message == "dropped"))
            .times(1)
            .returning(|_| Ok(()));

        let sink = LogSink::with_logger(&config(10, 5), Arc::new(logger), Arc::new(bus));
        sink.warn(LogCategory::DataCollection, "dropped", Payload::new());
    }

    #[test]
    fn test_clear_empties_log() {
        let sink = sink(10, 5);
        sink.info(LogCategory::Alert, "x", Payload::new());
        sink.clear();
        assert!(sink.is_empty());
    }
}

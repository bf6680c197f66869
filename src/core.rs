//! The situational-awareness engine
//!
//! `SituationalAwareness` is the explicit context object hosts construct once
//! and share. It owns the observation buffer, the aggregate state and the
//! operational log, drives analysis cycles through the scheduler and exposes
//! the lifecycle operations operator tooling calls.

use crate::aggregator::{classify_payload, derive_overall_status, system_health, ContextBuffer};
use crate::ai::backends::ReasoningBackend;
use crate::ai::{GeneratorSettings, InsightGenerator};
use crate::alerts::{tactical_suggestions, AlertManager};
use crate::bus::{EventBus, ExternalLogger, LogFacadeLogger, Notification};
use crate::config::{Config, ConfigUpdate};
use crate::error::ConfigError;
use crate::events::{
    ChannelTag, LogCategory, LogEntry, ModuleState, ModuleTag, Observation, ObservationMetadata,
    Payload, SituationalState, TacticalDecision, Timestamp,
};
use crate::inbound::ContextSink;
use crate::log_context;
use crate::log_sink::LogSink;
use crate::scheduler::{AnalysisCycle, CycleToken, ObserverScheduler};
use chrono::Utc;
use log::{debug, trace};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Entries returned by `get_logs` when the caller has no preference
pub const DEFAULT_LOG_LIMIT: usize = 100;

struct EngineState {
    buffer: ContextBuffer,
    situation: SituationalState,
}

impl EngineState {
    fn initial(config: &Config) -> Self {
        Self {
            buffer: ContextBuffer::new(config.buffer.max_size, config.buffer.trim_to),
            situation: SituationalState::initial(&config.modules),
        }
    }
}

/// Shared between the facade and the cycles the scheduler spawns
struct Inner {
    config: Mutex<Config>,
    state: Mutex<EngineState>,
    log: Arc<LogSink>,
    generator: InsightGenerator,
    bus: Arc<dyn EventBus>,
    initialized: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Refresh the derived fields of the aggregate
fn recompute(situation: &mut SituationalState, now: Timestamp) {
    situation.overall_status = derive_overall_status(&situation.modules, &situation.active_alerts);
    situation.system_health = system_health(&situation.modules);
    situation.timestamp = now;
}

impl Inner {
    fn publish(&self, notification: Notification) {
        if let Err(e) = self.bus.publish(&notification) {
            trace!("Notification {} not delivered: {}", notification.topic(), e);
        }
    }

    fn config(&self) -> Config {
        lock(&self.config).clone()
    }

    fn collect_context(
        &self,
        source: ModuleTag,
        origin_channel: ChannelTag,
        payload: Payload,
        metadata: Option<ObservationMetadata>,
    ) {
        let tracked = lock(&self.config).modules.contains(&source);
        if !tracked {
            self.log.warn(
                LogCategory::DataCollection,
                format!("Ignoring observation from untracked module {}", source),
                log_context!("source" => source),
            );
            return;
        }

        let now = Utc::now();
        let status = classify_payload(&payload);
        let evicted = {
            let mut state = lock(&self.state);
            let evicted = state.buffer.push(Observation {
                source,
                origin_channel,
                timestamp: now,
                payload: payload.clone(),
                metadata,
            });
            state.situation.modules.insert(
                source,
                ModuleState {
                    status,
                    last_update: now,
                    metrics: payload,
                },
            );
            recompute(&mut state.situation, now);
            evicted
        };

        self.log.debug(
            LogCategory::DataCollection,
            format!("Context collected from {}", source),
            log_context!(
                "source" => source,
                "channel" => origin_channel,
                "status" => status,
                "evicted" => evicted,
            ),
        );
        self.publish(Notification::ContextCollected {
            source,
            timestamp: now,
        });
    }

    /// Sample, reason, escalate and commit one cycle
    async fn analysis_cycle(&self, token: CycleToken) {
        let (settings, alert_manager, max_recent_insights) = {
            let config = lock(&self.config);
            (
                GeneratorSettings::from_config(&config),
                AlertManager::new(&config.alerts),
                config.alerts.max_recent_insights,
            )
        };
        let sample = lock(&self.state).buffer.recent(settings.sample_size);

        let insights = self.generator.generate(&sample, &settings).await;

        if !token.is_current() || !self.initialized.load(Ordering::SeqCst) {
            self.log.info(
                LogCategory::Analysis,
                "Discarding results of a cancelled analysis cycle",
                log_context!("insights" => insights.len()),
            );
            return;
        }

        let now = Utc::now();
        let new_alerts = alert_manager.escalate(&insights, now);
        let overall_status = {
            let mut state = lock(&self.state);
            let situation = &mut state.situation;

            let mut recent = insights.clone();
            recent.append(&mut situation.recent_insights);
            recent.truncate(max_recent_insights);
            situation.recent_insights = recent;

            situation.active_alerts =
                alert_manager.retain(new_alerts.clone(), &situation.active_alerts, now);
            recompute(situation, now);
            situation.overall_status
        };

        for alert in &new_alerts {
            self.log.warn(
                LogCategory::Alert,
                format!("Alert raised: {}", alert.title),
                log_context!("alertId" => &alert.id, "severity" => alert.severity),
            );
            if !alert.recommended_actions.is_empty() {
                self.log.info(
                    LogCategory::Decision,
                    format!(
                        "{} tactical decisions recommended for {}",
                        alert.recommended_actions.len(),
                        alert.id
                    ),
                    log_context!("alertId" => &alert.id),
                );
            }
        }

        self.log.info(
            LogCategory::Analysis,
            "Analysis cycle complete",
            log_context!(
                "observations" => sample.len(),
                "insights" => insights.len(),
                "alerts" => new_alerts.len(),
                "overallStatus" => overall_status,
            ),
        );
        self.publish(Notification::AnalysisComplete {
            timestamp: now,
            insights,
            alerts: new_alerts,
            overall_status,
        });
    }
}

impl AnalysisCycle for Inner {
    fn run_cycle(&self, token: CycleToken) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.analysis_cycle(token))
    }
}

/// Situational-awareness engine
///
/// Lifecycle operations (`initialize`, `update_config`, `stop`, `cleanup`)
/// are serialized through the scheduler lock. Ingestion and reads only touch
/// the state lock and never wait on an analysis cycle.
pub struct SituationalAwareness {
    inner: Arc<Inner>,
    scheduler: Mutex<ObserverScheduler>,
}

impl SituationalAwareness {
    /// Build an engine that mirrors its operational log through the `log` facade
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `config` is invalid.
    pub fn new(
        config: Config,
        backend: Arc<dyn ReasoningBackend>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self, ConfigError> {
        Self::with_logger(config, backend, bus, Arc::new(LogFacadeLogger))
    }

    pub fn with_logger(
        mut config: Config,
        backend: Arc<dyn ReasoningBackend>,
        bus: Arc<dyn EventBus>,
        logger: Arc<dyn ExternalLogger>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let log = Arc::new(LogSink::with_logger(
            &config.logging,
            logger,
            Arc::clone(&bus),
        ));
        let scheduler = ObserverScheduler::new(config.interval());

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(EngineState::initial(&config)),
                config: Mutex::new(config),
                generator: InsightGenerator::new(backend, Arc::clone(&log)),
                log,
                bus,
                initialized: AtomicBool::new(false),
            }),
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Apply `update` over the current configuration and start observing
    ///
    /// Calling this again while initialized logs a warning and changes
    /// nothing. The scheduler is started only if the merged configuration is
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the merged configuration is
    /// invalid; the engine stays uninitialized.
    pub fn initialize(&self, update: Option<ConfigUpdate>) -> Result<(), ConfigError> {
        let mut scheduler = lock(&self.scheduler);

        if self.inner.initialized.load(Ordering::SeqCst) {
            self.inner.log.warn(
                LogCategory::Analysis,
                "Situational awareness already initialized",
                Payload::new(),
            );
            return Ok(());
        }

        let config = {
            let mut config = lock(&self.inner.config);
            if let Some(update) = update {
                config.merge(&update)?;
            }
            config.clone()
        };

        *lock(&self.inner.state) = EngineState::initial(&config);
        self.inner.initialized.store(true, Ordering::SeqCst);

        self.inner.log.info(
            LogCategory::Analysis,
            "Situational awareness initialized",
            log_context!(
                "modules" => &config.modules,
                "intervalMs" => config.interval_ms,
                "enabled" => config.enabled,
            ),
        );
        self.inner.publish(Notification::Initialized {
            timestamp: Utc::now(),
        });

        if config.enabled {
            scheduler.set_interval(config.interval());
            scheduler.start(Arc::clone(&self.inner) as Arc<dyn AnalysisCycle>);
        }
        Ok(())
    }

    /// Ingest one observation; never fails
    pub fn collect_context(
        &self,
        source: ModuleTag,
        origin_channel: ChannelTag,
        payload: Payload,
        metadata: Option<ObservationMetadata>,
    ) {
        self.inner
            .collect_context(source, origin_channel, payload, metadata);
    }

    /// Snapshot of the aggregate state
    pub fn get_current_state(&self) -> SituationalState {
        lock(&self.inner.state).situation.clone()
    }

    /// Most recent operational log entries, oldest first
    pub fn get_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.inner.log.recent(limit)
    }

    /// Decisions across active alerts, highest priority first
    pub fn get_tactical_suggestions(&self) -> Vec<TacticalDecision> {
        let state = lock(&self.inner.state);
        tactical_suggestions(&state.situation.active_alerts, Utc::now())
    }

    /// Run one analysis cycle now, outside the schedule
    ///
    /// Shares the scheduler's single-flight slot: returns `false` without
    /// running if a cycle is already in flight. Results are committed only
    /// while the engine is initialized.
    pub async fn run_analysis_cycle(&self) -> bool {
        let Some(_guard) = lock(&self.scheduler).try_claim() else {
            debug!("Analysis cycle already in flight, skipping manual run");
            return false;
        };
        self.inner.analysis_cycle(CycleToken::detached()).await;
        true
    }

    /// Stop scheduling cycles; an in-flight cycle's results are discarded
    pub fn stop(&self) {
        lock(&self.scheduler).stop();
        debug!("Situational awareness scheduler stopped");
    }

    /// Merge a partial configuration update
    ///
    /// A running scheduler is restarted with the new interval, or left
    /// stopped if the update disables the engine.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the merged configuration is
    /// invalid; nothing is changed in that case.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<(), ConfigError> {
        let mut scheduler = lock(&self.scheduler);

        let config = {
            let mut config = lock(&self.inner.config);
            config.merge(&update)?;
            config.clone()
        };

        if update.modules.is_some() {
            let mut state = lock(&self.inner.state);
            let now = Utc::now();
            let dropped = state.buffer.retain_modules(&config.modules);
            if dropped > 0 {
                debug!("Dropped {} buffered observations from untracked modules", dropped);
            }
            let situation = &mut state.situation;
            situation
                .modules
                .retain(|tag, _| config.modules.contains(tag));
            for tag in &config.modules {
                situation
                    .modules
                    .entry(*tag)
                    .or_insert_with(|| ModuleState::unknown(now));
            }
            recompute(situation, now);
        }

        self.inner.log.info(
            LogCategory::Analysis,
            "Configuration updated",
            log_context!("intervalMs" => config.interval_ms, "enabled" => config.enabled),
        );

        scheduler.set_interval(config.interval());
        if scheduler.is_running() {
            scheduler.stop();
            if config.enabled {
                scheduler.start(Arc::clone(&self.inner) as Arc<dyn AnalysisCycle>);
            }
        }
        Ok(())
    }

    /// Stop, clear the buffer, state and logs, and return to uninitialized
    pub fn cleanup(&self) {
        let mut scheduler = lock(&self.scheduler);
        scheduler.stop();

        self.inner.log.info(
            LogCategory::Analysis,
            "Situational awareness cleaned up",
            Payload::new(),
        );

        let config = self.inner.config();
        *lock(&self.inner.state) = EngineState::initial(&config);
        self.inner.log.clear();
        self.inner.initialized.store(false, Ordering::SeqCst);

        self.inner.publish(Notification::Cleanup {
            timestamp: Utc::now(),
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.scheduler).is_running()
    }

    pub fn config(&self) -> Config {
        self.inner.config()
    }

    /// Observations currently buffered
    pub fn buffered_observations(&self) -> usize {
        lock(&self.inner.state).buffer.len()
    }
}

impl ContextSink for SituationalAwareness {
    fn collect_context(
        &self,
        source: ModuleTag,
        origin_channel: ChannelTag,
        payload: Payload,
        metadata: Option<ObservationMetadata>,
    ) {
        self.inner
            .collect_context(source, origin_channel, payload, metadata);
    }
}

impl Drop for SituationalAwareness {
    fn drop(&mut self) {
        lock(&self.scheduler).stop();
    }
}

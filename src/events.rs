//! Core data model for the situational-awareness engine
//!
//! This module defines the fundamental data structures that flow through the
//! pipeline: observations ingested from subsystems, per-module health, insights
//! produced by analysis cycles, alerts with ranked tactical decisions, the
//! aggregate situational state, and operational log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Free-form JSON object carried by observations, module metrics and log context
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Identifier for one tracked subsystem
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ModuleTag {
    Navigation,
    Weather,
    Systems,
    Crew,
    Sensors,
    Mission,
}

impl ModuleTag {
    /// Every module tag known to the engine, in a stable order
    pub const ALL: [ModuleTag; 6] = [
        ModuleTag::Navigation,
        ModuleTag::Weather,
        ModuleTag::Systems,
        ModuleTag::Crew,
        ModuleTag::Sensors,
        ModuleTag::Mission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleTag::Navigation => "navigation",
            ModuleTag::Weather => "weather",
            ModuleTag::Systems => "systems",
            ModuleTag::Crew => "crew",
            ModuleTag::Sensors => "sensors",
            ModuleTag::Mission => "mission",
        }
    }
}

impl fmt::Display for ModuleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "navigation" => Ok(ModuleTag::Navigation),
            "weather" => Ok(ModuleTag::Weather),
            "systems" | "system" => Ok(ModuleTag::Systems),
            "crew" => Ok(ModuleTag::Crew),
            "sensors" | "sensor" => Ok(ModuleTag::Sensors),
            "mission" => Ok(ModuleTag::Mission),
            other => Err(format!("unknown module tag '{}'", other)),
        }
    }
}

/// Channel an observation arrived through
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelTag {
    /// Delivered by the in-process event bus
    Internal,
    /// Pushed directly by an outside producer
    External,
}

/// Optional quality annotations attached to an observation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObservationMetadata {
    /// Data quality in 0..1
    pub quality: Option<f64>,
    /// Delivery latency in milliseconds
    #[serde(alias = "latency_ms")]
    pub latency_ms: Option<f64>,
    /// Source reliability in 0..1
    pub reliability: Option<f64>,
}

/// A single timestamped payload ingested from one source module
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub source: ModuleTag,
    pub origin_channel: ChannelTag,
    pub timestamp: Timestamp,
    pub payload: Payload,
    pub metadata: Option<ObservationMetadata>,
}

/// Health classification of one module
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Healthy,
    Degraded,
    Failed,
    Unknown,
}

/// Latest known state of one module
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleState {
    pub status: ModuleStatus,
    pub last_update: Timestamp,
    pub metrics: Payload,
}

impl ModuleState {
    /// State of a module nothing has been heard from yet
    pub fn unknown(now: Timestamp) -> Self {
        Self {
            status: ModuleStatus::Unknown,
            last_update: now,
            metrics: Payload::new(),
        }
    }
}

/// Category of finding produced by an analysis cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Opportunity,
    Risk,
    Optimization,
    Alert,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Opportunity => "opportunity",
            InsightKind::Risk => "risk",
            InsightKind::Optimization => "optimization",
            InsightKind::Alert => "alert",
        }
    }

    /// Parse a kind reported by the reasoning backend
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "opportunity" => Some(InsightKind::Opportunity),
            "risk" => Some(InsightKind::Risk),
            "optimization" => Some(InsightKind::Optimization),
            "alert" => Some(InsightKind::Alert),
            _ => None,
        }
    }
}

/// Severity level shared by insights and alerts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a severity reported by the reasoning backend
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }

    /// Whether insights at this level are escalated into alerts
    pub fn is_escalated(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

/// A normalized finding produced by one analysis cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub timestamp: Timestamp,
    pub kind: InsightKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub affected_modules: BTreeSet<ModuleTag>,
    pub confidence: f64,
    pub suggested_actions: Vec<String>,
    pub context: Payload,
}

/// One ranked, actionable suggestion attached to an alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TacticalDecision {
    pub id: String,
    pub action: String,
    /// Ranking in 1..=10, higher is more urgent
    pub priority: u8,
    pub estimated_impact: String,
    pub implementation_steps: Vec<String>,
    pub risks: Vec<String>,
    pub confidence: f64,
}

/// How an alert relates to the condition that raised it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Preventive,
    Reactive,
    Predictive,
    Informational,
}

impl From<InsightKind> for AlertType {
    fn from(kind: InsightKind) -> Self {
        match kind {
            InsightKind::Risk => AlertType::Preventive,
            InsightKind::Alert => AlertType::Reactive,
            InsightKind::Optimization => AlertType::Predictive,
            InsightKind::Opportunity => AlertType::Informational,
        }
    }
}

/// Time-bounded escalation of a severe insight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub timestamp: Timestamp,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub title: String,
    pub description: String,
    pub trigger_conditions: Vec<String>,
    pub affected_systems: BTreeSet<ModuleTag>,
    pub recommended_actions: Vec<TacticalDecision>,
    pub expires_at: Option<Timestamp>,
}

impl Alert {
    /// Whether the alert is still retained at `now`
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

/// Overall system status derived from module health and active alerts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Normal,
    Caution,
    Warning,
    Critical,
}

/// The singleton aggregate read by dashboards and operator tooling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SituationalState {
    pub timestamp: Timestamp,
    #[serde(rename = "overall_status")]
    pub overall_status: OverallStatus,
    pub modules: BTreeMap<ModuleTag, ModuleState>,
    pub active_alerts: Vec<Alert>,
    pub recent_insights: Vec<Insight>,
    /// Fraction of tracked modules reporting healthy, in 0..1
    pub system_health: f64,
}

impl SituationalState {
    /// Initial shape: every configured module unknown, no alerts, full health
    pub fn initial(modules: &[ModuleTag]) -> Self {
        let now = chrono::Utc::now();
        Self {
            timestamp: now,
            overall_status: OverallStatus::Normal,
            modules: modules
                .iter()
                .map(|tag| (*tag, ModuleState::unknown(now)))
                .collect(),
            active_alerts: Vec::new(),
            recent_insights: Vec::new(),
            system_health: 1.0,
        }
    }
}

/// Level of an operational log entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Pipeline stage an operational log entry belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Analysis,
    Alert,
    Decision,
    DataCollection,
}

/// Entry in the bounded operational log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub context: Payload,
}

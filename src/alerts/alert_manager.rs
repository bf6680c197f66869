use crate::config::AlertConfig;
use crate::events::{Alert, AlertType, Insight, Severity, TacticalDecision, Timestamp};
use log::{debug, info};

/// Priority of decisions raised by a critical insight
pub const CRITICAL_PRIORITY: u8 = 9;
/// Priority of decisions raised by a high insight
pub const HIGH_PRIORITY: u8 = 7;

/// Escalates severe insights into time-bounded alerts
///
/// The manager holds no alerts itself. The engine owns the retained list and
/// passes it through `retain` on every cycle so expiry and the size cap are
/// applied in one place.
#[derive(Debug, Clone)]
pub struct AlertManager {
    ttl: chrono::Duration,
    max_active: usize,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(&AlertConfig::default())
    }
}

impl AlertManager {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            ttl: config.ttl(),
            max_active: config.max_active,
        }
    }

    /// Build one alert per critical or high insight, in insight order
    pub fn escalate(&self, insights: &[Insight], now: Timestamp) -> Vec<Alert> {
        let alerts: Vec<Alert> = insights
            .iter()
            .filter(|insight| insight.severity.is_escalated())
            .map(|insight| self.alert_for(insight, now))
            .collect();

        if !alerts.is_empty() {
            info!(
                "Escalated {} of {} insights into alerts",
                alerts.len(),
                insights.len()
            );
        }
        alerts
    }

    fn alert_for(&self, insight: &Insight, now: Timestamp) -> Alert {
        Alert {
            id: format!("alert-{}", insight.id),
            timestamp: now,
            severity: insight.severity,
            alert_type: AlertType::from(insight.kind),
            title: insight.title.clone(),
            description: insight.description.clone(),
            trigger_conditions: vec![format!(
                "{} detected with {}% confidence",
                insight.kind.as_str(),
                (insight.confidence * 100.0).round() as i64
            )],
            affected_systems: insight.affected_modules.clone(),
            recommended_actions: decisions_for(insight),
            expires_at: now.checked_add_signed(self.ttl),
        }
    }

    /// Prepend new alerts to the unexpired retained ones, keeping the most recent
    pub fn retain(&self, new_alerts: Vec<Alert>, existing: &[Alert], now: Timestamp) -> Vec<Alert> {
        let mut merged = new_alerts;
        let fresh = merged.len();
        merged.extend(existing.iter().filter(|a| a.is_active_at(now)).cloned());

        let expired = existing.len() - (merged.len() - fresh);
        if expired > 0 {
            debug!("Dropped {} expired alerts", expired);
        }

        merged.truncate(self.max_active);
        merged
    }
}

/// One decision per suggested action of the insight
fn decisions_for(insight: &Insight) -> Vec<TacticalDecision> {
    let priority = if insight.severity == Severity::Critical {
        CRITICAL_PRIORITY
    } else {
        HIGH_PRIORITY
    };
    let affected = if insight.affected_modules.is_empty() {
        "all systems".to_string()
    } else {
        insight
            .affected_modules
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let estimated_impact = format!("Addresses {} affecting {}", insight.kind.as_str(), affected);

    insight
        .suggested_actions
        .iter()
        .enumerate()
        .map(|(index, action)| TacticalDecision {
            id: format!("decision-{}-{}", insight.id, index),
            action: action.clone(),
            priority,
            estimated_impact: estimated_impact.clone(),
            implementation_steps: vec![action.clone()],
            risks: Vec::new(),
            confidence: insight.confidence,
        })
        .collect()
}

/// Decisions across all active alerts, most urgent first
///
/// The sort is stable, so equal priorities keep the order of their alerts.
pub fn tactical_suggestions(alerts: &[Alert], now: Timestamp) -> Vec<TacticalDecision> {
    let mut decisions: Vec<TacticalDecision> = alerts
        .iter()
        .filter(|alert| alert.is_active_at(now))
        .flat_map(|alert| alert.recommended_actions.iter().cloned())
        .collect();
    decisions.sort_by(|a, b| b.priority.cmp(&a.priority));
    decisions
}

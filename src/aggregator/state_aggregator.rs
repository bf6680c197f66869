//! Overall status and health derivation
//!
//! Both functions are pure so that the precedence rules can be tested without
//! standing up the engine.

use crate::events::{Alert, ModuleState, ModuleStatus, ModuleTag, OverallStatus, Severity};
use std::collections::BTreeMap;

/// More than this many active high alerts raises the status to `Warning`
const HIGH_ALERT_WARNING_THRESHOLD: usize = 2;

/// Derive the overall status from module health and active alerts
///
/// Precedence, first match wins:
/// 1. `Critical` if any active alert is critical or any module has failed
/// 2. `Warning` if more than two active alerts are high
/// 3. `Caution` if one or two active alerts are high
/// 4. `Normal` otherwise
pub fn derive_overall_status(
    modules: &BTreeMap<ModuleTag, ModuleState>,
    active_alerts: &[Alert],
) -> OverallStatus {
    let any_failed = modules
        .values()
        .any(|state| state.status == ModuleStatus::Failed);
    let any_critical = active_alerts
        .iter()
        .any(|alert| alert.severity == Severity::Critical);

    if any_failed || any_critical {
        return OverallStatus::Critical;
    }

    let high_count = active_alerts
        .iter()
        .filter(|alert| alert.severity == Severity::High)
        .count();

    match high_count {
        0 => OverallStatus::Normal,
        n if n > HIGH_ALERT_WARNING_THRESHOLD => OverallStatus::Warning,
        _ => OverallStatus::Caution,
    }
}

/// Fraction of tracked modules reporting healthy, `1.0` when none are tracked
pub fn system_health(modules: &BTreeMap<ModuleTag, ModuleState>) -> f64 {
    if modules.is_empty() {
        return 1.0;
    }
    let healthy = modules
        .values()
        .filter(|state| state.status == ModuleStatus::Healthy)
        .count();
    healthy as f64 / modules.len() as f64
}

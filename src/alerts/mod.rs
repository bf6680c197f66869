/// Alert escalation, retention and suggestion ranking
pub mod alert_manager;

pub use alert_manager::{tactical_suggestions, AlertManager};

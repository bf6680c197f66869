/// Bounded observation buffer, module health classification and status derivation
pub mod context_buffer;
pub mod module_health;
pub mod state_aggregator;

pub use context_buffer::ContextBuffer;
pub use module_health::classify_payload;
pub use state_aggregator::{derive_overall_status, system_health};

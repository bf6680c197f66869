/// Insight generation and reasoning backend implementations
pub mod analyzer;
pub mod backends;

pub use analyzer::{GeneratorSettings, InsightGenerator};
pub use backends::{
    build_backend, MockBackend, MockReply, OllamaBackend, OpenAIBackend, ReasoningBackend,
};

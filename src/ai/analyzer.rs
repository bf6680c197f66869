use crate::ai::backends::{ChatMessage, ReasoningBackend, ReasoningRequest};
use crate::aggregator::context_buffer::latest_by_module;
use crate::aggregator::module_health::classify_payload;
use crate::config::Config;
use crate::error::AnalysisError;
use crate::events::{
    ChannelTag, Insight, InsightKind, LogCategory, ModuleStatus, ModuleTag, Observation,
    ObservationMetadata, Payload, Severity, Timestamp,
};
use crate::log_context;
use crate::log_sink::LogSink;
use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed directive describing the reply shape the backend must produce
pub const SYSTEM_DIRECTIVE: &str = "You are a tactical situational-awareness analyst. \
You receive the latest state reported by each subsystem module. Identify risks, \
opportunities, optimizations and alerts. Respond ONLY with a JSON array of records, each with \
fields: type (\"opportunity\", \"risk\", \"optimization\" or \"alert\"), severity (\"info\", \
\"low\", \"medium\", \"high\" or \"critical\"), title (string), description (string), \
affectedModules (array of module names), confidence (number between 0 and 1) and \
suggestedActions (array of strings). Respond with [] if nothing is noteworthy.";

pub const DEFAULT_CONFIDENCE: f64 = 0.7;
pub const FALLBACK_CONFIDENCE: f64 = 0.6;
pub const UNTITLED_INSIGHT: &str = "Untitled insight";
const FALLBACK_TITLE: &str = "Unstructured analysis result";

/// Per-cycle settings taken from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub sample_size: usize,
    /// Modules insights may reference; anything else is dropped
    pub modules: BTreeSet<ModuleTag>,
}

impl GeneratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.ai.model.clone(),
            temperature: config.ai.temperature,
            max_tokens: config.ai.max_tokens,
            timeout: config.analysis_timeout(),
            sample_size: config.buffer.sample_size,
            modules: config.modules.iter().copied().collect(),
        }
    }
}

/// Latest observation of one module as presented to the backend
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSummary {
    pub status: ModuleStatus,
    pub last_update: Timestamp,
    pub channel: ChannelTag,
    pub data: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObservationMetadata>,
}

/// Compact view of one cycle's sample, keyed by module
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub generated_at: Timestamp,
    pub observation_count: usize,
    pub modules: BTreeMap<ModuleTag, ModuleSummary>,
}

impl CycleSummary {
    /// Summarize a sample, keeping only the latest observation per tracked module
    pub fn from_sample(
        sample: &[Observation],
        tracked: &BTreeSet<ModuleTag>,
        now: Timestamp,
    ) -> Self {
        let sample: Vec<Observation> = sample
            .iter()
            .filter(|observation| tracked.contains(&observation.source))
            .cloned()
            .collect();
        let modules = latest_by_module(&sample)
            .into_iter()
            .map(|(tag, observation)| {
                (
                    tag,
                    ModuleSummary {
                        status: classify_payload(&observation.payload),
                        last_update: observation.timestamp,
                        channel: observation.origin_channel,
                        data: observation.payload,
                        metadata: observation.metadata,
                    },
                )
            })
            .collect();

        Self {
            generated_at: now,
            observation_count: sample.len(),
            modules,
        }
    }

    pub fn module_tags(&self) -> BTreeSet<ModuleTag> {
        self.modules.keys().copied().collect()
    }
}

/// Record shape requested from the backend
///
/// Every field is optional, but a field of the wrong JSON type rejects the
/// whole reply.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInsightRecord {
    #[serde(rename = "type", alias = "kind")]
    kind: Option<String>,
    severity: Option<String>,
    title: Option<String>,
    description: Option<String>,
    #[serde(alias = "affected_modules")]
    affected_modules: Option<Vec<String>>,
    confidence: Option<f64>,
    #[serde(alias = "suggested_actions")]
    suggested_actions: Option<Vec<String>>,
}

/// Top-level reply: a bare array or an object wrapping one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawReply {
    List(Vec<RawInsightRecord>),
    Wrapped { insights: Vec<RawInsightRecord> },
}

impl RawReply {
    fn into_records(self) -> Vec<RawInsightRecord> {
        match self {
            RawReply::List(records) => records,
            RawReply::Wrapped { insights } => insights,
        }
    }
}

/// Turns buffered observations into normalized insights
///
/// A failed or timed-out backend call yields no insights. A reply that cannot
/// be parsed yields exactly one fallback insight carrying the raw text. In
/// every case the failure is recorded in the operational log and the cycle
/// carries on.
pub struct InsightGenerator {
    backend: Arc<dyn ReasoningBackend>,
    log: Arc<LogSink>,
}

impl InsightGenerator {
    pub fn new(backend: Arc<dyn ReasoningBackend>, log: Arc<LogSink>) -> Self {
        Self { backend, log }
    }

    /// Build the chat request for a cycle summary
    pub fn build_request(
        &self,
        summary: &CycleSummary,
        settings: &GeneratorSettings,
    ) -> ReasoningRequest {
        let context = serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string());
        let prompt = format!(
            "Current situational context ({} observations across {} modules):\n\n{}\n\n\
             Respond with the JSON array only.",
            summary.observation_count,
            summary.modules.len(),
            context
        );

        ReasoningRequest {
            model: settings.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_DIRECTIVE), ChatMessage::user(prompt)],
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    /// Run the reasoning step over a sample of observations
    pub async fn generate(
        &self,
        sample: &[Observation],
        settings: &GeneratorSettings,
    ) -> Vec<Insight> {
        let now = Utc::now();
        let summary = CycleSummary::from_sample(sample, &settings.modules, now);
        if summary.observation_count == 0 {
            debug!("No buffered observations, skipping reasoning call");
            return Vec::new();
        }

        let request = self.build_request(&summary, settings);

        info!(
            "Starting analysis of {} observations from {} modules",
            summary.observation_count,
            summary.modules.len()
        );
        let start_time = Instant::now();

        let content = match self.call_backend(&request, settings.timeout).await {
            Ok(content) => content,
            Err(e) => {
                self.log.error(
                    LogCategory::Analysis,
                    format!("Reasoning call failed: {}", e),
                    log_context!(
                        "modules" => summary.module_tags(),
                        "elapsedMs" => start_time.elapsed().as_millis() as u64,
                    ),
                );
                return Vec::new();
            }
        };

        match parse_insights(&content, &settings.modules, now) {
            Ok(insights) => {
                debug!(
                    "Reasoning call produced {} insights in {:?}",
                    insights.len(),
                    start_time.elapsed()
                );
                insights
            }
            Err(e) => {
                self.log.error(
                    LogCategory::Analysis,
                    format!("Failed to parse reasoning response: {}", e),
                    log_context!("responseLength" => content.len()),
                );
                vec![fallback_insight(&content, &summary, now)]
            }
        }
    }

    async fn call_backend(
        &self,
        request: &ReasoningRequest,
        timeout: Duration,
    ) -> Result<String, AnalysisError> {
        match tokio::time::timeout(timeout, self.backend.complete(request)).await {
            Ok(result) => result.map(|response| response.content),
            Err(_) => Err(AnalysisError::Timeout),
        }
    }
}

/// Parse and normalize a backend reply
///
/// # Errors
///
/// Returns `AnalysisError::InvalidResponse` when no JSON array of records (or
/// object with an `insights` array) can be found in the text.
pub fn parse_insights(
    raw: &str,
    tracked: &BTreeSet<ModuleTag>,
    now: Timestamp,
) -> Result<Vec<Insight>, AnalysisError> {
    let records = extract_reply(raw)?.into_records();
    Ok(records
        .into_iter()
        .enumerate()
        .map(|(index, record)| normalize(record, index, tracked, now))
        .collect())
}

/// Locate the JSON reply inside text that may carry fences or prose
fn extract_reply(raw: &str) -> Result<RawReply, AnalysisError> {
    let text = raw.trim();
    let mut last_error = None;

    for candidate in reply_candidates(text) {
        match serde_json::from_str::<RawReply>(candidate) {
            Ok(reply) => return Ok(reply),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(AnalysisError::InvalidResponse(
        last_error.unwrap_or_else(|| "empty response".to_string()),
    ))
}

fn reply_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    if text.is_empty() {
        return candidates;
    }
    candidates.push(text);

    if let Some(fenced) = fenced_block(text) {
        candidates.push(fenced);
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                candidates.push(&text[start..=end]);
            }
        }
    }
    candidates
}

/// Contents of the first markdown code block, with an optional `json` tag
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let end = rest.find("```")?;
    let block = rest[..end].trim_start();
    Some(block.strip_prefix("json").unwrap_or(block).trim())
}

fn normalize(
    record: RawInsightRecord,
    index: usize,
    tracked: &BTreeSet<ModuleTag>,
    now: Timestamp,
) -> Insight {
    let affected_modules = record
        .affected_modules
        .unwrap_or_default()
        .iter()
        .filter_map(|name| name.parse::<ModuleTag>().ok())
        .filter(|tag| tracked.contains(tag))
        .collect();

    Insight {
        id: format!("insight-{}-{}", now.timestamp_millis(), index),
        timestamp: now,
        kind: record
            .kind
            .as_deref()
            .and_then(InsightKind::parse)
            .unwrap_or(InsightKind::Risk),
        severity: record
            .severity
            .as_deref()
            .and_then(Severity::parse)
            .unwrap_or(Severity::Medium),
        title: record
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| UNTITLED_INSIGHT.to_string()),
        description: record.description.unwrap_or_default(),
        affected_modules,
        confidence: record
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0),
        suggested_actions: record.suggested_actions.unwrap_or_default(),
        context: Payload::new(),
    }
}

/// Single insight standing in for a reply that could not be parsed
pub fn fallback_insight(raw: &str, summary: &CycleSummary, now: Timestamp) -> Insight {
    Insight {
        id: format!("insight-{}-0", now.timestamp_millis()),
        timestamp: now,
        kind: InsightKind::Risk,
        severity: Severity::Medium,
        title: FALLBACK_TITLE.to_string(),
        description: raw.to_string(),
        affected_modules: summary.module_tags(),
        confidence: FALLBACK_CONFIDENCE,
        suggested_actions: Vec::new(),
        context: log_context!("fallback" => true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::backends::{MockBackend, MockReply};
    use crate::bus::NullBus;
    use crate::config::LoggingConfig;
    use crate::events::LogLevel;
    use serde_json::json;

    fn observation(source: ModuleTag, payload: serde_json::Value, seconds: i64) -> Observation {
        Observation {
            source,
            origin_channel: ChannelTag::Internal,
            timestamp: Utc::now() + chrono::Duration::seconds(seconds),
            payload: payload.as_object().cloned().unwrap_or_default(),
            metadata: None,
        }
    }

    fn settings() -> GeneratorSettings {
        GeneratorSettings {
            model: "test-model".to_string(),
            temperature: 0.3,
            max_tokens: 500,
            timeout: Duration::from_secs(10),
            sample_size: 50,
            modules: all_modules(),
        }
    }

    fn all_modules() -> BTreeSet<ModuleTag> {
        Config::default().modules.into_iter().collect()
    }

    fn generator(backend: MockBackend) -> (InsightGenerator, Arc<LogSink>) {
        let log = Arc::new(LogSink::new(&LoggingConfig::default(), Arc::new(NullBus)));
        (
            InsightGenerator::new(Arc::new(backend), log.clone()),
            log,
        )
    }

    fn analysis_errors(log: &LogSink) -> Vec<String> {
        log.recent(usize::MAX)
            .into_iter()
            .filter(|e| e.level == LogLevel::Error && e.category == LogCategory::Analysis)
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_summary_keeps_latest_per_module() {
        let sample = vec![
            observation(ModuleTag::Navigation, json!({"heading": 90}), 0),
            observation(ModuleTag::Weather, json!({"warning": true}), 1),
            observation(ModuleTag::Navigation, json!({"heading": 180}), 2),
        ];
        let summary = CycleSummary::from_sample(&sample, &all_modules(), Utc::now());

        assert_eq!(summary.observation_count, 3);
        assert_eq!(summary.modules.len(), 2);
        assert_eq!(
            summary.modules[&ModuleTag::Navigation].data["heading"],
            json!(180)
        );
        assert_eq!(
            summary.modules[&ModuleTag::Weather].status,
            ModuleStatus::Degraded
        );
    }

    #[test]
    fn test_request_carries_directive_and_summary() {
        let (generator, _) = generator(MockBackend::default());
        let sample = vec![observation(ModuleTag::Crew, json!({"onDuty": 4}), 0)];
        let summary = CycleSummary::from_sample(&sample, &all_modules(), Utc::now());
        let request = generator.build_request(&summary, &settings());

        assert_eq!(request.model, "test-model");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[0].content, SYSTEM_DIRECTIVE);
        assert!(request.messages[1].content.contains("\"crew\""));
        assert!(request.messages[1].content.contains("onDuty"));
    }

    #[test]
    fn test_parse_normalizes_records() {
        let now = Utc::now();
        let raw = r#"[
            {"type": "risk", "severity": "high", "title": "Fuel low",
             "description": "Fuel at 10%", "affectedModules": ["systems", "reactor"],
             "confidence": 1.7, "suggestedActions": ["Refuel"]},
            {"title": "Bare"}
        ]"#;
        let insights = parse_insights(raw, &all_modules(), now).unwrap();

        assert_eq!(insights.len(), 2);
        let first = &insights[0];
        assert_eq!(first.id, format!("insight-{}-0", now.timestamp_millis()));
        assert_eq!(first.kind, InsightKind::Risk);
        assert_eq!(first.severity, Severity::High);
        assert_eq!(
            first.affected_modules,
            BTreeSet::from([ModuleTag::Systems])
        );
        assert_eq!(first.confidence, 1.0);
        assert_eq!(first.suggested_actions, vec!["Refuel"]);

        let second = &insights[1];
        assert_eq!(second.id, format!("insight-{}-1", now.timestamp_millis()));
        assert_eq!(second.severity, Severity::Medium);
        assert_eq!(second.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(second.kind, InsightKind::Risk);
        assert!(second.affected_modules.is_empty());
        assert!(second.suggested_actions.is_empty());
    }

    #[test]
    fn test_parse_accepts_wrapped_fenced_and_snake_case() {
        let raw = "Here you go:\n```json\n{\"insights\": [{\"type\": \"opportunity\", \
                   \"severity\": \"low\", \"title\": \"Tailwind\", \
                   \"affected_modules\": [\"weather\"]}]}\n```\nDone.";
        let insights = parse_insights(raw, &all_modules(), Utc::now()).unwrap();

        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].kind, InsightKind::Opportunity);
        assert_eq!(
            insights[0].affected_modules,
            BTreeSet::from([ModuleTag::Weather])
        );
    }

    #[test]
    fn test_parse_untitled_and_unknown_values() {
        let raw = r#"[{"type": "catastrophe", "severity": "apocalyptic"}]"#;
        let insights = parse_insights(raw, &all_modules(), Utc::now()).unwrap();
        assert_eq!(insights[0].title, UNTITLED_INSIGHT);
        assert_eq!(insights[0].kind, InsightKind::Risk);
        assert_eq!(insights[0].severity, Severity::Medium);
    }

    #[test]
    fn test_parse_rejects_non_json_and_wrong_types() {
        let modules = all_modules();
        for raw in [
            "not json at all",
            "",
            r#"{"summary": "no insights key"}"#,
            r#"[{"confidence": "very"}]"#,
            r#"[42]"#,
        ] {
            assert!(parse_insights(raw, &modules, Utc::now()).is_err(), "{}", raw);
        }
    }

    #[test]
    fn test_parse_drops_untracked_modules() {
        let tracked = BTreeSet::from([ModuleTag::Navigation]);
        let raw = r#"[{"severity": "high", "title": "Crew fatigue",
                       "affectedModules": ["crew", "navigation"]}]"#;
        let insights = parse_insights(raw, &tracked, Utc::now()).unwrap();

        assert_eq!(
            insights[0].affected_modules,
            BTreeSet::from([ModuleTag::Navigation])
        );
    }

    #[test]
    fn test_summary_skips_untracked_observations() {
        let sample = vec![
            observation(ModuleTag::Crew, json!({"onDuty": 4}), 0),
            observation(ModuleTag::Navigation, json!({"heading": 90}), 1),
        ];
        let tracked = BTreeSet::from([ModuleTag::Navigation]);
        let summary = CycleSummary::from_sample(&sample, &tracked, Utc::now());

        assert_eq!(summary.observation_count, 1);
        assert_eq!(summary.module_tags(), tracked);
    }

    #[test]
    fn test_parse_empty_array_is_no_insights() {
        assert!(parse_insights("[]", &all_modules(), Utc::now()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_returns_parsed_insights() {
        let backend = MockBackend::text(
            r#"[{"type": "alert", "severity": "critical", "title": "Hull breach"}]"#,
        );
        let (generator, log) = generator(backend.clone());
        let sample = vec![observation(ModuleTag::Systems, json!({"error": true}), 0)];

        let insights = generator.generate(&sample, &settings()).await;

        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].severity, Severity::Critical);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.last_request().unwrap().temperature, 0.3);
        assert!(analysis_errors(&log).is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_reply_yields_single_fallback() {
        let (generator, log) = generator(MockBackend::text("not json at all"));
        let sample = vec![
            observation(ModuleTag::Navigation, json!({"heading": 90}), 0),
            observation(ModuleTag::Weather, json!({"wind": 30}), 1),
        ];

        let insights = generator.generate(&sample, &settings()).await;

        assert_eq!(insights.len(), 1);
        let fallback = &insights[0];
        assert_eq!(fallback.kind, InsightKind::Risk);
        assert_eq!(fallback.severity, Severity::Medium);
        assert_eq!(fallback.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(fallback.description, "not json at all");
        assert_eq!(
            fallback.affected_modules,
            BTreeSet::from([ModuleTag::Navigation, ModuleTag::Weather])
        );
        assert_eq!(analysis_errors(&log).len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_names_only_tracked_modules() {
        let (generator, _) = generator(MockBackend::text("not json at all"));
        let sample = vec![
            observation(ModuleTag::Crew, json!({"onDuty": 4}), 0),
            observation(ModuleTag::Navigation, json!({"heading": 90}), 1),
        ];
        let settings = GeneratorSettings {
            modules: BTreeSet::from([ModuleTag::Navigation]),
            ..settings()
        };

        let insights = generator.generate(&sample, &settings).await;

        assert_eq!(insights.len(), 1);
        assert_eq!(
            insights[0].affected_modules,
            BTreeSet::from([ModuleTag::Navigation])
        );
    }

    #[tokio::test]
    async fn test_only_untracked_observations_skip_backend() {
        let backend = MockBackend::default();
        let (generator, _) = generator(backend.clone());
        let sample = vec![observation(ModuleTag::Crew, json!({"onDuty": 4}), 0)];
        let settings = GeneratorSettings {
            modules: BTreeSet::from([ModuleTag::Navigation]),
            ..settings()
        };

        assert!(generator.generate(&sample, &settings).await.is_empty());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_yields_no_insights() {
        let (generator, log) =
            generator(MockBackend::with_reply(MockReply::Error("down".to_string())));
        let sample = vec![observation(ModuleTag::Crew, json!({"onDuty": 4}), 0)];

        let insights = generator.generate(&sample, &settings()).await;

        assert!(insights.is_empty());
        let errors = analysis_errors(&log);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_timeout_yields_no_insights() {
        let backend = MockBackend::text("[]").with_delay(Duration::from_secs(60));
        let (generator, log) = generator(backend);
        let sample = vec![observation(ModuleTag::Mission, json!({"phase": 2}), 0)];

        let insights = generator.generate(&sample, &settings()).await;

        assert!(insights.is_empty());
        let errors = analysis_errors(&log);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("timeout"));
    }

    #[tokio::test]
    async fn test_empty_sample_skips_backend() {
        let backend = MockBackend::default();
        let (generator, _) = generator(backend.clone());

        assert!(generator.generate(&[], &settings()).await.is_empty());
        assert_eq!(backend.call_count(), 0);
    }
}

use crate::config::AIBackendConfig;
use crate::error::AnalysisError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// One chat message sent to the reasoning backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat-completion style request
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Raw text produced by the reasoning backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningResponse {
    pub content: String,
}

/// Trait for reasoning backend implementations
///
/// Backends only move text. Interpreting the reply is the insight generator's
/// job, so a backend that returns garbage is still a successful call here.
pub trait ReasoningBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: &'a ReasoningRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ReasoningResponse, AnalysisError>> + Send + 'a>>;
}

/// Build the backend selected in the configuration
pub fn build_backend(config: &AIBackendConfig) -> Arc<dyn ReasoningBackend> {
    match config {
        AIBackendConfig::Ollama { endpoint } => Arc::new(OllamaBackend::new(endpoint.clone())),
        AIBackendConfig::OpenAI { api_key, base_url } => match base_url {
            Some(base_url) => Arc::new(OpenAIBackend::with_base_url(
                api_key.clone(),
                base_url.clone(),
            )),
            None => Arc::new(OpenAIBackend::new(api_key.clone())),
        },
        AIBackendConfig::Mock => Arc::new(MockBackend::default()),
    }
}

/// HTTP client shared by the network backends
///
/// The analysis cycle enforces its own deadline; this one only stops a
/// connection from hanging forever.
fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .no_proxy()
        .build()
        .unwrap_or_else(|e| {
            log::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
}

/// Read a non-success HTTP response into a backend error
async fn status_error(provider: &str, response: reqwest::Response) -> AnalysisError {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    AnalysisError::BackendError(format!(
        "{} API returned error {}: {}",
        provider, status, error_text
    ))
}

/// Ollama backend for local LLM inference
///
/// Talks to the `/api/chat` endpoint of a local Ollama server with streaming
/// disabled.
pub struct OllamaBackend {
    client: Client,
    endpoint: String,
}

/// Request format for the Ollama chat API
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

/// Options for Ollama inference
#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Response format from the Ollama chat API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// # Example
    /// ```
    /// use sitaware::ai::backends::OllamaBackend;
    ///
    /// let backend = OllamaBackend::new("http://localhost:11434".to_string());
    /// assert_eq!(backend.endpoint(), "http://localhost:11434");
    /// ```
    pub fn new(endpoint: String) -> Self {
        Self {
            client: http_client(),
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn api_url(&self) -> String {
        format!("{}/api/chat", self.endpoint.trim_end_matches('/'))
    }
}

impl ReasoningBackend for OllamaBackend {
    fn complete<'a>(
        &'a self,
        request: &'a ReasoningRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ReasoningResponse, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            let body = OllamaRequest {
                model: &request.model,
                messages: &request.messages,
                stream: false,
                options: OllamaOptions {
                    temperature: request.temperature,
                    num_predict: request.max_tokens,
                },
            };

            let response = self.client.post(self.api_url()).json(&body).send().await?;

            if !response.status().is_success() {
                return Err(status_error("Ollama", response).await);
            }

            let ollama_response: OllamaResponse = response.json().await.map_err(|e| {
                AnalysisError::InvalidResponse(format!("Failed to parse Ollama response: {}", e))
            })?;

            if let Some(error) = ollama_response.error {
                return Err(AnalysisError::BackendError(format!(
                    "Ollama error: {}",
                    error
                )));
            }

            let message = ollama_response.message.ok_or_else(|| {
                AnalysisError::InvalidResponse("No message in Ollama response".to_string())
            })?;

            Ok(ReasoningResponse {
                content: message.content,
            })
        })
    }
}

/// OpenAI-compatible backend for hosted inference
///
/// Works against any server exposing `/chat/completions` with bearer
/// authentication.
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

/// Request format for the Chat Completions API
#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

/// Response format from the Chat Completions API
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

impl OpenAIBackend {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, OPENAI_BASE_URL.to_string())
    }

    /// Create a backend for an OpenAI-compatible server at `base_url`
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl ReasoningBackend for OpenAIBackend {
    fn complete<'a>(
        &'a self,
        request: &'a ReasoningRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ReasoningResponse, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            let body = OpenAIRequest {
                model: &request.model,
                messages: &request.messages,
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            };

            let response = self
                .client
                .post(self.api_url())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(status_error("OpenAI", response).await);
            }

            let openai_response: OpenAIResponse = response.json().await.map_err(|e| {
                AnalysisError::InvalidResponse(format!("Failed to parse OpenAI response: {}", e))
            })?;

            if let Some(error) = openai_response.error {
                return Err(AnalysisError::BackendError(format!(
                    "OpenAI API error ({}): {}",
                    error.error_type.as_deref().unwrap_or("unknown"),
                    error.message
                )));
            }

            let content = openai_response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| {
                    AnalysisError::InvalidResponse("No choices in OpenAI response".to_string())
                })?;

            Ok(ReasoningResponse { content })
        })
    }
}

/// Scripted reply of the mock backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Return this text as the completion
    Text(String),
    /// Fail the call with a backend error carrying this message
    Error(String),
}

/// Mock backend for tests and offline runs
///
/// Replies are returned in order and cycle after the last one. An optional
/// delay is slept before replying so callers can exercise their deadlines.
#[derive(Clone)]
pub struct MockBackend {
    replies: Vec<MockReply>,
    delay: Option<Duration>,
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    next: usize,
    call_count: usize,
    last_request: Option<ReasoningRequest>,
}

impl MockBackend {
    pub fn with_reply(reply: MockReply) -> Self {
        Self::with_replies(vec![reply])
    }

    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            delay: None,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Mock that always answers with `text`
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_reply(MockReply::Text(text.into()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .call_count
    }

    pub fn last_request(&self) -> Option<ReasoningRequest> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_request
            .clone()
    }
}

impl Default for MockBackend {
    /// Answers every call with an empty insight list
    fn default() -> Self {
        Self::text("[]")
    }
}

impl ReasoningBackend for MockBackend {
    fn complete<'a>(
        &'a self,
        request: &'a ReasoningRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ReasoningResponse, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            let reply = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.call_count += 1;
                state.last_request = Some(request.clone());
                if self.replies.is_empty() {
                    None
                } else {
                    let reply = self.replies[state.next % self.replies.len()].clone();
                    state.next += 1;
                    Some(reply)
                }
            };

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match reply {
                Some(MockReply::Text(content)) => Ok(ReasoningResponse { content }),
                Some(MockReply::Error(message)) => Err(AnalysisError::BackendError(message)),
                None => Err(AnalysisError::BackendError(
                    "Mock backend has no scripted replies".to_string(),
                )),
            }
        })
    }
}

//! The text-completion seam between the pipeline and the LLM service.
//!
//! The pipeline never talks to an SDK directly: classification and
//! extraction both go through [`TextCompletion`], injected as
//! `Arc<dyn TextCompletion>` by the caller. This keeps provider lifetimes
//! owned by the orchestrator (no process-wide client singleton) and makes
//! every LLM-touching stage testable with a scripted mock.
//!
//! [`HttpTextCompletion`] is the production implementation: a thin reqwest
//! client speaking the OpenAI-compatible `chat/completions` wire format,
//! which every hosted and local provider in scope exposes.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Errors from a text-completion call.
///
/// Transport-class errors are worth retrying; the rest are not.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// Connection-level failure (DNS, TLS, reset) or a 5xx/429 status.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-retryable HTTP error (4xx other than 429).
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    /// The service answered but the payload carried no text.
    #[error("empty completion response")]
    Empty,
}

impl CompletionError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CompletionError::Transport(_))
    }
}

/// A text-in, text-out completion service.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Submit a prompt and return the model's text response.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;

    /// Provenance tag recorded with each run (typically the model id).
    fn model_tag(&self) -> &str;
}

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// reqwest-backed [`TextCompletion`] for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct HttpTextCompletion {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl HttpTextCompletion {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
        }
    }

    /// Point the client at a different OpenAI-compatible endpoint
    /// (Ollama, vLLM, LiteLLM, an Azure deployment, …).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Construct from the environment.
    ///
    /// Reads `PDF2LEDGER_API_KEY`, falling back to `OPENAI_API_KEY`;
    /// `PDF2LEDGER_MODEL` overrides the default model and
    /// `PDF2LEDGER_BASE_URL` the endpoint. Returns `None` when no key is set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("PDF2LEDGER_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty())?;
        let model =
            std::env::var("PDF2LEDGER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let mut provider = Self::new(api_key, model);
        if let Ok(url) = std::env::var("PDF2LEDGER_BASE_URL") {
            if !url.is_empty() {
                provider = provider.with_base_url(url);
            }
        }
        Some(provider)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl TextCompletion for HttpTextCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            // Transcription work wants determinism, not creativity.
            "temperature": 0.0,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 429 and 5xx are transient under concurrent load.
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(CompletionError::Transport(format!(
                    "HTTP {status}: {body}"
                )));
            }
            return Err(CompletionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.is_empty())
            .ok_or(CompletionError::Empty)
    }

    fn model_tag(&self) -> &str {
        &self.model
    }
}

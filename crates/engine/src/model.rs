//! Language-model collaborator that proposes a mapping for an unseen shape.

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "o4-mini";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model credentials are not configured")]
    MissingCredentials,

    /// Network failure, rate limit or server error; worth another attempt
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unusable response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// System and user messages for one mapping request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingPrompt {
    pub system: String,
    pub user: String,
}

const SYSTEM_PROMPT: &str = "Ensure the output is valid JSON, and does NOT add more keys to the standard. \
Make sure each important key from the user input is in the standard. Empty fields in the standard are ok. \
If values are nested, ALWAYS add the nested value in dotted format such as 'secret.version.value'. \
Example: If the standard is ```{\"id\": \"The id of the ticket\", \"title\": \"The ticket title\"}```, \
and the user input is ```{\"key\": \"12345\", \"fields\": {\"summary\": \"The title of the ticket\"}}```, \
the output should be ```{\"id\": \"key\", \"title\": \"fields.summary\"}```";

impl MappingPrompt {
    /// Build the prompt from the standard's example body and the input skeleton.
    pub fn new(standard: &str, skeleton: &str) -> Self {
        let user = format!(
            "Translate the given user input JSON structure to a standard format. \
Use the values from the standard to guide you what to look for. \
The standard format should follow the pattern:\n\n```json\n{standard}\n```\n\n\
User Input:\n```json\n{skeleton}\n```\n\n\
Generate the standard output structure without providing the expected output."
        );
        Self {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

#[async_trait]
pub trait MappingModel: Send + Sync {
    /// Return the raw model text; the caller strips code fences and parses it.
    async fn generate_mapping(&self, prompt: &MappingPrompt) -> std::result::Result<String, ModelError>;

    /// False when the model cannot be called at all (no credentials).
    fn is_configured(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "model"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

/// Call the model, retrying transport failures with a fixed delay.
///
/// Both the call and the delay are abandoned as soon as `cancel` fires.
pub async fn generate_with_retry(
    model: &dyn MappingModel,
    prompt: &MappingPrompt,
    policy: RetryPolicy,
    cancel: &CancelToken,
) -> Result<String> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        cancel.check()?;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            outcome = model.generate_mapping(prompt) => outcome,
        };

        match outcome {
            Ok(text) => return Ok(text),
            Err(err) if !err.is_retryable() => {
                return Err(EngineError::ModelUnavailable(err.to_string()));
            }
            Err(err) => {
                log::warn!(
                    "{} call failed (attempt {attempt}/{attempts}): {err}",
                    model.name()
                );
                last_error = err.to_string();
            }
        }

        if attempt < attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    Err(EngineError::ModelUnavailable(format!(
        "no response after {attempts} attempts: {last_error}"
    )))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl OpenAiConfig {
    /// Reads `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `MODEL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();
        Self {
            api_key: non_empty("OPENAI_API_KEY"),
            base_url: non_empty("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: non_empty("MODEL").unwrap_or(defaults.model),
            timeout: defaults.timeout,
        }
    }
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: OpenAiConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| EngineError::ModelUnavailable(format!("http client: {err}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl MappingModel for OpenAiChatModel {
    async fn generate_mapping(&self, prompt: &MappingPrompt) -> std::result::Result<String, ModelError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ModelError::MissingCredentials)?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ModelError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("HTTP {status}: {}", truncate(&body, 200));
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(ModelError::Transport(detail))
            } else {
                Err(ModelError::InvalidResponse(detail))
            };
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| ModelError::InvalidResponse(err.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ModelError::InvalidResponse("no message content".to_string()))
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> ModelError,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                error: || ModelError::Transport("connection reset".to_string()),
            }
        }
    }

    #[async_trait]
    impl MappingModel for Flaky {
        async fn generate_mapping(
            &self,
            _prompt: &MappingPrompt,
        ) -> std::result::Result<String, ModelError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err((self.error)())
            } else {
                Ok(r#"{"id": "key"}"#.to_string())
            }
        }
    }

    fn prompt() -> MappingPrompt {
        MappingPrompt::new(r#"{"id": "identifier"}"#, r#"{"key": ""}"#)
    }

    #[test]
    fn prompt_embeds_standard_and_skeleton() {
        let prompt = prompt();
        assert!(prompt.system.contains("valid JSON"));
        assert!(prompt.user.contains(r#"{"id": "identifier"}"#));
        assert!(prompt.user.contains(r#"{"key": ""}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried_with_fixed_delay() {
        let model = Flaky::new(2);
        let started = tokio::time::Instant::now();
        let text = generate_with_retry(&model, &prompt(), RetryPolicy::default(), &CancelToken::new())
            .await
            .expect("third attempt succeeds");
        assert_eq!(text, r#"{"id": "key"}"#);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_model_unavailable() {
        let model = Flaky::new(u32::MAX);
        let err = generate_with_retry(&model, &prompt(), RetryPolicy::default(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_are_not_retried() {
        let mut model = Flaky::new(u32::MAX);
        model.error = || ModelError::MissingCredentials;
        let err = generate_with_retry(&model, &prompt(), RetryPolicy::default(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_retry_delay() {
        let model = Flaky::new(u32::MAX);
        let cancel = CancelToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(4)).await;
                cancel.cancel();
            })
        };
        let err = generate_with_retry(&model, &prompt(), RetryPolicy::default(), &cancel)
            .await
            .unwrap_err();
        canceller.await.expect("join");
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn openai_config_from_lookup() {
        let config = OpenAiConfig::from_lookup(|name| match name {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "MODEL" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, DEFAULT_OPENAI_BASE_URL);
    }

    #[tokio::test]
    async fn unconfigured_client_reports_missing_credentials() {
        let model = OpenAiChatModel::new(OpenAiConfig::default()).expect("client");
        assert!(!model.is_configured());
        let err = model.generate_mapping(&prompt()).await.unwrap_err();
        assert!(matches!(err, ModelError::MissingCredentials));
        assert_eq!(
            model.endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}

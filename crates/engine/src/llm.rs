use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sti_core::{StiError, StiResult, WeeklyProductivity};

use crate::config::LlmConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
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

#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    RequestFailed(String),
    #[error("LLM response parse error: {0}")]
    ParseError(String),
    #[error("LLM request timed out")]
    Timeout,
    #[error("LLM server unreachable: {0}")]
    Unreachable(String),
}

impl From<LlmError> for StiError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout => StiError::UpstreamTimeout,
            other => StiError::Upstream(other.to_string()),
        }
    }
}

/// Provider-agnostic completion interface; any OpenAI-compatible API fits.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

/// Works with any OpenAI-compatible chat completions API such as Ollama,
/// vLLM, LMStudio, llama.cpp, or the hosted providers.
pub struct OpenAiCompatibleLlm {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompatibleLlm {
    pub fn from_config(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatibleLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError> {
        let model = params.model.clone().unwrap_or_else(|| self.model.clone());
        let max_tokens = params.max_tokens.unwrap_or(self.max_tokens);
        let temperature = params.temperature.unwrap_or(self.temperature);

        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatCompletionRequest {
            model,
            messages: messages.to_vec(),
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
        };

        let mut req_builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else if e.is_connect() {
                LlmError::Unreachable(e.to_string())
            } else {
                LlmError::RequestFailed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("HTTP {status}: {body}")));
        }

        let chat_resp: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        chat_resp
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::ParseError("no content in response".to_string()))
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

/// Thin service over whichever provider is configured. Disabled deployments
/// get a uniform upstream error instead of a panic or a silent no-op.
#[derive(Clone)]
pub struct LlmService {
    provider: Option<Arc<dyn LlmProvider>>,
    model: String,
}

impl LlmService {
    pub fn from_config(config: &LlmConfig) -> Self {
        let provider: Option<Arc<dyn LlmProvider>> = if config.enabled {
            Some(Arc::new(OpenAiCompatibleLlm::from_config(config)))
        } else {
            None
        };
        Self {
            provider,
            model: config.model.clone(),
        }
    }

    #[cfg(any(test, feature = "test-stubs"))]
    pub fn with_provider(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider),
            model: model.into(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> StiResult<&Arc<dyn LlmProvider>> {
        self.provider
            .as_ref()
            .ok_or_else(|| StiError::Upstream("LLM support is disabled".into()))
    }

    /// Free-form chat passthrough.
    pub async fn chat(&self, messages: &[ChatMessage]) -> StiResult<String> {
        let provider = self.provider()?;
        tracing::debug!(provider = provider.name(), count = messages.len(), "chat request");
        let reply = provider
            .complete(messages, &CompletionParams::default())
            .await?;
        Ok(reply)
    }

    /// Study recommendations grounded in the weekly productivity aggregate.
    pub async fn recommend(&self, weeks: &[WeeklyProductivity]) -> StiResult<String> {
        let provider = self.provider()?;
        let messages = [
            ChatMessage::system(
                "You are a study coach. Given weekly productivity metrics, suggest \
                 three concrete, specific improvements. Be brief and practical.",
            ),
            ChatMessage::user(weekly_summary(weeks)),
        ];
        let reply = provider
            .complete(&messages, &CompletionParams::default())
            .await?;
        Ok(reply)
    }
}

/// Compact textual rendering of recent weekly metrics for the prompt.
fn weekly_summary(weeks: &[WeeklyProductivity]) -> String {
    if weeks.is_empty() {
        return "No weekly productivity data is available yet.".to_string();
    }
    let mut out = String::from("Recent weekly productivity:\n");
    for week in weeks {
        out.push_str(&format!(
            "- {}-W{:02}: {} created, {} completed ({:.0}% rate), \
             {} min planned, {} min logged, avg completion {} min\n",
            week.iso_year,
            week.iso_week,
            week.tasks_created,
            week.tasks_completed,
            week.completion_rate * 100.0,
            week.planned_minutes,
            week.actual_minutes,
            week.avg_completion_time_min,
        ));
    }
    out
}

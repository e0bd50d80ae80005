use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use concierge_core::config::LlmConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("llm service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response carried no choices")]
    EmptyResponse,
}

/// One entry in the chat transcript sent to the model service. Matches the
/// chat-completions message shape: assistant turns may carry `tool_calls`,
/// tool turns echo the `tool_call_id` they answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }

    pub fn assistant_with_tool_calls(
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self { role: "assistant".to_string(), content, tool_calls: Some(tool_calls), tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool invocation requested by the model. `arguments` is the raw
/// JSON-encoded string exactly as the service returned it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type", default = "function_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

fn function_call_type() -> String {
    "function".to_string()
}

/// One assistant turn: optional free text plus zero or more tool calls.
#[derive(Clone, Debug, Default)]
pub struct AssistantTurn {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One round of the tool-calling exchange.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<AssistantTurn, LlmError>;

    /// Single-shot completion with no tools, used for insight summaries.
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    summary_model: String,
    temperature: f64,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.as_ref().map(|key| key.expose_secret().to_string()),
            model: config.model.clone(),
            summary_model: config.summary_model.clone().unwrap_or_else(|| config.model.clone()),
            temperature: config.temperature,
        })
    }

    async fn completions(&self, body: &Value) -> Result<WireResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        Ok(response.json::<WireResponse>().await?)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<AssistantTurn, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "tools": tools,
            "tool_choice": "auto",
        });

        let response = self.completions(&body).await?;
        let choice = response.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        debug!(
            event_name = "llm.chat_turn",
            tool_calls = choice.message.tool_calls.as_ref().map_or(0, Vec::len),
            "received assistant turn"
        );

        Ok(AssistantTurn {
            text: choice.message.content.filter(|text| !text.trim().is_empty()),
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
        })
    }

    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.summary_model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
        });

        let response = self.completions(&body).await?;
        let choice = response.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        choice.message.content.filter(|text| !text.trim().is_empty()).ok_or(LlmError::EmptyResponse)
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallRequest>>,
}

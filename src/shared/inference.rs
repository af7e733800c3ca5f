use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::shared::config::InferenceConfig;
use crate::shared::models::{Message, ToolInvocation};

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Inference service error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse inference response: {0}")]
    Parse(String),

    #[error("Inference call timed out after {0}s")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, InferenceError>;

/// Role-tagged message in the provider's chat format.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        match message {
            Message::User { content, .. } => ChatMessage::plain("user", content.clone()),
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => ChatMessage {
                role: "assistant".to_string(),
                content: content.clone(),
                tool_calls: tool_calls.clone(),
                tool_call_id: None,
            },
            Message::Tool {
                content,
                tool_call_id,
                ..
            } => ChatMessage {
                role: "tool".to_string(),
                content: content.clone(),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_call_id.clone()),
            },
        }
    }
}

/// A capability the model may propose, in OpenAI function format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub typ: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDef>,
    pub json_output: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub id: Option<String>,
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub total_tokens: Option<i64>,
}

/// The opaque language-model capability: messages (and optionally a tool
/// catalog) in, one response with text and proposed invocations out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse>;
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    total_tokens: Option<i64>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    temperature: f32,
    timeout_secs: u64,
    log_seq: Arc<AtomicU64>,
}

impl InferenceClient {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let auth_header = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| format!("Bearer {}", key));

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            auth_header,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            log_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    async fn send(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_request(request, self.temperature);

        let log_id = self.log_seq.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            log_id,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "inference request"
        );

        let mut builder = self.client.post(&url).json(&body);
        if let Some(header) = &self.auth_header {
            builder = builder.header("Authorization", header);
        }

        let resp = builder.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response>".to_string());
            return Err(InferenceError::Status { status, body });
        }

        let text = resp.text().await?;
        let parsed = parse_response(&text)?;
        tracing::debug!(
            log_id,
            tool_calls = parsed.tool_calls.len(),
            total_tokens = ?parsed.total_tokens,
            "inference response"
        );
        Ok(parsed)
    }
}

#[async_trait]
impl ChatModel for InferenceClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse> {
        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), self.send(&request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(self.timeout_secs)),
        }
    }
}

fn build_request(request: &ModelRequest, temperature: f32) -> ChatRequest<'_> {
    let messages = request
        .messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.clone(),
            content: m.content.clone(),
            tool_calls: m
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect(),
            tool_call_id: m.tool_call_id.clone(),
        })
        .collect();

    ChatRequest {
        model: &request.model,
        messages,
        tools: request.tools.clone(),
        response_format: request
            .json_output
            .then(|| json!({"type": "json_object"})),
        temperature,
        stream: false,
    }
}

fn parse_response(response_text: &str) -> Result<ModelResponse> {
    let parsed: ChatResponse = serde_json::from_str(response_text)
        .map_err(|e| InferenceError::Parse(e.to_string()))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::Parse("response missing choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .iter()
        .map(parse_tool_call)
        .collect::<Result<Vec<_>>>()?;

    Ok(ModelResponse {
        id: parsed.id,
        content: choice.message.content.unwrap_or_default().trim().to_string(),
        tool_calls,
        total_tokens: parsed.usage.unwrap_or_default().total_tokens,
    })
}

fn parse_tool_call(raw: &Value) -> Result<ToolInvocation> {
    let function = raw
        .get("function")
        .ok_or_else(|| InferenceError::Parse("tool call missing function".to_string()))?;

    let name = function
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| InferenceError::Parse("tool call missing function name".to_string()))?;

    // Providers send arguments either as a JSON-encoded string or inline
    let arguments = match function.get("arguments") {
        Some(Value::String(encoded)) if encoded.trim().is_empty() => json!({}),
        Some(Value::String(encoded)) => serde_json::from_str(encoded).map_err(|e| {
            InferenceError::Parse(format!("invalid arguments for '{}': {}", name, e))
        })?,
        Some(Value::Null) | None => json!({}),
        Some(other) => other.clone(),
    };

    let id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(crate::shared::models::message::new_call_id);

    Ok(ToolInvocation {
        id,
        name: name.to_string(),
        arguments,
    })
}

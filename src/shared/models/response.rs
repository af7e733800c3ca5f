use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::{RESPONSE_TYPE_AI, RESPONSE_TYPE_FUNCTION, RESPONSE_TYPE_STOP};
use super::message::{new_message_id, ToolInvocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Tool,
}

/// Body of `POST /app`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    #[serde(deserialize_with = "deserialize_thread_id")]
    pub threadid: String,
    pub role: TurnRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub kernel_language: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Ai,
    Function,
    Stop,
}

impl ReplyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyKind::Ai => RESPONSE_TYPE_AI,
            ReplyKind::Function => RESPONSE_TYPE_FUNCTION,
            ReplyKind::Stop => RESPONSE_TYPE_STOP,
        }
    }
}

/// One assistant message produced by a turn, before it is put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub id: String,
    pub content: String,
    pub kind: ReplyKind,
    pub tool_calls: Vec<ToolInvocation>,
}

impl AssistantReply {
    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            kind: ReplyKind::Ai,
            tool_calls: Vec::new(),
        }
    }

    pub fn call(id: impl Into<String>, content: impl Into<String>, call: ToolInvocation) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            kind: ReplyKind::Function,
            tool_calls: vec![call],
        }
    }

    pub fn stop() -> Self {
        Self {
            id: new_message_id(),
            content: String::new(),
            kind: ReplyKind::Stop,
            tool_calls: Vec::new(),
        }
    }

    pub fn into_wire(self, threadid: &str) -> InvokeResponse {
        InvokeResponse {
            content: self.content,
            role: "assistant".to_string(),
            id: self.id,
            kind: self.kind.as_str().to_string(),
            tool_calls: self.tool_calls.into_iter().map(WireToolCall::from).collect(),
            threadid: threadid.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunction,
}

impl From<ToolInvocation> for WireToolCall {
    fn from(call: ToolInvocation) -> Self {
        Self {
            id: call.id,
            kind: "function".to_string(),
            function: WireFunction {
                name: call.name,
                arguments: call.arguments,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub content: String,
    pub role: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tool_calls: Vec<WireToolCall>,
    pub threadid: String,
}

// Thread ids arrive as strings from current clients and as integers from older ones
fn deserialize_thread_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Visitor};

    struct ThreadIdVisitor;

    impl<'de> Visitor<'de> for ThreadIdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a non-empty thread id string or an integer")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: Error,
        {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(E::custom("threadid must not be empty"));
            }
            Ok(trimmed.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(value.to_string())
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(value.to_string())
        }

        fn visit_bool<E>(self, _: bool) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Err(E::custom("expected thread id, found boolean"))
        }

        fn visit_f64<E>(self, _: f64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Err(E::custom("expected thread id, found floating point number"))
        }
    }

    deserializer.deserialize_any(ThreadIdVisitor)
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::{TOOL_STATUS_ERROR, TOOL_STATUS_SUCCESS};

/// Outcome reported by the executor for one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    #[serde(alias = "failed")]
    Error,
}

impl ToolStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            TOOL_STATUS_SUCCESS => Some(ToolStatus::Success),
            TOOL_STATUS_ERROR | "failed" => Some(ToolStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Success => TOOL_STATUS_SUCCESS,
            ToolStatus::Error => TOOL_STATUS_ERROR,
        }
    }
}

/// A capability call proposed to the executor. The `id` correlates the
/// executor's later tool-result with this exact call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: new_call_id(),
            name: name.into(),
            arguments,
        }
    }

    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One conversational turn. History is append-only; the only in-place
/// rewrite is the tool-result compaction done by the sanitizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        id: String,
        content: String,
    },
    Assistant {
        id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocation>,
    },
    Tool {
        id: String,
        content: String,
        tool_call_id: String,
        tool_name: String,
        status: ToolStatus,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            id: new_message_id(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            id: new_message_id(),
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_call(content: impl Into<String>, call: ToolInvocation) -> Self {
        Message::Assistant {
            id: new_message_id(),
            content: content.into(),
            tool_calls: vec![call],
        }
    }

    pub fn tool_result(
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        status: ToolStatus,
    ) -> Self {
        Message::Tool {
            id: new_message_id(),
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            status,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::User { id, .. } | Message::Assistant { id, .. } | Message::Tool { id, .. } => {
                id
            }
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::User { content, .. }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolInvocation] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }
}

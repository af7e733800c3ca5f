use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::message::{Message, ToolInvocation};

/// Where a thread paused at the end of its last turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    AwaitingClarification,
    Generating,
    AwaitingToolResult,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::AwaitingClarification => "awaiting_clarification",
            SessionPhase::Generating => "generating",
            SessionPhase::AwaitingToolResult => "awaiting_tool_result",
        }
    }
}

/// Durable per-thread conversation state.
///
/// `in_flight` is the single invocation that has been announced to the caller
/// and not yet resolved; `pending` holds the rest of the plan, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub pending: VecDeque<ToolInvocation>,
    #[serde(default)]
    pub in_flight: Option<ToolInvocation>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub force_stop: bool,
    #[serde(default)]
    pub notebook_name: Option<String>,
    #[serde(default)]
    pub kernel_language: Option<String>,
    #[serde(default)]
    pub phase: SessionPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            messages: Vec::new(),
            pending: VecDeque::new(),
            in_flight: None,
            intent: None,
            force_stop: false,
            notebook_name: None,
            kernel_language: None,
            phase: SessionPhase::Idle,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Drops the queued plan and forgets the announced call.
    pub fn clear_tool_queue(&mut self) -> Option<ToolInvocation> {
        self.pending.clear();
        self.in_flight.take()
    }

    /// Removes the assistant message that announced `call_id` when no result
    /// for it was ever recorded. Returns true when history changed.
    pub fn drop_unresolved_call(&mut self, call_id: &str) -> bool {
        let resolved = self.messages.iter().any(|m| match m {
            Message::Tool { tool_call_id, .. } => tool_call_id == call_id,
            _ => false,
        });
        if resolved {
            return false;
        }
        let position = self
            .messages
            .iter()
            .rposition(|m| m.tool_calls().iter().any(|c| c.id == call_id));
        match position {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::message::ToolStatus;
    use serde_json::json;

    #[test]
    fn unresolved_call_is_removed_from_history() {
        let mut state = SessionState::new();
        state.push(Message::user("build it"));
        let call = ToolInvocation::new("create_notebook", json!({"name": "demo"}));
        let call_id = call.id.clone();
        state.push(Message::assistant_with_call("generating", call));

        assert!(state.drop_unresolved_call(&call_id));
        assert_eq!(state.messages.len(), 1);
        assert!(!state.drop_unresolved_call(&call_id));
    }

    #[test]
    fn resolved_call_is_kept() {
        let mut state = SessionState::new();
        let call = ToolInvocation::new("run_cells", json!({"cells": []}));
        let call_id = call.id.clone();
        state.push(Message::assistant_with_call("running", call));
        state.push(Message::tool_result("{}", &call_id, "run_cells", ToolStatus::Success));

        assert!(!state.drop_unresolved_call(&call_id));
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn older_state_documents_default_missing_fields() {
        let now = Utc::now();
        let state: SessionState = serde_json::from_value(json!({
            "created_at": now,
            "updated_at": now,
        }))
        .unwrap();
        assert_eq!(state.phase, SessionPhase::Idle);
        assert!(state.pending.is_empty());
        assert!(!state.force_stop);
    }
}

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::prompts;
use crate::shared::inference::{self, ChatMessage, ChatModel, ModelRequest};
use crate::shared::models::Message;

/// Outcome of classifying the latest user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentDecision {
    /// Not yet actionable; `reply` asks or paraphrases.
    Clarify { reply: String },
    /// Confirmed plan; `intent` drives generation.
    HandOff { reply: String, intent: String },
    /// Conversational turn unrelated to building.
    Chat { reply: String },
}

impl IntentDecision {
    pub fn label(&self) -> &'static str {
        match self {
            IntentDecision::Clarify { .. } => "clarify",
            IntentDecision::HandOff { .. } => "handoff",
            IntentDecision::Chat { .. } => "chat",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    decision: String,
    #[serde(default)]
    reply: String,
    #[serde(default)]
    intent: String,
}

pub struct IntentResolver {
    model: Arc<dyn ChatModel>,
    model_name: String,
    window: usize,
}

impl IntentResolver {
    pub fn new(model: Arc<dyn ChatModel>, model_name: impl Into<String>, window: usize) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            window: window.max(2),
        }
    }

    pub async fn resolve(&self, history: &[Message]) -> inference::Result<IntentDecision> {
        let mut messages = vec![ChatMessage::system(prompts::intent_prompt())];
        messages.extend(conversation_window(history, self.window));

        let request = ModelRequest {
            model: self.model_name.clone(),
            messages,
            tools: Vec::new(),
            json_output: true,
        };
        let response = self.model.complete(request).await?;
        let decision = parse_decision(&response.content);
        debug!(decision = decision.label(), "intent resolved");
        Ok(decision)
    }
}

/// Last `window` user/assistant turns. Tool traffic and tool-call
/// announcements are left out: the classifier has no tools bound, and a
/// window must not open on a tool result whose proposal was cut off.
fn conversation_window(history: &[Message], window: usize) -> Vec<ChatMessage> {
    let conversational: Vec<&Message> = history
        .iter()
        .filter(|m| match m {
            Message::User { .. } => true,
            Message::Assistant { content, tool_calls, .. } => {
                tool_calls.is_empty() && !content.trim().is_empty()
            }
            Message::Tool { .. } => false,
        })
        .collect();
    let start = conversational.len().saturating_sub(window);
    conversational[start..]
        .iter()
        .map(|m| ChatMessage::from(*m))
        .collect()
}

/// Parses the structured decision. Anything unparseable is shown to the user
/// as a clarification, and a hand-off without an intent is not a hand-off.
pub fn parse_decision(raw: &str) -> IntentDecision {
    let text = strip_code_fence(raw.trim());
    let candidate = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    };

    let parsed: RawDecision = match serde_json::from_str(candidate) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Intent response was not a decision object: {}", e);
            return IntentDecision::Clarify {
                reply: raw.trim().to_string(),
            };
        }
    };

    let reply = parsed.reply.trim().to_string();
    let intent = parsed.intent.trim().to_string();
    match parsed.decision.trim().to_ascii_lowercase().as_str() {
        "handoff" | "hand_off" | "hand-off" if !intent.is_empty() => {
            IntentDecision::HandOff { reply, intent }
        }
        "chat" | "reply" => IntentDecision::Chat { reply },
        _ => IntentDecision::Clarify { reply },
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedModel;
    use crate::shared::models::{ToolInvocation, ToolStatus};
    use serde_json::json;

    #[test]
    fn handoff_requires_an_intent() {
        let decision = parse_decision(
            r#"{"decision": "handoff", "reply": "On it.", "intent": "Scatter plot of 100 random points"}"#,
        );
        assert_eq!(
            decision,
            IntentDecision::HandOff {
                reply: "On it.".to_string(),
                intent: "Scatter plot of 100 random points".to_string()
            }
        );

        let empty = parse_decision(r#"{"decision": "handoff", "reply": "Sure", "intent": " "}"#);
        assert_eq!(empty, IntentDecision::Clarify { reply: "Sure".to_string() });
    }

    #[test]
    fn fenced_and_prefixed_json_is_accepted() {
        let decision = parse_decision(
            "```json\n{\"decision\": \"chat\", \"reply\": \"Hello!\", \"intent\": \"\"}\n```",
        );
        assert_eq!(decision, IntentDecision::Chat { reply: "Hello!".to_string() });

        let decision = parse_decision("Here you go: {\"decision\": \"clarify\", \"reply\": \"Which columns?\"}");
        assert_eq!(decision, IntentDecision::Clarify { reply: "Which columns?".to_string() });
    }

    #[test]
    fn free_text_becomes_clarification() {
        let decision = parse_decision("  Do you want a bar chart or a line chart? ");
        assert_eq!(
            decision,
            IntentDecision::Clarify {
                reply: "Do you want a bar chart or a line chart?".to_string()
            }
        );
    }

    #[tokio::test]
    async fn window_skips_tool_traffic() {
        let model = Arc::new(ScriptedModel::new());
        model.push_text(r#"{"decision": "chat", "reply": "hi", "intent": ""}"#);
        let resolver = IntentResolver::new(model.clone(), "intent-model", 2);

        let call = ToolInvocation::new("run_cells", json!({"cells": []}));
        let history = vec![
            Message::user("first"),
            Message::assistant("answer one"),
            Message::assistant_with_call("I will now run the notebook.", call.clone()),
            Message::tool_result("success", &call.id, "run_cells", ToolStatus::Success),
            Message::user("second"),
        ];
        resolver.resolve(&history).await.unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(request.json_output);
        assert!(request.tools.is_empty());
        assert_eq!(request.model, "intent-model");
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "assistant", "user"]);
        assert_eq!(request.messages[2].content, "second");
    }
}

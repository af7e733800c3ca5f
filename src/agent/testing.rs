use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::shared::inference::{ChatModel, InferenceError, ModelRequest, ModelResponse, Result};
use crate::shared::models::ToolInvocation;

/// Replays queued responses in order and records every request it saw.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_text(&self, content: &str) {
        self.push(Ok(ModelResponse {
            content: content.to_string(),
            ..Default::default()
        }));
    }

    pub fn push_decision(&self, decision: &str, reply: &str, intent: &str) {
        let body = serde_json::json!({"decision": decision, "reply": reply, "intent": intent});
        self.push_text(&body.to_string());
    }

    pub fn push_calls(&self, calls: &[(&str, Value)]) {
        self.push(Ok(ModelResponse {
            tool_calls: calls
                .iter()
                .map(|(name, args)| ToolInvocation::new(*name, args.clone()))
                .collect(),
            ..Default::default()
        }));
    }

    pub fn push_error(&self, message: &str) {
        self.push(Err(InferenceError::Parse(message.to_string())));
    }

    fn push(&self, response: Result<ModelResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(InferenceError::Parse("script exhausted".to_string())))
    }
}

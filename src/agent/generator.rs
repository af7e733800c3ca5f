use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::prompts;
use super::tool_registry::{ToolKind, ToolRegistry};
use crate::shared::inference::{self, ChatMessage, ChatModel, ModelRequest};
use crate::shared::models::constants::{TOOL_CREATE_NOTEBOOK, TOOL_RUN_CELLS};
use crate::shared::models::{Message, ToolInvocation};

/// Everything the generator may read for one hand-off.
pub struct GenerationContext<'a> {
    pub intent: &'a str,
    pub history: &'a [Message],
    pub kernel_language: &'a str,
    /// Notebook produced earlier in this thread, if any
    pub notebook_name: Option<&'a str>,
    pub references: &'a [String],
}

/// Validated, ordered invocations ready for the sequencer.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookPlan {
    pub calls: Vec<ToolInvocation>,
    /// Name of the first notebook the plan creates
    pub created_notebook: Option<String>,
}

pub struct NotebookGenerator {
    model: Arc<dyn ChatModel>,
    model_name: String,
    registry: Arc<ToolRegistry>,
    max_attempts: u32,
}

impl NotebookGenerator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        model_name: impl Into<String>,
        registry: Arc<ToolRegistry>,
        max_attempts: u32,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            registry,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Asks the model for tool calls until it proposes at least one usable
    /// call or the attempt budget runs out (`Ok(None)`). Provider failures
    /// end generation immediately.
    pub async fn generate(
        &self,
        ctx: &GenerationContext<'_>,
    ) -> inference::Result<Option<NotebookPlan>> {
        let mut conversation = build_conversation(ctx);
        let tools = self.registry.tool_defs();

        for attempt in 1..=self.max_attempts {
            let request = ModelRequest {
                model: self.model_name.clone(),
                messages: conversation.clone(),
                tools: tools.clone(),
                json_output: false,
            };
            let response = self.model.complete(request).await?;

            let proposed = response.tool_calls.len();
            let calls: Vec<ToolInvocation> = response
                .tool_calls
                .into_iter()
                .filter_map(|call| self.registry.normalize(call))
                .collect();

            if !calls.is_empty() {
                let plan = self.finalize(calls, ctx);
                info!(
                    attempt,
                    calls = plan.calls.len(),
                    notebook = plan.created_notebook.as_deref().unwrap_or(""),
                    "notebook plan generated"
                );
                return Ok(Some(plan));
            }

            warn!(
                attempt,
                max_attempts = self.max_attempts,
                proposed,
                "generation produced no usable tool calls"
            );
            if !response.content.trim().is_empty() {
                conversation.push(ChatMessage::assistant(response.content));
            }
            push_system_note(
                &mut conversation,
                prompts::no_tool_call_note(attempt, self.max_attempts),
            );
        }

        Ok(None)
    }

    fn finalize(&self, mut calls: Vec<ToolInvocation>, ctx: &GenerationContext<'_>) -> NotebookPlan {
        let mut created_notebook = None;
        // proposed name (with and without `.ipynb`) -> disambiguated name
        let mut renamed: HashMap<String, String> = HashMap::new();
        for call in calls.iter_mut() {
            if call.name == TOOL_CREATE_NOTEBOOK {
                let proposed = call.argument_str("name").unwrap_or("notebook").trim().to_string();
                let name = disambiguate_name(&proposed);
                let body = notebook_body(call.arguments.get("notebook"), ctx.kernel_language);
                set_argument(call, "name", Value::String(name.clone()));
                set_argument(call, "notebook", body);
                for alias in proposed_aliases(&proposed) {
                    renamed.insert(alias, name.clone());
                }
                if created_notebook.is_none() {
                    created_notebook = Some(name);
                }
                continue;
            }

            if !matches!(self.registry.kind_of(&call.name), Some(ToolKind::Edit | ToolKind::Run)) {
                continue;
            }
            let retarget = call
                .argument_str("notebook_name")
                .and_then(|target| renamed.get(target.trim()))
                .cloned();
            if let Some(name) = retarget {
                set_argument(call, "notebook_name", Value::String(name));
            }
        }

        let target = created_notebook
            .clone()
            .or_else(|| ctx.notebook_name.map(str::to_string));
        if let Some(target) = target.as_deref() {
            for call in calls.iter_mut() {
                if matches!(self.registry.kind_of(&call.name), Some(ToolKind::Edit | ToolKind::Run))
                    && call.argument_str("notebook_name").is_none()
                {
                    set_argument(call, "notebook_name", Value::String(target.to_string()));
                }
            }
        }

        ensure_trailing_run(&mut calls, target.as_deref());
        NotebookPlan {
            calls,
            created_notebook,
        }
    }
}

/// Names a later call may use for a notebook proposed as `proposed`.
fn proposed_aliases(proposed: &str) -> Vec<String> {
    let stem = if proposed.to_ascii_lowercase().ends_with(".ipynb") {
        &proposed[..proposed.len() - ".ipynb".len()]
    } else {
        proposed
    };
    if stem.is_empty() {
        return vec![proposed.to_string()];
    }
    vec![stem.to_string(), format!("{stem}.ipynb"), proposed.to_string()]
}

fn push_system_note(conversation: &mut Vec<ChatMessage>, text: impl Into<String>) {
    conversation.push(ChatMessage::system(text));
}

fn build_conversation(ctx: &GenerationContext<'_>) -> Vec<ChatMessage> {
    let mut conversation = vec![ChatMessage::system(prompts::generation_prompt(
        ctx.kernel_language,
        ctx.notebook_name,
    ))];
    if let Some(block) = prompts::references_block(ctx.references) {
        conversation.push(ChatMessage::system(block));
    }

    // Tool traffic stays out: this request must not open on a dangling proposal
    conversation.extend(
        ctx.history
            .iter()
            .filter(|m| match m {
                Message::User { .. } => true,
                Message::Assistant { tool_calls, content, .. } => {
                    tool_calls.is_empty() && !content.trim().is_empty()
                }
                Message::Tool { .. } => false,
            })
            .map(ChatMessage::from),
    );
    conversation.push(ChatMessage::user(format!("Task: {}", ctx.intent)));
    conversation
}

fn set_argument(call: &mut ToolInvocation, key: &str, value: Value) {
    match &mut call.arguments {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
        }
        other => {
            let mut map = Map::new();
            map.insert(key.to_string(), value);
            *other = Value::Object(map);
        }
    }
}

/// Appends an all-pending `run_cells` unless the plan already ends in one.
/// Applying it to a compliant plan changes nothing.
pub fn ensure_trailing_run(calls: &mut Vec<ToolInvocation>, notebook_name: Option<&str>) {
    if calls.last().map(|c| c.name.as_str()) == Some(TOOL_RUN_CELLS) {
        return;
    }
    let mut args = json!({"cells": []});
    if let Some(name) = notebook_name {
        args["notebook_name"] = Value::String(name.to_string());
    }
    calls.push(ToolInvocation::new(TOOL_RUN_CELLS, args));
}

/// `<stem>_<4 hex>`; a trailing `.ipynb` is dropped first.
pub fn disambiguate_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let stem = if trimmed.to_ascii_lowercase().ends_with(".ipynb") {
        &trimmed[..trimmed.len() - ".ipynb".len()]
    } else {
        trimmed
    };
    let stem = if stem.is_empty() { "notebook" } else { stem };
    format!("{}_{:04x}", stem, rand::random::<u16>())
}

/// The document body to send with `create_notebook`: the model's own when it
/// gave a usable one (inline or JSON-encoded), otherwise a fresh default.
fn notebook_body(proposed: Option<&Value>, kernel_language: &str) -> Value {
    match proposed {
        Some(Value::Object(doc)) if doc.contains_key("cells") => Value::Object(doc.clone()),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(doc) if doc.get("cells").map(Value::is_array).unwrap_or(false) => doc,
            _ => default_notebook(kernel_language),
        },
        _ => default_notebook(kernel_language),
    }
}

/// Minimal nbformat 4.4 document with a single welcome cell.
pub fn default_notebook(kernel_language: &str) -> Value {
    let hint = kernel_language.trim();
    let (name, display_name, language) = match hint.to_ascii_lowercase().as_str() {
        "" | "python" | "python3" => ("python3".to_string(), "Python 3".to_string(), "python".to_string()),
        "r" | "ir" => ("ir".to_string(), "R".to_string(), "R".to_string()),
        other => (other.to_string(), hint.to_string(), other.to_string()),
    };
    let cell_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

    json!({
        "nbformat": 4,
        "nbformat_minor": 4,
        "metadata": {
            "kernelspec": {
                "name": name,
                "display_name": display_name,
                "language": language
            },
            "language_info": {"name": language}
        },
        "cells": [{
            "cell_type": "markdown",
            "id": cell_id,
            "metadata": {},
            "source": ["# Welcome\n", "\n", "This notebook was generated for you. Cells below are added as the plan runs."]
        }]
    })
}

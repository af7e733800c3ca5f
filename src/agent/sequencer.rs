use std::sync::Arc;
use tracing::{info, warn};

use super::sanitizer::{strip_ansi, ToolResult};
use super::tool_registry::{ToolKind, ToolRegistry};
use crate::shared::models::{
    AssistantReply, Message, SessionPhase, SessionState, ToolInvocation, ToolStatus,
};

const MAX_ERROR_DETAIL_CHARS: usize = 600;

/// Releases a plan to the executor one invocation at a time.
pub struct ToolCallSequencer {
    registry: Arc<ToolRegistry>,
}

impl ToolCallSequencer {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Replaces whatever was queued with `plan` and emits its head.
    pub fn load_plan(
        &self,
        state: &mut SessionState,
        plan: Vec<ToolInvocation>,
    ) -> Option<AssistantReply> {
        if let Some(abandoned) = state.clear_tool_queue() {
            warn!(call_id = %abandoned.id, "replacing plan while a call was in flight");
        }
        state.pending = plan.into();
        self.emit_next(state)
    }

    /// Moves the queue head in flight and records the announcing assistant
    /// message. Returns `None` when nothing is queued; never emits while a
    /// call is already in flight.
    pub fn emit_next(&self, state: &mut SessionState) -> Option<AssistantReply> {
        if state.in_flight.is_some() {
            return None;
        }
        let call = state.pending.pop_front()?;
        let announcement = self
            .registry
            .announce(&call, state.notebook_name.as_deref());

        let message = Message::assistant_with_call(announcement.clone(), call.clone());
        let reply = AssistantReply::call(message.id(), announcement, call.clone());
        info!(
            tool = %call.name,
            call_id = %call.id,
            remaining = state.pending.len(),
            "emitting tool call"
        );

        state.push(message);
        state.in_flight = Some(call);
        state.phase = SessionPhase::AwaitingToolResult;
        Some(reply)
    }

    /// Records the executor's result for `call` (already taken out of flight)
    /// and decides the next step: the next queued call, an error report, or
    /// a closing summary.
    pub fn on_tool_result(
        &self,
        state: &mut SessionState,
        call: &ToolInvocation,
        status: ToolStatus,
        content: &str,
    ) -> AssistantReply {
        let result = ToolResult::from_tool(&call.name, content).sanitized();
        let first_error = result.first_error();
        let counts = result.cell_counts();
        let stored = result.into_content();
        state.push(Message::tool_result(
            stored.clone(),
            &call.id,
            &call.name,
            status,
        ));

        match status {
            ToolStatus::Error => {
                let dropped = state.pending.len();
                state.clear_tool_queue();
                state.phase = SessionPhase::AwaitingClarification;
                warn!(tool = %call.name, dropped, "tool reported an error; plan abandoned");

                let detail = first_error.unwrap_or_else(|| truncate(strip_ansi(&stored).trim()));
                let text = format!(
                    "The {} step on {} failed: {}\nTell me how you would like to proceed and I will adjust the notebook.",
                    call.name,
                    self.target(call, state),
                    detail
                );
                self.reply_text(state, text)
            }
            ToolStatus::Success => {
                if let Some(reply) = self.emit_next(state) {
                    return reply;
                }

                state.phase = SessionPhase::Idle;
                state.intent = None;
                let text = match (self.registry.kind_of(&call.name), counts) {
                    (Some(ToolKind::Run), Some((code, with_output))) => format!(
                        "Finished: {} ran successfully ({} code cells executed, {} with output).",
                        self.target(call, state),
                        code,
                        with_output
                    ),
                    (Some(ToolKind::Run), None) => format!(
                        "Finished: {} ran successfully.",
                        self.target(call, state)
                    ),
                    _ => format!("Finished: all steps on {} completed.", self.target(call, state)),
                };
                self.reply_text(state, text)
            }
        }
    }

    fn target(&self, call: &ToolInvocation, state: &SessionState) -> String {
        call.argument_str("notebook_name")
            .or_else(|| call.argument_str("name"))
            .or(state.notebook_name.as_deref())
            .map(|name| format!("notebook {}", name))
            .unwrap_or_else(|| "the notebook".to_string())
    }

    fn reply_text(&self, state: &mut SessionState, text: String) -> AssistantReply {
        let message = Message::assistant(text.clone());
        let reply = AssistantReply::text(message.id(), text);
        state.push(message);
        reply
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_DETAIL_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_ERROR_DETAIL_CHARS).collect();
    cut.push_str("...");
    cut
}

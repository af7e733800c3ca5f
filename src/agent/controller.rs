use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::error::{AgentError, Result};
use super::generator::{GenerationContext, NotebookGenerator};
use super::intent::{IntentDecision, IntentResolver};
use super::sanitizer::compact_history;
use super::sequencer::ToolCallSequencer;
use super::session_store::SessionStore;
use super::tool_registry::ToolRegistry;
use crate::shared::config::AgentSettings;
use crate::shared::inference::ChatModel;
use crate::shared::models::message::new_message_id;
use crate::shared::models::{
    AssistantReply, InvokeRequest, Message, SessionPhase, SessionState, ToolStatus, TurnRole,
};

const EMPTY_CLARIFICATION: &str =
    "Could you tell me a bit more about the notebook you would like me to build?";
const GENERATION_GAVE_UP: &str = "Sorry, I could not produce a notebook for that request. \
     Could you rephrase it or describe the steps you expect?";

/// One inbound message for a thread.
#[derive(Debug, Clone)]
pub struct Turn {
    pub thread_id: String,
    pub role: TurnRole,
    pub content: String,
    pub tool_call_id: Option<String>,
    /// `None` when absent or not a recognised status
    pub status: Option<ToolStatus>,
    pub kernel_language: Option<String>,
    pub references: Vec<String>,
}

impl From<InvokeRequest> for Turn {
    fn from(req: InvokeRequest) -> Self {
        Self {
            thread_id: req.threadid,
            role: req.role,
            content: req.content,
            tool_call_id: req
                .tool_call_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            status: req.status.as_deref().and_then(ToolStatus::parse),
            kernel_language: req
                .kernel_language
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            references: req.references,
        }
    }
}

/// The assistant messages a turn produced, in order, and where it paused.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub replies: Vec<AssistantReply>,
    pub phase: SessionPhase,
}

impl TurnOutcome {
    /// The message a request/response caller receives: the last one produced.
    pub fn final_reply(&self) -> AssistantReply {
        self.replies
            .last()
            .cloned()
            .unwrap_or_else(|| AssistantReply::text(new_message_id(), ""))
    }
}

/// Routes each turn through resolver, generator and sequencer, and persists
/// the result. Turns for one thread are processed one at a time.
pub struct SessionController {
    store: Arc<dyn SessionStore>,
    registry: Arc<ToolRegistry>,
    resolver: IntentResolver,
    generator: NotebookGenerator,
    sequencer: ToolCallSequencer,
    settings: AgentSettings,
    // thread id -> session tracker
    trackers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        model: Arc<dyn ChatModel>,
        settings: &AgentSettings,
    ) -> Self {
        let registry = Arc::new(ToolRegistry::with_notebook_tools());
        Self {
            store,
            resolver: IntentResolver::new(
                model.clone(),
                settings.intent_model.clone(),
                settings.history_window,
            ),
            generator: NotebookGenerator::new(
                model,
                settings.generation_model.clone(),
                registry.clone(),
                settings.max_generation_attempts,
            ),
            sequencer: ToolCallSequencer::new(registry.clone()),
            registry,
            settings: settings.clone(),
            trackers: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn invoke(&self, turn: Turn) -> Result<TurnOutcome> {
        let tracker = self.tracker(&turn.thread_id).await;
        let result = {
            let _guard = tracker.lock().await;
            self.process(&turn).await
        };

        if let Err(AgentError::BadRequest(reason)) = &result {
            warn!(thread_id = %turn.thread_id, %reason, "rejected turn; evicting session tracker");
            self.evict(&turn.thread_id, &tracker).await;
        } else {
            self.release(&turn.thread_id, &tracker).await;
        }
        result
    }

    /// Removes a thread. Returns false when it did not exist.
    pub async fn clear_thread(&self, thread_id: &str) -> Result<bool> {
        let tracker = self.tracker(thread_id).await;
        let removed = {
            let _guard = tracker.lock().await;
            self.store.delete(thread_id).await?
        };
        self.evict(thread_id, &tracker).await;
        if removed {
            info!(thread_id, "thread cleared");
        }
        Ok(removed)
    }

    pub async fn active_threads(&self) -> Result<Vec<String>> {
        Ok(self.store.list().await?)
    }

    async fn tracker(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut trackers = self.trackers.lock().await;
        trackers
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the tracker once no other turn holds or waits on it.
    async fn release(&self, thread_id: &str, tracker: &Arc<Mutex<()>>) {
        let mut trackers = self.trackers.lock().await;
        // One reference in the map, one held by this turn
        let idle = trackers
            .get(thread_id)
            .map(|current| Arc::ptr_eq(current, tracker) && Arc::strong_count(tracker) == 2)
            .unwrap_or(false);
        if idle {
            trackers.remove(thread_id);
        }
    }

    #[cfg(test)]
    async fn tracked_threads(&self) -> usize {
        self.trackers.lock().await.len()
    }

    async fn evict(&self, thread_id: &str, tracker: &Arc<Mutex<()>>) {
        let mut trackers = self.trackers.lock().await;
        // A tracker replaced since this turn began belongs to newer turns
        if trackers
            .get(thread_id)
            .map(|current| Arc::ptr_eq(current, tracker))
            .unwrap_or(false)
        {
            trackers.remove(thread_id);
        }
    }

    async fn process(&self, turn: &Turn) -> Result<TurnOutcome> {
        let thread_id = turn.thread_id.as_str();
        let (mut state, version) = match self.store.load(thread_id).await? {
            Some(stored) => (stored.state, stored.version),
            None => (SessionState::new(), 0),
        };

        let replies = if turn.content.trim() == self.settings.stop_keyword {
            if version == 0 {
                info!(thread_id, "stop for unknown thread");
                return Ok(TurnOutcome {
                    replies: vec![AssistantReply::stop()],
                    phase: SessionPhase::Idle,
                });
            }
            self.handle_stop(thread_id, &mut state);
            vec![AssistantReply::stop()]
        } else {
            match turn.role {
                TurnRole::Tool => self.handle_tool_result(thread_id, &mut state, turn)?,
                TurnRole::User => self.handle_user(thread_id, &mut state, turn).await,
            }
        };

        let compacted = compact_history(&mut state.messages);
        state.touch();
        self.store
            .compare_and_swap(thread_id, version, &state)
            .await?;

        info!(
            thread_id,
            phase = state.phase.as_str(),
            replies = replies.len(),
            pending = state.pending.len(),
            compacted,
            "turn complete"
        );
        Ok(TurnOutcome {
            replies,
            phase: state.phase,
        })
    }

    fn handle_stop(&self, thread_id: &str, state: &mut SessionState) {
        let dropped = state.pending.len();
        if let Some(call) = state.clear_tool_queue() {
            state.drop_unresolved_call(&call.id);
            // The executor may still answer the abandoned call
            state.force_stop = true;
        }
        state.intent = None;
        state.phase = SessionPhase::Idle;
        info!(thread_id, dropped, force_stop = state.force_stop, "stop requested");
    }

    fn handle_tool_result(
        &self,
        thread_id: &str,
        state: &mut SessionState,
        turn: &Turn,
    ) -> Result<Vec<AssistantReply>> {
        let call_id = turn
            .tool_call_id
            .as_deref()
            .ok_or_else(|| AgentError::BadRequest("tool result requires tool_call_id".to_string()))?;
        let status = turn.status.ok_or_else(|| {
            AgentError::BadRequest("tool result requires status 'success' or 'error'".to_string())
        })?;

        let call = match state.in_flight.take() {
            Some(call) if call.id == call_id => call,
            other => {
                state.in_flight = other;
                if state.force_stop {
                    state.force_stop = false;
                    info!(thread_id, call_id, "late tool result after stop ignored");
                    return Ok(vec![AssistantReply::text(new_message_id(), "")]);
                }
                return Err(AgentError::BadRequest(format!(
                    "no pending tool call with id '{}'",
                    call_id
                )));
            }
        };

        info!(thread_id, tool = %call.name, status = status.as_str(), "tool result received");
        Ok(vec![self
            .sequencer
            .on_tool_result(state, &call, status, &turn.content)])
    }

    async fn handle_user(
        &self,
        thread_id: &str,
        state: &mut SessionState,
        turn: &Turn,
    ) -> Vec<AssistantReply> {
        state.force_stop = false;
        if let Some(kernel) = &turn.kernel_language {
            state.kernel_language = Some(kernel.clone());
        }
        if let Some(abandoned) = state.clear_tool_queue() {
            info!(thread_id, call_id = %abandoned.id, "user spoke while a tool call was pending; plan abandoned");
            state.drop_unresolved_call(&abandoned.id);
            state.phase = SessionPhase::Idle;
        }
        state.push(Message::user(turn.content.clone()));

        let decision = match self.resolver.resolve(&state.messages).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(thread_id, "intent resolution failed: {}", e);
                return vec![reply_text(
                    state,
                    format!("Sorry, something went wrong while understanding your request: {}", e),
                )];
            }
        };
        info!(thread_id, decision = decision.label(), "intent decision");

        let (reply, intent) = match decision {
            IntentDecision::Clarify { reply } | IntentDecision::Chat { reply } => {
                state.phase = SessionPhase::AwaitingClarification;
                let text = if reply.is_empty() {
                    EMPTY_CLARIFICATION.to_string()
                } else {
                    reply
                };
                return vec![reply_text(state, text)];
            }
            IntentDecision::HandOff { reply, intent } => (reply, intent),
        };

        state.intent = Some(intent.clone());
        state.phase = SessionPhase::Generating;
        let mut replies = Vec::new();
        if !reply.is_empty() {
            replies.push(reply_text(state, reply));
        }

        let kernel = state
            .kernel_language
            .clone()
            .unwrap_or_else(|| self.settings.default_kernel.clone());
        let generated = {
            let ctx = GenerationContext {
                intent: &intent,
                history: &state.messages,
                kernel_language: &kernel,
                notebook_name: state.notebook_name.as_deref(),
                references: &turn.references,
            };
            self.generator.generate(&ctx).await
        };

        match generated {
            Ok(Some(plan)) => {
                if let Some(name) = plan.created_notebook {
                    state.notebook_name = Some(name);
                }
                match self.sequencer.load_plan(state, plan.calls) {
                    Some(call) => replies.push(call),
                    None => {
                        state.phase = SessionPhase::AwaitingClarification;
                        replies.push(reply_text(state, GENERATION_GAVE_UP.to_string()));
                    }
                }
            }
            Ok(None) => {
                warn!(thread_id, "generation attempts exhausted");
                state.phase = SessionPhase::AwaitingClarification;
                replies.push(reply_text(state, GENERATION_GAVE_UP.to_string()));
            }
            Err(e) => {
                error!(thread_id, "notebook generation failed: {}", e);
                state.phase = SessionPhase::AwaitingClarification;
                replies.push(reply_text(
                    state,
                    format!("Sorry, something went wrong while generating the notebook: {}", e),
                ));
            }
        }
        replies
    }
}

fn reply_text(state: &mut SessionState, text: String) -> AssistantReply {
    let message = Message::assistant(text.clone());
    let reply = AssistantReply::text(message.id(), text);
    state.push(message);
    reply
}

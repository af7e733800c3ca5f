use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::agent::controller::SessionController;

pub mod constants;
pub mod message;
pub mod response;
pub mod session;

pub use message::{Message, ToolInvocation, ToolStatus};
pub use response::{AssistantReply, InvokeRequest, InvokeResponse, ReplyKind, TurnRole};
pub use session::{SessionPhase, SessionState};

// Application state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub started_at: DateTime<Utc>,
}

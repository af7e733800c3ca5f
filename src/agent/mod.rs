// Notebook agent orchestration core
pub mod controller;
pub mod error;
pub mod generator;
pub mod intent;
pub mod prompts;
pub mod sanitizer;
pub mod sequencer;
pub mod session_store;
pub mod tool_registry;

#[cfg(test)]
pub mod testing;

pub use controller::{SessionController, Turn, TurnOutcome};
pub use error::AgentError;
pub use session_store::{MemorySessionStore, SessionStore};

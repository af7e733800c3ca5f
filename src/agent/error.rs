use thiserror::Error;

use super::session_store::StoreError;
use crate::shared::inference::InferenceError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model error: {0}")]
    Model(#[from] InferenceError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Session conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(thread_id) => AgentError::Conflict(format!(
                "thread '{}' was modified concurrently",
                thread_id
            )),
            other => AgentError::Store(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

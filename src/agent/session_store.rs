use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::shared::models::SessionState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("version conflict on thread '{0}'")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// A session as loaded, together with the version a later write must match.
#[derive(Debug, Clone)]
pub struct VersionedSession {
    pub state: SessionState,
    pub version: u64,
}

/// Durable thread id -> session state map with per-key compare-and-swap.
///
/// Version 0 means "no stored session"; a swap against version 0 creates the
/// thread. Every successful swap returns the new version.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<VersionedSession>, StoreError>;

    async fn compare_and_swap(
        &self,
        thread_id: &str,
        expected_version: u64,
        state: &SessionState,
    ) -> Result<u64, StoreError>;

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// In-process store; the default when no database is configured.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, VersionedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, thread_id: &str) -> Result<Option<VersionedSession>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(thread_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        thread_id: &str,
        expected_version: u64,
        state: &SessionState,
    ) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(thread_id).map(|s| s.version).unwrap_or(0);
        if current != expected_version {
            return Err(StoreError::Conflict(thread_id.to_string()));
        }
        let version = current + 1;
        sessions.insert(
            thread_id.to_string(),
            VersionedSession {
                state: state.clone(),
                version,
            },
        );
        Ok(version)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(thread_id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Message;

    #[tokio::test]
    async fn swap_creates_then_advances_version() {
        let store = MemorySessionStore::new();
        assert!(store.load("t1").await.unwrap().is_none());

        let mut state = SessionState::new();
        let v1 = store.compare_and_swap("t1", 0, &state).await.unwrap();
        assert_eq!(v1, 1);

        state.push(Message::user("hello"));
        let v2 = store.compare_and_swap("t1", v1, &state).await.unwrap();
        assert_eq!(v2, 2);

        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.state.messages.len(), 1);
    }

    #[tokio::test]
    async fn stale_writer_loses() {
        let store = MemorySessionStore::new();
        let state = SessionState::new();
        store.compare_and_swap("t1", 0, &state).await.unwrap();

        // A second writer that also read version 0 must not overwrite
        let err = store.compare_and_swap("t1", 0, &state).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(id) if id == "t1"));
    }

    #[tokio::test]
    async fn delete_and_list() {
        let store = MemorySessionStore::new();
        let state = SessionState::new();
        store.compare_and_swap("b", 0, &state).await.unwrap();
        store.compare_and_swap("a", 0, &state).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.list().await.unwrap(), vec!["b"]);
    }
}

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{query, MySql, Pool, Row};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::agent::session_store::{SessionStore, StoreError, VersionedSession};
use crate::shared::models::SessionState;

/// Session store backed by the `agent_sessions` table. One row per thread;
/// `version` advances on every successful write.
#[derive(Clone)]
pub struct MySqlSessionStore {
    db: Arc<Pool<MySql>>,
}

impl MySqlSessionStore {
    pub fn new(db: Arc<Pool<MySql>>) -> Self {
        Self { db }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    // MySQL unique constraint violation (error code 1062)
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code == "23000" || code == "1062";
        }
    }
    false
}

fn backend(err: sqlx::Error) -> StoreError {
    error!("Session store query failed: {:?}", err);
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl SessionStore for MySqlSessionStore {
    async fn load(&self, thread_id: &str) -> Result<Option<VersionedSession>, StoreError> {
        let row = query(
            r#"
            SELECT state, version
            FROM agent_sessions
            WHERE thread_id = ?
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&*self.db)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: Json<SessionState> = row.try_get("state").map_err(backend)?;
        let version: i64 = row.try_get("version").map_err(backend)?;
        Ok(Some(VersionedSession {
            state: state.0,
            version: version.max(0) as u64,
        }))
    }

    async fn compare_and_swap(
        &self,
        thread_id: &str,
        expected_version: u64,
        state: &SessionState,
    ) -> Result<u64, StoreError> {
        if expected_version == 0 {
            let inserted = query(
                r#"
                INSERT INTO agent_sessions (thread_id, state, version)
                VALUES (?, ?, 1)
                "#,
            )
            .bind(thread_id)
            .bind(Json(state))
            .execute(&*self.db)
            .await;

            return match inserted {
                Ok(_) => Ok(1),
                Err(e) if is_unique_violation(&e) => {
                    warn!(thread_id, "session row created concurrently");
                    Err(StoreError::Conflict(thread_id.to_string()))
                }
                Err(e) => Err(backend(e)),
            };
        }

        let result = query(
            r#"
            UPDATE agent_sessions
            SET state = ?, version = version + 1, updated_at = CURRENT_TIMESTAMP
            WHERE thread_id = ? AND version = ?
            "#,
        )
        .bind(Json(state))
        .bind(thread_id)
        .bind(expected_version as i64)
        .execute(&*self.db)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(thread_id.to_string()));
        }
        Ok(expected_version + 1)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError> {
        let result = query("DELETE FROM agent_sessions WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&*self.db)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let rows = query("SELECT thread_id FROM agent_sessions ORDER BY thread_id")
            .fetch_all(&*self.db)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("thread_id").map_err(backend))
            .collect()
    }
}

// Database connection utilities
pub async fn init_session_store(
    database_url: &str,
) -> Result<MySqlSessionStore, Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing database connection");

    let db = Arc::new(sqlx::MySqlPool::connect(database_url).await.map_err(|e| {
        error!("Failed to connect to database: {}", e);
        e
    })?);

    info!("Database connected, running migrations");

    // Skip migrations if env var is set
    if std::env::var("SKIP_MIGRATIONS").is_ok() {
        info!("Skipping migrations (SKIP_MIGRATIONS set)");
    } else if let Err(e) = sqlx::migrate!("./db/migrations").run(&*db).await {
        error!("Migration failed: {}", e);
        let table_check = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM information_schema.tables
             WHERE table_schema = DATABASE() AND table_name = 'agent_sessions'",
        )
        .fetch_one(&*db)
        .await
        .unwrap_or(0);

        if table_check == 0 {
            error!("agent_sessions table does not exist and migrations failed");
            return Err(Box::new(e));
        }
        warn!("agent_sessions exists, continuing despite migration error");
    } else {
        info!("Database migrations completed");
    }

    Ok(MySqlSessionStore::new(db))
}

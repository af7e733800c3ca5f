use axum::{
    extract::State,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::rest::{handlers, logging_middleware::request_logging_middleware};
use crate::shared::models::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/info", get(info))
        // Conversation endpoints
        .route("/app", post(handlers::invoke::invoke))
        .route("/app/stream", post(handlers::invoke::invoke_stream))
        // Thread administration
        .route("/threads", get(handlers::threads::list_threads))
        .route("/threads/{threadid}", delete(handlers::threads::delete_thread))
        .with_state(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "v1"
    }))
}

async fn info(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": state.controller.registry().capability_names(),
        "accepted_tool_names": state.controller.registry().list_tools(),
        "started_at": state.started_at.to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedModel;
    use crate::agent::{MemorySessionStore, SessionController};
    use crate::shared::config::AgentSettings;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app(model: Arc<ScriptedModel>) -> Router {
        let controller = SessionController::new(
            Arc::new(MemorySessionStore::new()),
            model,
            &AgentSettings::default(),
        );
        create_router(Arc::new(AppState {
            controller: Arc::new(controller),
            started_at: chrono::Utc::now(),
        }))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn user_turn_returns_assistant_message() {
        let model = Arc::new(ScriptedModel::new());
        model.push_decision("clarify", "Which columns should the plot use?", "");
        let app = app(model);

        let response = app
            .oneshot(post("/app", json!({"threadid": 12, "role": "user", "content": "plot my data"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["type"], "ai");
        assert_eq!(body["role"], "assistant");
        assert_eq!(body["threadid"], "12");
        assert_eq!(body["content"], "Which columns should the plot use?");
        assert_eq!(body["tool_calls"], json!([]));
    }

    #[tokio::test]
    async fn stop_keyword_returns_stop_type() {
        let app = app(Arc::new(ScriptedModel::new()));
        let response = app
            .oneshot(post("/app", json!({"threadid": "t", "role": "user", "content": "system_stop"})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["type"], "stop");
        assert_eq!(body["content"], "");
    }

    #[tokio::test]
    async fn malformed_requests_are_bad_requests() {
        let app = app(Arc::new(ScriptedModel::new()));

        let response = app
            .clone()
            .oneshot(post("/app", json!({"threadid": "t", "role": "tool", "content": "{}", "status": "success"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["message"]
            .as_str()
            .unwrap()
            .contains("tool_call_id"));

        let response = app
            .oneshot(post("/app", json!({"threadid": "", "role": "user", "content": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_delivers_every_message_and_errors_inline() {
        let model = Arc::new(ScriptedModel::new());
        model.push_decision("handoff", "Starting now.", "Histogram of ages");
        model.push_calls(&[("create_notebook", json!({"name": "ages"}))]);
        let app = app(model);

        let response = app
            .clone()
            .oneshot(post("/app/stream", json!({"threadid": "s1", "role": "user", "content": "yes"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        let text = body_text(response).await;
        let events: Vec<Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["content"], "Starting now.");
        assert_eq!(events[1]["type"], "function");
        assert_eq!(events[1]["tool_calls"][0]["function"]["name"], "create_notebook");

        let response = app
            .oneshot(post(
                "/app/stream",
                json!({"threadid": "s1", "role": "tool", "tool_call_id": "call_wrong", "status": "success", "content": "ok"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("\"content\":\"Error: Bad request: no pending tool call"));
    }

    #[tokio::test]
    async fn thread_administration() {
        let model = Arc::new(ScriptedModel::new());
        model.push_decision("chat", "Hi!", "");
        let app = app(model);

        app.clone()
            .oneshot(post("/app", json!({"threadid": "a", "role": "user", "content": "hello"})))
            .await
            .unwrap();

        let listed = body_json(app.clone().oneshot(get("/threads")).await.unwrap()).await;
        assert_eq!(listed, json!({"threads": ["a"], "count": 1}));

        let delete = |id: &str| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/threads/{}", id))
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(delete("a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(delete("a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn info_lists_capabilities() {
        let app = app(Arc::new(ScriptedModel::new()));
        let body = body_json(app.oneshot(get("/info")).await.unwrap()).await;
        assert_eq!(body["name"], "nbagent");
        assert_eq!(
            body["capabilities"],
            json!(["create_notebook", "add_cell", "update_cell", "delete_cell", "run_cells"])
        );
    }
}

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::shared::models::AppState;

#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub threads: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ThreadDeletedResponse {
    pub threadid: String,
    pub deleted: bool,
}

pub async fn list_threads(State(state): State<Arc<AppState>>) -> ApiResult<Json<ThreadListResponse>> {
    let threads = state.controller.active_threads().await?;
    Ok(Json(ThreadListResponse {
        count: threads.len(),
        threads,
    }))
}

pub async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(threadid): Path<String>,
) -> ApiResult<Json<ThreadDeletedResponse>> {
    if !state.controller.clear_thread(&threadid).await? {
        return Err(ApiError::NotFound(format!("Thread '{}' not found", threadid)));
    }
    Ok(Json(ThreadDeletedResponse {
        threadid,
        deleted: true,
    }))
}

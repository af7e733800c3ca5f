use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde_json::Value;
use tracing::error;

use crate::agent::Turn;
use crate::api::rest::error::{ApiError, ApiResult};
use crate::shared::models::message::new_message_id;
use crate::shared::models::{AppState, AssistantReply, InvokeRequest, InvokeResponse};

fn parse_request(body: Value) -> ApiResult<InvokeRequest> {
    serde_json::from_value(body).map_err(|e| ApiError::BadRequest(format!("Invalid request: {}", e)))
}

pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<InvokeResponse>> {
    let request = parse_request(body)?;
    let threadid = request.threadid.clone();

    let outcome = state.controller.invoke(Turn::from(request)).await?;
    Ok(Json(outcome.final_reply().into_wire(&threadid)))
}

/// Same turn as `invoke`, delivered as one server-sent event per assistant
/// message. Turn failures arrive as a final `ai` event instead of a 5xx.
pub async fn invoke_stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let request = parse_request(body)?;
    let threadid = request.threadid.clone();

    let responses: Vec<InvokeResponse> = match state.controller.invoke(Turn::from(request)).await {
        Ok(outcome) => outcome
            .replies
            .into_iter()
            .map(|reply| reply.into_wire(&threadid))
            .collect(),
        Err(e) => {
            error!(thread_id = %threadid, "streamed turn failed: {}", e);
            vec![AssistantReply::text(new_message_id(), format!("Error: {}", e)).into_wire(&threadid)]
        }
    };

    let events = responses
        .into_iter()
        .map(|response| Event::default().json_data(response));
    Ok(Sse::new(futures::stream::iter(events)).keep_alive(KeepAlive::default()))
}

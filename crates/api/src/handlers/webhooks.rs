use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiResult;

/// Receive an external event for a webhook workflow.
///
/// 202 with the new execution when the event matches the workflow's
/// conditions, 200 with `{"matched": false}` when it does not.
pub async fn handle_webhook(
    Path(workflow_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(event): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    match state.engine.handle_event(workflow_id, &event).await? {
        Some(execution) => {
            info!(workflow_id = %workflow_id, execution_id = %execution.id, "webhook accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "matched": true, "execution": execution })),
            ))
        }
        None => Ok((StatusCode::OK, Json(json!({ "matched": false })))),
    }
}

use axum::{
    extract::{Path, State},
    Json,
};
use engine::Execution;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiResult;

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<Execution>> {
    let execution = state.engine.get_execution(id).await?;
    Ok(Json(execution))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use engine::{Execution, ScheduledRegistration};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::AppState;
use crate::error::ApiResult;

/// Run a workflow now.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<Execution>)> {
    let execution = state.engine.run_workflow(id).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    /// Live registration after the sync, if any.
    pub registration: Option<ScheduledRegistration>,
    /// Execution reserved for the first tick when a registration was
    /// created or replaced.
    pub execution: Option<Execution>,
}

/// Reconcile the workflow's cron registration with its stored definition.
/// Called by the CRUD layer after every create/update/toggle.
pub async fn sync_schedule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<ScheduleState>> {
    let execution = state.engine.sync_schedule(id).await?;
    let registration = state.engine.triggers().registration(id).await;
    Ok(Json(ScheduleState { registration, execution }))
}

/// Drop the workflow's cron registration, e.g. after deletion.
pub async fn cancel_schedule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let cancelled = state.engine.cancel_schedule(id).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

pub async fn list_schedules(State(state): State<AppState>) -> Json<Vec<ScheduledRegistration>> {
    Json(state.engine.triggers().registrations().await)
}

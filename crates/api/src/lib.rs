//! `api` crate — HTTP surface for triggering workflows.
//!
//! Exposes:
//!   POST   /api/v1/workflows/{id}/execute
//!   PUT    /api/v1/workflows/{id}/schedule
//!   DELETE /api/v1/workflows/{id}/schedule
//!   GET    /api/v1/schedules
//!   POST   /api/v1/webhook/{id}
//!   GET    /api/v1/executions/{id}
//!
//! Workflow definitions themselves are created and edited elsewhere; this
//! layer only turns requests into engine calls.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use engine::WorkflowEngine;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    use handlers::{executions, webhooks, workflows};

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/workflows/:id/execute", post(workflows::execute))
        .route(
            "/api/v1/workflows/:id/schedule",
            put(workflows::sync_schedule).delete(workflows::cancel_schedule),
        )
        .route("/api/v1/schedules", get(workflows::list_schedules))
        .route("/api/v1/webhook/:id", post(webhooks::handle_webhook))
        .route("/api/v1/executions/:id", get(executions::get))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    bind: &str,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

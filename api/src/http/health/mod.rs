use axum::{Json, extract::State, http::StatusCode};
use outbox_core::domain::outbox::{entities::OutboxCounts, observer::DispatchStatsSnapshot};
use serde::Serialize;

use crate::http::server::AppState;

pub mod routes;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub outbox: Option<OutboxCounts>,
    pub dispatcher: DispatchStatsSnapshot,
}

/// Reports ledger totals and dispatcher counters. Answers 503 while the ledger
/// cannot be read.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let dispatcher = state.stats.snapshot();
    match state.admin.outbox_counts().await {
        Ok(counts) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                outbox: Some(counts),
                dispatcher,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read the outbox");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    outbox: None,
                    dispatcher,
                }),
            )
        }
    }
}

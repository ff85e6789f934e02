use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use outbox_core::domain::outbox::entities::{OutboxEntry, OutboxEntryId, OutboxState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http::server::{ApiError, AppState};

const DEFAULT_FAILED_LIMIT: usize = 50;
const MAX_FAILED_LIMIT: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct FailedQuery {
    pub limit: Option<usize>,
}

/// Operator view of an outbox entry. The payload is shown as text when it is
/// valid UTF-8 (entity payloads are JSON).
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct OutboxEntryView {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub topic: String,
    pub state: OutboxState,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub payload: Option<String>,
}

impl From<OutboxEntry> for OutboxEntryView {
    fn from(entry: OutboxEntry) -> Self {
        Self {
            id: entry.id.0,
            payload: String::from_utf8(entry.payload).ok(),
            aggregate_type: entry.aggregate_type,
            aggregate_id: entry.aggregate_id,
            topic: entry.topic,
            state: entry.state,
            attempts: entry.attempts,
            created_at: entry.created_at,
            last_attempted_at: entry.last_attempted_at,
            published_at: entry.published_at,
            next_attempt_at: entry.next_attempt_at,
            last_error: entry.last_error,
        }
    }
}

pub async fn list_failed_entries(
    State(state): State<AppState>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<Vec<OutboxEntryView>>, ApiError> {
    let limit = match query.limit {
        Some(0) => return Err(ApiError::BadRequest("limit must be positive".to_string())),
        Some(limit) => limit.min(MAX_FAILED_LIMIT),
        None => DEFAULT_FAILED_LIMIT,
    };
    let entries = state.admin.list_failed(limit).await?;
    Ok(Json(entries.into_iter().map(OutboxEntryView::from).collect()))
}

pub async fn get_outbox_entry(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<OutboxEntryView>, ApiError> {
    let entry = state.admin.outbox_entry(&OutboxEntryId::from(id)).await?;
    Ok(Json(entry.into()))
}

/// Gives a `FAILED` entry one more delivery attempt. Requeueing an entry that is
/// already pending is a no-op; a published entry is a conflict.
pub async fn requeue_entry(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<OutboxEntryView>, ApiError> {
    let entry = state.admin.requeue_failed(&OutboxEntryId::from(id)).await?;
    if entry.state != OutboxState::Pending {
        return Err(ApiError::Conflict(format!(
            "Outbox entry {} is {} and cannot be requeued",
            id, entry.state
        )));
    }
    Ok(Json(entry.into()))
}

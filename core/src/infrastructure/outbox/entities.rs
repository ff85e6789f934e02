use mongodb::bson::{Binary, DateTime as BsonDateTime, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    common::CoreError,
    outbox::entities::{OutboxEntry, OutboxEntryId, OutboxState},
};

pub const OUTBOX_COLLECTION: &str = "outbox_messages";

/// Stored shape of an outbox entry.
///
/// `_id` is the hyphenated UUID v7 string, so sorting by `_id` follows creation
/// order. The payload is kept as generic binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: Binary,
    pub topic: String,
    pub state: OutboxState,
    pub attempts: i64,
    pub created_at: BsonDateTime,
    pub last_attempted_at: Option<BsonDateTime>,
    pub published_at: Option<BsonDateTime>,
    pub next_attempt_at: BsonDateTime,
    pub last_error: Option<String>,
}

impl From<&OutboxEntry> for OutboxDocument {
    fn from(entry: &OutboxEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            aggregate_type: entry.aggregate_type.clone(),
            aggregate_id: entry.aggregate_id.clone(),
            payload: Binary {
                subtype: BinarySubtype::Generic,
                bytes: entry.payload.clone(),
            },
            topic: entry.topic.clone(),
            state: entry.state,
            attempts: i64::from(entry.attempts),
            created_at: BsonDateTime::from_chrono(entry.created_at),
            last_attempted_at: entry.last_attempted_at.map(BsonDateTime::from_chrono),
            published_at: entry.published_at.map(BsonDateTime::from_chrono),
            next_attempt_at: BsonDateTime::from_chrono(entry.next_attempt_at),
            last_error: entry.last_error.clone(),
        }
    }
}

impl TryFrom<OutboxDocument> for OutboxEntry {
    type Error = CoreError;

    fn try_from(document: OutboxDocument) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&document.id).map_err(|e| CoreError::SerializationError {
            msg: format!("Invalid outbox _id {}: {}", document.id, e),
        })?;
        let attempts =
            u32::try_from(document.attempts).map_err(|e| CoreError::SerializationError {
                msg: format!("Invalid attempts in outbox document {}: {}", document.id, e),
            })?;

        Ok(OutboxEntry {
            id: OutboxEntryId::from(id),
            aggregate_type: document.aggregate_type,
            aggregate_id: document.aggregate_id,
            payload: document.payload.bytes,
            topic: document.topic,
            state: document.state,
            attempts,
            created_at: document.created_at.to_chrono(),
            last_attempted_at: document.last_attempted_at.map(BsonDateTime::to_chrono),
            published_at: document.published_at.map(BsonDateTime::to_chrono),
            next_attempt_at: document.next_attempt_at.to_chrono(),
            last_error: document.last_error,
        })
    }
}

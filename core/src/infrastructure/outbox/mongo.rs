use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    Collection, Database, IndexModel,
    bson::{self, DateTime as BsonDateTime, Document, doc},
    options::FindOptions,
};

use crate::{
    domain::{
        common::CoreError,
        outbox::{
            entities::{FailureTransition, OutboxCounts, OutboxEntry, OutboxEntryId, OutboxState},
            ports::OutboxLedger,
        },
    },
    infrastructure::outbox::entities::{OUTBOX_COLLECTION, OutboxDocument},
};

#[derive(Clone)]
pub struct MongoOutboxLedger {
    collection: Collection<OutboxDocument>,
}

impl MongoOutboxLedger {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection::<OutboxDocument>(OUTBOX_COLLECTION),
        }
    }

    pub fn collection(&self) -> &Collection<OutboxDocument> {
        &self.collection
    }

    /// Index backing the oldest-first pending poll and its per-aggregate window.
    pub async fn ensure_indexes(&self) -> Result<(), CoreError> {
        let index = IndexModel::builder()
            .keys(doc! { "state": 1, "created_at": 1, "_id": 1 })
            .build();
        self.collection
            .create_index(index)
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to create outbox index: {}", e),
            })?;
        Ok(())
    }

    async fn collect(
        &self,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<OutboxEntry>, CoreError> {
        let mut cursor = self
            .collection
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to query outbox: {}", e),
            })?;

        let mut entries = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to read outbox document: {}", e),
            })?
        {
            entries.push(OutboxEntry::try_from(document)?);
        }

        Ok(entries)
    }

    async fn count_state(&self, state: OutboxState) -> Result<u64, CoreError> {
        self.collection
            .count_documents(doc! { "state": state.as_str() })
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to count {} outbox entries: {}", state, e),
            })
    }
}

impl OutboxLedger for MongoOutboxLedger {
    async fn fetch_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, CoreError> {
        // Tag every pending entry with the next_attempt_at of its aggregate's
        // oldest pending entry, then keep only aggregates whose head is due.
        let pipeline = vec![
            doc! { "$match": { "state": OutboxState::Pending.as_str() } },
            doc! {
                "$setWindowFields": {
                    "partitionBy": { "type": "$aggregate_type", "id": "$aggregate_id" },
                    "sortBy": { "created_at": 1, "_id": 1 },
                    "output": {
                        "head_next_attempt_at": {
                            "$first": "$next_attempt_at",
                            "window": { "documents": ["unbounded", "current"] },
                        }
                    },
                }
            },
            doc! { "$match": { "head_next_attempt_at": { "$lte": BsonDateTime::from_chrono(now) } } },
            doc! { "$sort": { "created_at": 1, "_id": 1 } },
            doc! { "$limit": i64::try_from(limit).unwrap_or(i64::MAX) },
            doc! { "$unset": "head_next_attempt_at" },
        ];

        let mut cursor = self
            .collection
            .aggregate(pipeline)
            .allow_disk_use(true)
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to query pending outbox entries: {}", e),
            })?;

        let mut entries = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to read outbox document: {}", e),
            })?
        {
            let document: OutboxDocument =
                bson::from_document(document).map_err(|e| CoreError::SerializationError {
                    msg: format!("Invalid pending outbox document: {}", e),
                })?;
            entries.push(OutboxEntry::try_from(document)?);
        }

        Ok(entries)
    }

    async fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>, CoreError> {
        self.collection
            .find_one(doc! { "_id": id.to_string() })
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to load outbox entry {}: {}", id, e),
            })?
            .map(OutboxEntry::try_from)
            .transpose()
    }

    async fn mark_published(
        &self,
        id: &OutboxEntryId,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let at = BsonDateTime::from_chrono(at);
        let result = self
            .collection
            .update_one(
                doc! { "_id": id.to_string(), "state": OutboxState::Pending.as_str() },
                doc! {
                    "$set": {
                        "state": OutboxState::Published.as_str(),
                        "published_at": at,
                        "last_attempted_at": at,
                    }
                },
            )
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to mark outbox entry {} as published: {}", id, e),
            })?;

        Ok(result.matched_count == 1)
    }

    async fn record_failure(
        &self,
        id: &OutboxEntryId,
        expected_attempts: u32,
        transition: &FailureTransition,
    ) -> Result<bool, CoreError> {
        let result = self
            .collection
            .update_one(
                doc! {
                    "_id": id.to_string(),
                    "state": OutboxState::Pending.as_str(),
                    "attempts": i64::from(expected_attempts),
                },
                doc! {
                    "$set": {
                        "state": transition.state.as_str(),
                        "attempts": i64::from(transition.attempts),
                        "last_attempted_at": BsonDateTime::from_chrono(transition.last_attempted_at),
                        "next_attempt_at": BsonDateTime::from_chrono(transition.next_attempt_at),
                        "last_error": transition.last_error.as_str(),
                    }
                },
            )
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to record delivery failure for {}: {}", id, e),
            })?;

        Ok(result.matched_count == 1)
    }

    async fn requeue(&self, id: &OutboxEntryId, at: DateTime<Utc>) -> Result<bool, CoreError> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": id.to_string(), "state": OutboxState::Failed.as_str() },
                doc! {
                    "$set": {
                        "state": OutboxState::Pending.as_str(),
                        "next_attempt_at": BsonDateTime::from_chrono(at),
                    }
                },
            )
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to requeue outbox entry {}: {}", id, e),
            })?;

        Ok(result.matched_count == 1)
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<OutboxEntry>, CoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "last_attempted_at": -1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .build();

        self.collect(doc! { "state": OutboxState::Failed.as_str() }, options)
            .await
    }

    async fn counts(&self) -> Result<OutboxCounts, CoreError> {
        Ok(OutboxCounts {
            pending: self.count_state(OutboxState::Pending).await?,
            published: self.count_state(OutboxState::Published).await?,
            failed: self.count_state(OutboxState::Failed).await?,
        })
    }
}

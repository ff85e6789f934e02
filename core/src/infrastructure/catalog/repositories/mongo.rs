use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection,
    bson::{Document, doc, oid::ObjectId},
    error::UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use tracing::warn;

use crate::{
    domain::{
        catalog::entities::{Entity, EntityId, EntityKind},
        common::CoreError,
        outbox::{
            entities::{OutboxEntry, OutboxEntryId},
            ports::RecordStore,
        },
    },
    infrastructure::outbox::{OUTBOX_COLLECTION, OutboxDocument, write_outbox_entry},
};

const COMMIT_RETRIES: usize = 3;

/// Entity documents live in one database and collection per entity kind
/// (`orderDB.orders`, ...); every save also inserts into the shared outbox
/// collection within the same multi-document transaction. Requires a replica
/// set or sharded cluster.
#[derive(Clone)]
pub struct MongoRecordStore {
    client: Client,
    outbox: Collection<OutboxDocument>,
}

impl MongoRecordStore {
    pub fn new(client: Client, outbox_database: &str) -> Self {
        let outbox = client
            .database(outbox_database)
            .collection::<OutboxDocument>(OUTBOX_COLLECTION);
        Self { client, outbox }
    }

    fn collection<E: Entity>(&self) -> Collection<Document> {
        self.client
            .database(E::KIND.database())
            .collection::<Document>(E::KIND.collection())
    }

    async fn insert_both(
        &self,
        session: &mut ClientSession,
        entity_collection: &Collection<Document>,
        document: Document,
        entry: &OutboxEntry,
    ) -> Result<OutboxEntryId, CoreError> {
        entity_collection
            .insert_one(document)
            .session(&mut *session)
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to insert {} document: {}", entry.aggregate_type, e),
            })?;

        write_outbox_entry(&self.outbox, session, entry).await
    }

    async fn replace_both(
        &self,
        session: &mut ClientSession,
        entity_collection: &Collection<Document>,
        kind: EntityKind,
        id: &EntityId,
        document: Document,
        entry: &OutboxEntry,
    ) -> Result<OutboxEntryId, CoreError> {
        let replaced = entity_collection
            .replace_one(doc! { "_id": id.as_str() }, document)
            .session(&mut *session)
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to replace {} document: {}", entry.aggregate_type, e),
            })?;
        if replaced.matched_count == 0 {
            return Err(CoreError::EntityNotFound {
                kind,
                id: id.to_string(),
            });
        }

        write_outbox_entry(&self.outbox, session, entry).await
    }

    async fn begin(&self) -> Result<ClientSession, CoreError> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to start session: {}", e),
            })?;
        session
            .start_transaction()
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to start transaction: {}", e),
            })?;
        Ok(session)
    }

    /// Commits when the writes succeeded, aborts otherwise.
    async fn settle(
        session: &mut ClientSession,
        written: Result<OutboxEntryId, CoreError>,
        entity_id: &EntityId,
    ) -> Result<OutboxEntryId, CoreError> {
        match written {
            Ok(entry_id) => {
                Self::commit(session).await?;
                Ok(entry_id)
            }
            Err(e) => {
                if let Err(abort_error) = session.abort_transaction().await {
                    warn!(
                        entity_id = %entity_id,
                        error = %abort_error,
                        "Failed to abort transaction"
                    );
                }
                Err(e)
            }
        }
    }

    async fn commit(session: &mut ClientSession) -> Result<(), CoreError> {
        let mut attempt = 1;
        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(e)
                    if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                        && attempt < COMMIT_RETRIES =>
                {
                    warn!(attempt, error = %e, "Commit result unknown, retrying commit");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(CoreError::StorageError {
                        msg: format!("Failed to commit transaction: {}", e),
                    });
                }
            }
        }
    }
}

/// The entity serializes its id as `id`; MongoDB keys documents by `_id`.
fn entity_to_document<E: Entity>(entity: &E) -> Result<Document, CoreError> {
    let mut document = mongodb::bson::to_document(entity)
        .map_err(|e| CoreError::SerializationError { msg: e.to_string() })?;
    if let Some(id) = document.remove("id") {
        document.insert("_id", id);
    }
    Ok(document)
}

fn document_to_entity<E: Entity>(mut document: Document) -> Result<E, CoreError> {
    if let Some(id) = document.remove("_id") {
        document.insert("id", id);
    }
    mongodb::bson::from_document(document)
        .map_err(|e| CoreError::SerializationError { msg: e.to_string() })
}

impl RecordStore for MongoRecordStore {
    async fn save_with_event<E: Entity>(
        &self,
        mut entity: E,
        topic: &str,
    ) -> Result<(EntityId, OutboxEntryId), CoreError> {
        let entity_id = entity
            .id()
            .cloned()
            .unwrap_or_else(|| EntityId(ObjectId::new().to_hex()));
        entity.set_id(entity_id.clone());

        let document = entity_to_document(&entity)?;
        let entry = OutboxEntry::for_entity(&entity, topic, Utc::now())?;
        let entity_collection = self.collection::<E>();

        let mut session = self.begin().await?;
        let written = self
            .insert_both(&mut session, &entity_collection, document, &entry)
            .await;
        let entry_id = Self::settle(&mut session, written, &entity_id).await?;

        Ok((entity_id, entry_id))
    }

    async fn update_with_event<E: Entity>(
        &self,
        entity: E,
        topic: &str,
    ) -> Result<OutboxEntryId, CoreError> {
        let entity_id = entity.id().cloned().ok_or_else(|| {
            CoreError::invalid(E::KIND, "an update needs the id of an existing document")
        })?;

        let document = entity_to_document(&entity)?;
        let entry = OutboxEntry::for_entity(&entity, topic, Utc::now())?;
        let entity_collection = self.collection::<E>();

        let mut session = self.begin().await?;
        let written = self
            .replace_both(
                &mut session,
                &entity_collection,
                E::KIND,
                &entity_id,
                document,
                &entry,
            )
            .await;
        Self::settle(&mut session, written, &entity_id).await
    }

    async fn find_by_id<E: Entity>(&self, id: &EntityId) -> Result<Option<E>, CoreError> {
        self.collection::<E>()
            .find_one(doc! { "_id": id.as_str() })
            .await
            .map_err(|e| CoreError::StorageError { msg: e.to_string() })?
            .map(document_to_entity::<E>)
            .transpose()
    }

    async fn list<E: Entity>(&self) -> Result<Vec<E>, CoreError> {
        let mut cursor = self
            .collection::<E>()
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to list {} documents: {}", E::KIND, e),
            })?;

        let mut entities = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to read {} document: {}", E::KIND, e),
            })?
        {
            entities.push(document_to_entity::<E>(document)?);
        }
        Ok(entities)
    }

    async fn delete<E: Entity>(&self, id: &EntityId) -> Result<bool, CoreError> {
        let result = self
            .collection::<E>()
            .delete_one(doc! { "_id": id.as_str() })
            .await
            .map_err(|e| CoreError::StorageError {
                msg: format!("Failed to delete {} {}: {}", E::KIND, id, e),
            })?;
        Ok(result.deleted_count == 1)
    }
}

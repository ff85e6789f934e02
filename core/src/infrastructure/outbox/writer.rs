use mongodb::{ClientSession, Collection};

use crate::{
    domain::{
        common::CoreError,
        outbox::entities::{OutboxEntry, OutboxEntryId},
    },
    infrastructure::outbox::entities::OutboxDocument,
};

/// Write an outbox entry inside an open MongoDB transaction.
///
/// The insert joins the transaction carried by `session`, so the entry only
/// becomes visible to the dispatcher when the caller commits, and disappears
/// with everything else if the caller aborts.
///
/// # Example
///
/// ```rust,no_run
/// use chrono::Utc;
/// use mongodb::Client;
/// use outbox_core::domain::outbox::entities::OutboxEntry;
/// use outbox_core::infrastructure::outbox::{OUTBOX_COLLECTION, OutboxDocument, write_outbox_entry};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::with_uri_str("mongodb://localhost:27017/?replicaSet=rs0").await?;
///     let outbox = client
///         .database("outboxDB")
///         .collection::<OutboxDocument>(OUTBOX_COLLECTION);
///
///     let mut session = client.start_session().await?;
///     session.start_transaction().await?;
///
///     let entry = OutboxEntry::new("order", "order-123", "Order_Topic_One", b"{}".to_vec(), Utc::now());
///     let _entry_id = write_outbox_entry(&outbox, &mut session, &entry).await?;
///     session.commit_transaction().await?;
///     Ok(())
/// }
/// ```
pub async fn write_outbox_entry(
    collection: &Collection<OutboxDocument>,
    session: &mut ClientSession,
    entry: &OutboxEntry,
) -> Result<OutboxEntryId, CoreError> {
    collection
        .insert_one(OutboxDocument::from(entry))
        .session(session)
        .await
        .map_err(|e| CoreError::StorageError {
            msg: format!("Failed to write outbox entry {}: {}", entry.id, e),
        })?;

    Ok(entry.id)
}

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{
    common::{CoreError, services::Service},
    outbox::{
        entities::{OutboxCounts, OutboxEntry, OutboxEntryId, OutboxState},
        ports::{OutboxAdmin, OutboxLedger, RecordStore},
    },
};

#[async_trait]
impl<S, L> OutboxAdmin for Service<S, L>
where
    S: RecordStore,
    L: OutboxLedger,
{
    async fn outbox_entry(&self, id: &OutboxEntryId) -> Result<OutboxEntry, CoreError> {
        self.outbox_ledger
            .get(id)
            .await?
            .ok_or(CoreError::OutboxEntryNotFound { id: *id })
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<OutboxEntry>, CoreError> {
        self.outbox_ledger.list_failed(limit).await
    }

    async fn requeue_failed(&self, id: &OutboxEntryId) -> Result<OutboxEntry, CoreError> {
        let requeued = self.outbox_ledger.requeue(id, Utc::now()).await?;
        let entry = self.outbox_entry(id).await?;

        if requeued {
            tracing::info!(
                entry_id = %id,
                attempts = entry.attempts,
                "Failed outbox entry requeued"
            );
        } else if entry.state != OutboxState::Pending {
            tracing::debug!(entry_id = %id, state = %entry.state, "Outbox entry not requeued");
        }

        Ok(entry)
    }

    async fn outbox_counts(&self) -> Result<OutboxCounts, CoreError> {
        self.outbox_ledger.counts().await
    }
}

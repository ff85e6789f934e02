use crate::domain::{
    catalog::entities::TopicRouting,
    outbox::ports::{OutboxLedger, RecordStore},
};

/// Application service shared by the entity write path and the outbox admin surface.
#[derive(Clone)]
pub struct Service<S, L>
where
    S: RecordStore,
    L: OutboxLedger,
{
    pub(crate) record_store: S,
    pub(crate) outbox_ledger: L,
    pub(crate) topics: TopicRouting,
}

impl<S, L> Service<S, L>
where
    S: RecordStore,
    L: OutboxLedger,
{
    pub fn new(record_store: S, outbox_ledger: L, topics: TopicRouting) -> Self {
        Self {
            record_store,
            outbox_ledger,
            topics,
        }
    }

    pub fn topics(&self) -> &TopicRouting {
        &self.topics
    }
}

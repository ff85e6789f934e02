use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    catalog::entities::{Entity, EntityId, EntityKind},
    common::CoreError,
    outbox::entities::{
        FailureTransition, OutboxCounts, OutboxEntry, OutboxEntryId, OutboxState,
    },
};

/// Persists entity documents together with their outbox entries.
pub trait RecordStore: Send + Sync {
    /// Writes the entity document and a `PENDING` outbox entry for `topic` as one
    /// atomic unit. On error neither the document nor the entry exists.
    ///
    /// The store assigns an id when the entity has none.
    fn save_with_event<E: Entity>(
        &self,
        entity: E,
        topic: &str,
    ) -> impl Future<Output = Result<(EntityId, OutboxEntryId), CoreError>> + Send;

    /// Replaces an existing document and enqueues its new state, atomically.
    /// Fails with `EntityNotFound` (and writes nothing) when no document has the
    /// entity's id.
    fn update_with_event<E: Entity>(
        &self,
        entity: E,
        topic: &str,
    ) -> impl Future<Output = Result<OutboxEntryId, CoreError>> + Send;

    fn find_by_id<E: Entity>(
        &self,
        id: &EntityId,
    ) -> impl Future<Output = Result<Option<E>, CoreError>> + Send;

    fn list<E: Entity>(&self) -> impl Future<Output = Result<Vec<E>, CoreError>> + Send;

    /// Returns `false` when there was nothing to delete.
    fn delete<E: Entity>(
        &self,
        id: &EntityId,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;
}

/// Durable log of outbox entries. Every state change is a conditional update
/// guarded by the entry's current state; the boolean results report whether
/// this caller's update won.
pub trait OutboxLedger: Send + Sync {
    /// `PENDING` entries, oldest first (`created_at`, then id), restricted to
    /// aggregates whose oldest pending entry is due at `now`. Aggregates that are
    /// backing off are left out entirely so they cannot fill the batch.
    fn fetch_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<OutboxEntry>, CoreError>> + Send;

    fn get(
        &self,
        id: &OutboxEntryId,
    ) -> impl Future<Output = Result<Option<OutboxEntry>, CoreError>> + Send;

    /// `PENDING -> PUBLISHED`.
    fn mark_published(
        &self,
        id: &OutboxEntryId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;

    /// Applies `transition` if the entry is still `PENDING` with `expected_attempts`.
    fn record_failure(
        &self,
        id: &OutboxEntryId,
        expected_attempts: u32,
        transition: &FailureTransition,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;

    /// `FAILED -> PENDING`, due immediately.
    fn requeue(
        &self,
        id: &OutboxEntryId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;

    fn list_failed(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<OutboxEntry>, CoreError>> + Send;

    fn counts(&self) -> impl Future<Output = Result<OutboxCounts, CoreError>> + Send;
}

/// A message handed to the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Partition key, the aggregate id.
    pub key: String,
    /// Consumers drop messages whose key they have already seen.
    pub dedup_key: OutboxEntryId,
    pub payload: Vec<u8>,
}

impl From<&OutboxEntry> for OutboundMessage {
    fn from(entry: &OutboxEntry) -> Self {
        Self {
            topic: entry.topic.clone(),
            key: entry.aggregate_id.clone(),
            dedup_key: entry.id,
            payload: entry.payload.clone(),
        }
    }
}

pub type DeliveryResult = Result<(), CoreError>;

pub trait BrokerClient: Send + Sync {
    /// Resolves once the broker confirmed or rejected the message. Callers bound
    /// the wait with their own timeout.
    fn publish(&self, message: OutboundMessage) -> impl Future<Output = DeliveryResult> + Send;
}

/// Operator surface over the ledger.
#[async_trait]
pub trait OutboxAdmin: Send + Sync {
    async fn outbox_entry(&self, id: &OutboxEntryId) -> Result<OutboxEntry, CoreError>;

    async fn list_failed(&self, limit: usize) -> Result<Vec<OutboxEntry>, CoreError>;

    /// Puts a permanently failed entry back in the queue for one more attempt.
    async fn requeue_failed(&self, id: &OutboxEntryId) -> Result<OutboxEntry, CoreError>;

    async fn outbox_counts(&self) -> Result<OutboxCounts, CoreError>;
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<(EntityKind, EntityId), serde_json::Value>,
    entries: Vec<OutboxEntry>,
    fail_next_commit: bool,
}

/// In-memory record store and ledger sharing one lock, so a save is atomic.
#[derive(Clone, Default)]
pub struct MockOutboxStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MockOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `save_with_event` fail at commit time.
    pub fn fail_next_commit(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next_commit = true;
        }
    }

    pub fn document_count(&self, kind: EntityKind) -> usize {
        self.state
            .lock()
            .map(|state| state.documents.keys().filter(|(k, _)| *k == kind).count())
            .unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.state
            .lock()
            .map(|state| state.entries.clone())
            .unwrap_or_default()
    }

    pub fn entries_for(&self, aggregate_id: &str) -> Vec<OutboxEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.aggregate_id == aggregate_id)
            .collect()
    }

    /// Inserts an entry directly, bypassing the entity write.
    pub fn push_entry(&self, entry: OutboxEntry) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.push(entry);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, CoreError> {
        self.state
            .lock()
            .map_err(|_| CoreError::storage("in-memory store lock poisoned"))
    }
}

impl RecordStore for MockOutboxStore {
    async fn save_with_event<E: Entity>(
        &self,
        mut entity: E,
        topic: &str,
    ) -> Result<(EntityId, OutboxEntryId), CoreError> {
        let mut state = self.lock()?;

        let entity_id = entity
            .id()
            .cloned()
            .unwrap_or_else(|| EntityId(Uuid::new_v4().simple().to_string()));
        entity.set_id(entity_id.clone());

        let key = (E::KIND, entity_id.clone());
        if state.documents.contains_key(&key) {
            return Err(CoreError::storage(format!(
                "duplicate {} id {}",
                E::KIND,
                entity_id
            )));
        }

        let document = serde_json::to_value(&entity)
            .map_err(|e| CoreError::SerializationError { msg: e.to_string() })?;
        let entry = OutboxEntry::for_entity(&entity, topic, Utc::now())?;

        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(CoreError::storage("simulated commit failure"));
        }

        let entry_id = entry.id;
        state.documents.insert(key, document);
        state.entries.push(entry);

        Ok((entity_id, entry_id))
    }

    async fn update_with_event<E: Entity>(
        &self,
        entity: E,
        topic: &str,
    ) -> Result<OutboxEntryId, CoreError> {
        let mut state = self.lock()?;

        let entity_id = entity.id().cloned().ok_or_else(|| {
            CoreError::invalid(E::KIND, "an update needs the id of an existing document")
        })?;
        let key = (E::KIND, entity_id.clone());
        if !state.documents.contains_key(&key) {
            return Err(CoreError::EntityNotFound {
                kind: E::KIND,
                id: entity_id.to_string(),
            });
        }

        let document = serde_json::to_value(&entity)
            .map_err(|e| CoreError::SerializationError { msg: e.to_string() })?;
        let entry = OutboxEntry::for_entity(&entity, topic, Utc::now())?;

        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(CoreError::storage("simulated commit failure"));
        }

        let entry_id = entry.id;
        state.documents.insert(key, document);
        state.entries.push(entry);

        Ok(entry_id)
    }

    async fn find_by_id<E: Entity>(&self, id: &EntityId) -> Result<Option<E>, CoreError> {
        let state = self.lock()?;
        state
            .documents
            .get(&(E::KIND, id.clone()))
            .map(|document| {
                serde_json::from_value(document.clone())
                    .map_err(|e| CoreError::SerializationError { msg: e.to_string() })
            })
            .transpose()
    }

    async fn list<E: Entity>(&self) -> Result<Vec<E>, CoreError> {
        let state = self.lock()?;
        let mut documents: Vec<_> = state
            .documents
            .iter()
            .filter(|((kind, _), _)| *kind == E::KIND)
            .collect();
        documents.sort_by(|(a, _), (b, _)| a.1.as_str().cmp(b.1.as_str()));
        documents
            .into_iter()
            .map(|(_, document)| {
                serde_json::from_value(document.clone())
                    .map_err(|e| CoreError::SerializationError { msg: e.to_string() })
            })
            .collect()
    }

    async fn delete<E: Entity>(&self, id: &EntityId) -> Result<bool, CoreError> {
        let mut state = self.lock()?;
        Ok(state.documents.remove(&(E::KIND, id.clone())).is_some())
    }
}

impl OutboxLedger for MockOutboxStore {
    async fn fetch_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, CoreError> {
        let state = self.lock()?;
        let mut pending: Vec<OutboxEntry> = state
            .entries
            .iter()
            .filter(|entry| entry.state == OutboxState::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        // The first pending entry seen per aggregate is its head.
        let mut head_due: HashMap<String, bool> = HashMap::new();
        for entry in &pending {
            head_due
                .entry(entry.partition_key())
                .or_insert_with(|| entry.is_due(now));
        }
        pending.retain(|entry| head_due.get(&entry.partition_key()).copied().unwrap_or(false));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>, CoreError> {
        let state = self.lock()?;
        Ok(state.entries.iter().find(|entry| &entry.id == id).cloned())
    }

    async fn mark_published(
        &self,
        id: &OutboxEntryId,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut state = self.lock()?;
        match state
            .entries
            .iter_mut()
            .find(|entry| &entry.id == id && entry.state == OutboxState::Pending)
        {
            Some(entry) => {
                entry.apply_published(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        id: &OutboxEntryId,
        expected_attempts: u32,
        transition: &FailureTransition,
    ) -> Result<bool, CoreError> {
        let mut state = self.lock()?;
        match state.entries.iter_mut().find(|entry| {
            &entry.id == id
                && entry.state == OutboxState::Pending
                && entry.attempts == expected_attempts
        }) {
            Some(entry) => {
                entry.apply_failure(transition);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn requeue(&self, id: &OutboxEntryId, at: DateTime<Utc>) -> Result<bool, CoreError> {
        let mut state = self.lock()?;
        match state
            .entries
            .iter_mut()
            .find(|entry| &entry.id == id && entry.state == OutboxState::Failed)
        {
            Some(entry) => {
                entry.apply_requeue(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<OutboxEntry>, CoreError> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.state == OutboxState::Failed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<OutboxCounts, CoreError> {
        let state = self.lock()?;
        let mut counts = OutboxCounts::default();
        for entry in &state.entries {
            match entry.state {
                OutboxState::Pending => counts.pending += 1,
                OutboxState::Published => counts.published += 1,
                OutboxState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

/// What the mock broker does with the next publish call.
#[derive(Clone, Debug)]
pub enum BrokerBehavior {
    Deliver,
    Reject(String),
    /// Never confirms; the caller's timeout decides.
    Stall,
    /// Confirms after the delay, yielding to other tasks meanwhile.
    Delay(Duration),
    /// Rejects after the delay.
    RejectAfter(Duration, String),
}

/// Scripted broker. Calls beyond the script are delivered.
#[derive(Clone, Default)]
pub struct MockBrokerClient {
    script: Arc<Mutex<VecDeque<BrokerBehavior>>>,
    attempts: Arc<Mutex<Vec<OutboundMessage>>>,
    delivered: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(behaviors: impl IntoIterator<Item = BrokerBehavior>) -> Self {
        let broker = Self::default();
        broker.enqueue(behaviors);
        broker
    }

    pub fn enqueue(&self, behaviors: impl IntoIterator<Item = BrokerBehavior>) {
        if let Ok(mut script) = self.script.lock() {
            script.extend(behaviors);
        }
    }

    /// Every publish call, including rejected and stalled ones.
    pub fn attempts(&self) -> Vec<OutboundMessage> {
        self.attempts
            .lock()
            .map(|attempts| attempts.clone())
            .unwrap_or_default()
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.delivered
            .lock()
            .map(|delivered| delivered.clone())
            .unwrap_or_default()
    }

    fn confirm(&self, message: OutboundMessage) -> DeliveryResult {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(message);
        }
        Ok(())
    }
}

impl BrokerClient for MockBrokerClient {
    async fn publish(&self, message: OutboundMessage) -> DeliveryResult {
        let behavior = {
            if let Ok(mut attempts) = self.attempts.lock() {
                attempts.push(message.clone());
            }
            self.script
                .lock()
                .ok()
                .and_then(|mut script| script.pop_front())
                .unwrap_or(BrokerBehavior::Deliver)
        };

        match behavior {
            BrokerBehavior::Deliver => self.confirm(message),
            BrokerBehavior::Reject(reason) => Err(CoreError::transient(reason)),
            BrokerBehavior::Stall => std::future::pending::<DeliveryResult>().await,
            BrokerBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.confirm(message)
            }
            BrokerBehavior::RejectAfter(delay, reason) => {
                tokio::time::sleep(delay).await;
                Err(CoreError::transient(reason))
            }
        }
    }
}

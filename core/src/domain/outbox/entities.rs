use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    catalog::entities::Entity,
    common::CoreError,
    outbox::policy::RetryPolicy,
};

/// Identifier of an outbox entry. Time-ordered (UUID v7) so that sorting by
/// id breaks ties between entries created within the same millisecond.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxEntryId(pub Uuid);

impl OutboxEntryId {
    pub fn generate() -> Self {
        OutboxEntryId(Uuid::now_v7())
    }
}

impl std::fmt::Display for OutboxEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OutboxEntryId {
    fn from(uuid: Uuid) -> Self {
        OutboxEntryId(uuid)
    }
}

impl From<OutboxEntryId> for Uuid {
    fn from(id: OutboxEntryId) -> Self {
        id.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxState {
    Pending,
    Published,
    Failed,
}

impl OutboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxState::Pending => "PENDING",
            OutboxState::Published => "PUBLISHED",
            OutboxState::Failed => "FAILED",
        }
    }

    /// `PENDING -> PUBLISHED`, `PENDING -> FAILED`, `FAILED -> PENDING`.
    /// `PUBLISHED` is terminal.
    pub fn can_transition_to(&self, next: OutboxState) -> bool {
        matches!(
            (self, next),
            (OutboxState::Pending, OutboxState::Published)
                | (OutboxState::Pending, OutboxState::Failed)
                | (OutboxState::Failed, OutboxState::Pending)
        )
    }
}

impl std::fmt::Display for OutboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxState::Pending),
            "PUBLISHED" => Ok(OutboxState::Published),
            "FAILED" => Ok(OutboxState::Failed),
            other => Err(CoreError::SerializationError {
                msg: format!("unknown outbox state {other}"),
            }),
        }
    }
}

/// An event waiting to be, or already, published to the broker.
///
/// Only `state`, `attempts`, the timestamps and `last_error` ever change after
/// the entry is written; the payload is the entity snapshot taken at save time.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxEntry {
    pub id: OutboxEntryId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: Vec<u8>,
    pub topic: String,
    pub state: OutboxState,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl OutboxEntry {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        topic: impl Into<String>,
        payload: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxEntryId::generate(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            topic: topic.into(),
            state: OutboxState::Pending,
            attempts: 0,
            created_at: now,
            last_attempted_at: None,
            published_at: None,
            next_attempt_at: now,
            last_error: None,
        }
    }

    /// Snapshot an entity as a pending event. The entity must already carry its id.
    pub fn for_entity<E: Entity>(
        entity: &E,
        topic: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let aggregate_id = entity.id().ok_or_else(|| CoreError::SerializationError {
            msg: format!("{} has no id to publish", E::KIND),
        })?;
        let payload = serde_json::to_vec(entity)
            .map_err(|e| CoreError::SerializationError { msg: e.to_string() })?;

        Ok(Self::new(
            E::KIND.as_str(),
            aggregate_id.as_str(),
            topic,
            payload,
            now,
        ))
    }

    /// Entries sharing a partition key are delivered in enqueue order.
    pub fn partition_key(&self) -> String {
        format!("{}:{}", self.aggregate_type, self.aggregate_id)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }

    /// Computes the bookkeeping for a failed delivery without mutating the entry.
    pub fn failure_transition(
        &self,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
        error: &CoreError,
    ) -> FailureTransition {
        let attempts = self.attempts.saturating_add(1);
        let state = if policy.is_exhausted(attempts) {
            OutboxState::Failed
        } else {
            OutboxState::Pending
        };
        let delay = TimeDelta::from_std(policy.backoff(attempts)).unwrap_or(TimeDelta::MAX);
        let next_attempt_at = now
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        FailureTransition {
            attempts,
            state,
            last_attempted_at: now,
            next_attempt_at,
            last_error: error.to_string(),
        }
    }

    pub fn apply_failure(&mut self, transition: &FailureTransition) {
        self.attempts = self.attempts.max(transition.attempts);
        self.state = transition.state;
        self.last_attempted_at = Some(transition.last_attempted_at);
        self.next_attempt_at = transition.next_attempt_at;
        self.last_error = Some(transition.last_error.clone());
    }

    pub fn apply_published(&mut self, at: DateTime<Utc>) {
        self.state = OutboxState::Published;
        self.published_at = Some(at);
        self.last_attempted_at = Some(at);
    }

    pub fn apply_requeue(&mut self, at: DateTime<Utc>) {
        self.state = OutboxState::Pending;
        self.next_attempt_at = at;
    }
}

/// New values written by a conditional failure update.
#[derive(Clone, Debug, PartialEq)]
pub struct FailureTransition {
    pub attempts: u32,
    pub state: OutboxState,
    pub last_attempted_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: String,
}

impl FailureTransition {
    pub fn is_permanent(&self) -> bool {
        self.state == OutboxState::Failed
    }
}

/// Per-state totals of the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutboxCounts {
    pub pending: u64,
    pub published: u64,
    pub failed: u64,
}

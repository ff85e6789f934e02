use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    catalog::{
        entities::{Entity, EntityId, EntityKind, require_text},
        models::product::Category,
    },
    common::CoreError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupportStatus {
    #[default]
    Open,
    Resolved,
    Closed,
    Pending,
}

/// A customer support ticket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Support {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub subject: String,
    pub message: String,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub status: SupportStatus,
    #[serde(default)]
    pub category: Category,
}

impl Entity for Support {
    const KIND: EntityKind = EntityKind::Support;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), CoreError> {
        require_text(Self::KIND, "subject", &self.subject)?;
        require_text(Self::KIND, "message", &self.message)
    }
}

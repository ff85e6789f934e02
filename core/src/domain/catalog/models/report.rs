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
pub enum ReportStatus {
    Published,
    #[default]
    Draft,
    Archived,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub status: ReportStatus,
    #[serde(default)]
    pub category: Category,
}

impl Entity for Report {
    const KIND: EntityKind = EntityKind::Report;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), CoreError> {
        require_text(Self::KIND, "title", &self.title)
    }
}

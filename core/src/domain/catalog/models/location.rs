use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    catalog::entities::{Entity, EntityId, EntityKind},
    common::CoreError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationStatus {
    Active,
    Inactive,
    #[default]
    Pending,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub data: String,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub status: LocationStatus,
}

impl Entity for Location {
    const KIND: EntityKind = EntityKind::Location;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), CoreError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CoreError::invalid(
                Self::KIND,
                "latitude must be between -90 and 90",
            ));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CoreError::invalid(
                Self::KIND,
                "longitude must be between -180 and 180",
            ));
        }
        Ok(())
    }
}

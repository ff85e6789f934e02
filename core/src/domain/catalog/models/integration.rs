use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    catalog::entities::{Entity, EntityId, EntityKind, require_text},
    common::CoreError,
};

/// Connection details for a third-party integration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub name: String,
    pub endpoint: String,
    pub api_key: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub other: HashMap<String, String>,
}

impl Entity for Integration {
    const KIND: EntityKind = EntityKind::Integration;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), CoreError> {
        require_text(Self::KIND, "name", &self.name)?;
        require_text(Self::KIND, "endpoint", &self.endpoint)
    }
}

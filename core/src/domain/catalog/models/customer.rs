use serde::{Deserialize, Serialize};

use crate::domain::{
    catalog::entities::{Entity, EntityId, EntityKind, require_text},
    common::CoreError,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub cell: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub zip_code: String,
    #[serde(default)]
    pub city: String,
}

impl Entity for Customer {
    const KIND: EntityKind = EntityKind::Customer;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), CoreError> {
        require_text(Self::KIND, "name", &self.name)?;
        require_text(Self::KIND, "email", &self.email)?;
        if !self.email.contains('@') {
            return Err(CoreError::invalid(Self::KIND, "email is malformed"));
        }
        Ok(())
    }
}

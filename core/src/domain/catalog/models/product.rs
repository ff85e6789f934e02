use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    catalog::entities::{Entity, EntityId, EntityKind, require_non_negative, require_text},
    common::CoreError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    #[default]
    Available,
    OutOfStock,
    Discontinued,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Category {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub category: Category,
    pub stock: i64,
    pub added_date: DateTime<Utc>,
    #[serde(default)]
    pub status: ProductStatus,
}

impl Entity for Product {
    const KIND: EntityKind = EntityKind::Product;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), CoreError> {
        require_text(Self::KIND, "name", &self.name)?;
        require_non_negative(Self::KIND, "price", self.price)?;
        if self.stock < 0 {
            return Err(CoreError::invalid(Self::KIND, "stock cannot be negative"));
        }
        Ok(())
    }
}

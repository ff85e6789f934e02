use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    catalog::entities::{Entity, EntityId, EntityKind, require_non_negative, require_text},
    common::CoreError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionStatus {
    Active,
    Expired,
    #[default]
    Scheduled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Percentage off, 0 to 100.
    pub discount: f64,
    pub discount_value: f64,
    #[serde(default)]
    pub status: PromotionStatus,
}

impl Entity for Promotion {
    const KIND: EntityKind = EntityKind::Promotion;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), CoreError> {
        require_text(Self::KIND, "title", &self.title)?;
        require_non_negative(Self::KIND, "discount", self.discount)?;
        require_non_negative(Self::KIND, "discountValue", self.discount_value)?;
        if self.discount > 100.0 {
            return Err(CoreError::invalid(
                Self::KIND,
                "discount cannot exceed 100 percent",
            ));
        }
        if self.end_date < self.start_date {
            return Err(CoreError::invalid(
                Self::KIND,
                "endDate cannot be before startDate",
            ));
        }
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    catalog::entities::{Entity, EntityId, EntityKind, require_non_negative, require_text},
    common::CoreError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    CreditCard,
    DebitCard,
    Paypal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Processed,
    Failed,
    Refunded,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    #[serde(rename = "type")]
    pub kind: PaymentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub order_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub status: PaymentStatus,
    pub payment_date: DateTime<Utc>,
}

impl Entity for Payment {
    const KIND: EntityKind = EntityKind::Payment;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), CoreError> {
        require_text(Self::KIND, "orderId", &self.order_id)?;
        require_text(Self::KIND, "customerId", &self.customer_id)?;
        require_non_negative(Self::KIND, "amount", self.amount)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    catalog::entities::{Entity, EntityId, EntityKind, require_non_negative, require_text},
    common::CoreError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Shipped,
    Delivered,
    Canceled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderProduct {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub customer_id: String,
    pub products: Vec<OrderProduct>,
    pub total_price: f64,
    pub shipping_address: Address,
    #[serde(default)]
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub delivery_date: Option<DateTime<Utc>>,
}

impl Entity for Order {
    const KIND: EntityKind = EntityKind::Order;

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), CoreError> {
        require_text(Self::KIND, "customerId", &self.customer_id)?;
        if self.products.is_empty() {
            return Err(CoreError::invalid(
                Self::KIND,
                "an order needs at least one product",
            ));
        }
        for product in &self.products {
            require_text(Self::KIND, "productId", &product.product_id)?;
            require_non_negative(Self::KIND, "price", product.price)?;
        }
        require_non_negative(Self::KIND, "totalPrice", self.total_price)
    }
}

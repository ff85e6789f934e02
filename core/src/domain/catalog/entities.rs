use std::collections::HashMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::domain::{common::CoreError, outbox::entities::OutboxEntryId};

/// The nine entity kinds served by the retail services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Customer,
    Order,
    Payment,
    Product,
    Promotion,
    Report,
    Support,
    Location,
    Integration,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Customer,
        EntityKind::Order,
        EntityKind::Payment,
        EntityKind::Product,
        EntityKind::Promotion,
        EntityKind::Report,
        EntityKind::Support,
        EntityKind::Location,
        EntityKind::Integration,
    ];

    /// Value stored as `aggregate_type` on outbox entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Order => "order",
            EntityKind::Payment => "payment",
            EntityKind::Product => "product",
            EntityKind::Promotion => "promotion",
            EntityKind::Report => "report",
            EntityKind::Support => "support",
            EntityKind::Location => "location",
            EntityKind::Integration => "integration",
        }
    }

    pub fn database(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customerDB",
            EntityKind::Order => "orderDB",
            EntityKind::Payment => "paymentDB",
            EntityKind::Product => "productDB",
            EntityKind::Promotion => "promotionDB",
            EntityKind::Report => "reportDB",
            EntityKind::Support => "supportDB",
            EntityKind::Location => "locationDB",
            EntityKind::Integration => "integrationDB",
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customers",
            EntityKind::Order => "orders",
            EntityKind::Payment => "payments",
            EntityKind::Product => "products",
            EntityKind::Promotion => "promotions",
            EntityKind::Report => "reports",
            EntityKind::Support => "supports",
            EntityKind::Location => "locations",
            EntityKind::Integration => "integrations",
        }
    }

    /// Topic names consumers already subscribe to, e.g. `Order_Topic_One`.
    pub fn default_topic(&self) -> &'static str {
        match self {
            EntityKind::Customer => "Customer_Topic_One",
            EntityKind::Order => "Order_Topic_One",
            EntityKind::Payment => "Payment_Topic_One",
            EntityKind::Product => "Product_Topic_One",
            EntityKind::Promotion => "Promotion_Topic_One",
            EntityKind::Report => "Report_Topic_One",
            EntityKind::Support => "Support_Topic_One",
            EntityKind::Location => "Location_Topic_One",
            EntityKind::Integration => "Integration_Topic_One",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId(value.to_string())
    }
}

/// A document persisted by one of the retail services.
///
/// The serialized form of the entity is both the stored document and the
/// payload published to the broker, so it must round-trip through serde.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> Option<&EntityId>;

    fn set_id(&mut self, id: EntityId);

    fn validate(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Result of a successful atomic entity + outbox write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SavedEntity {
    pub entity_id: EntityId,
    pub outbox_entry_id: OutboxEntryId,
    pub topic: String,
}

/// Topic per entity kind, defaulting to the `<Entity>_Topic_One` convention.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TopicRouting {
    #[serde(default)]
    topics: HashMap<EntityKind, String>,
}

impl TopicRouting {
    pub fn with_override(mut self, kind: EntityKind, topic: impl Into<String>) -> Self {
        self.topics.insert(kind, topic.into());
        self
    }

    pub fn topic_for(&self, kind: EntityKind) -> &str {
        self.topics
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_topic())
    }
}

pub(crate) fn require_text(kind: EntityKind, field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::invalid(kind, format!("{field} cannot be empty")));
    }
    Ok(())
}

pub(crate) fn require_non_negative(
    kind: EntityKind,
    field: &str,
    value: f64,
) -> Result<(), CoreError> {
    if !value.is_finite() || value < 0.0 {
        return Err(CoreError::invalid(
            kind,
            format!("{field} must be a non-negative number"),
        ));
    }
    Ok(())
}

use crate::{
    Service,
    domain::{
        catalog::{
            entities::{EntityId, EntityKind, TopicRouting},
            models::{Customer, Order, OrderStatus},
            ports::CatalogService,
        },
        common::CoreError,
        outbox::{entities::OutboxState, ports::MockOutboxStore},
        test::{customer, order},
    },
};

fn service(store: &MockOutboxStore) -> Service<MockOutboxStore, MockOutboxStore> {
    Service::new(store.clone(), store.clone(), TopicRouting::default())
}

// == Save Entity Tests ==

#[tokio::test]
#[cfg(test)]
async fn test_save_entity_writes_document_and_pending_entry() -> Result<(), Box<dyn std::error::Error>>
{
    let store = MockOutboxStore::new();
    let service = service(&store);

    let saved = service.save_entity(order()).await?;

    assert_eq!(saved.topic, "Order_Topic_One", "Expected default order topic");
    assert_eq!(store.document_count(EntityKind::Order), 1);

    let entries = store.entries();
    assert_eq!(entries.len(), 1, "Expected exactly one outbox entry");
    let entry = &entries[0];
    assert_eq!(entry.id, saved.outbox_entry_id);
    assert_eq!(entry.state, OutboxState::Pending);
    assert_eq!(entry.attempts, 0);
    assert_eq!(entry.aggregate_type, "order");
    assert_eq!(entry.aggregate_id, saved.entity_id.as_str());
    assert!(entry.published_at.is_none());

    let payload: Order = serde_json::from_slice(&entry.payload)?;
    assert_eq!(
        payload.id.as_ref(),
        Some(&saved.entity_id),
        "Payload should carry the assigned id"
    );
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_save_entity_keeps_caller_id() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let mut customer = customer();
    customer.id = Some(EntityId::from("64b7f0c2a1b2c3d4e5f60718"));

    let saved = service.save_entity(customer).await?;

    assert_eq!(saved.entity_id.as_str(), "64b7f0c2a1b2c3d4e5f60718");
    assert_eq!(saved.topic, "Customer_Topic_One");
    assert_eq!(store.entries_for("64b7f0c2a1b2c3d4e5f60718").len(), 1);
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_save_entity_invalid_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let mut customer = customer();
    customer.email = "not-an-email".to_string();

    let result = service.save_entity(customer).await;

    assert!(
        matches!(
            result,
            Err(CoreError::InvalidEntity {
                kind: EntityKind::Customer,
                ..
            })
        ),
        "Expected InvalidEntity, got {:?}",
        result
    );
    assert_eq!(store.document_count(EntityKind::Customer), 0);
    assert!(store.entries().is_empty(), "No outbox entry should exist");
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_save_entity_commit_failure_is_atomic() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);
    store.fail_next_commit();

    let result = service.save_entity(order()).await;

    assert!(matches!(result, Err(CoreError::StorageError { .. })));
    assert_eq!(store.document_count(EntityKind::Order), 0);
    assert!(store.entries().is_empty());

    // The failure is not sticky; a retry of the whole call succeeds.
    service.save_entity(order()).await?;
    assert_eq!(store.document_count(EntityKind::Order), 1);
    assert_eq!(store.entries().len(), 1);
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_save_entity_duplicate_id_fails() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let mut first = order();
    first.id = Some(EntityId::from("order-1"));
    service.save_entity(first.clone()).await?;

    let result = service.save_entity(first).await;

    assert!(matches!(result, Err(CoreError::StorageError { .. })));
    assert_eq!(
        store.entries_for("order-1").len(),
        1,
        "Duplicate save must not enqueue a second event"
    );
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_save_entity_uses_topic_override() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let topics = TopicRouting::default().with_override(EntityKind::Order, "orders.v2");
    let service = Service::new(store.clone(), store.clone(), topics);

    let saved_order = service.save_entity(order()).await?;
    let saved_customer = service.save_entity(customer()).await?;

    assert_eq!(saved_order.topic, "orders.v2");
    assert_eq!(saved_customer.topic, "Customer_Topic_One");
    assert_eq!(store.entries_for(saved_order.entity_id.as_str())[0].topic, "orders.v2");
    Ok(())
}

// == Get Entity Tests ==

#[tokio::test]
#[cfg(test)]
async fn test_get_entity_success() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let saved = service.save_entity(customer()).await?;
    let fetched: Customer = service.get_entity(&saved.entity_id).await?;

    assert_eq!(fetched.id.as_ref(), Some(&saved.entity_id));
    assert_eq!(fetched.email, "ana@example.com");
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_get_entity_not_found() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let result = service
        .get_entity::<Order>(&EntityId::from("missing"))
        .await;

    assert!(matches!(
        result,
        Err(CoreError::EntityNotFound {
            kind: EntityKind::Order,
            ..
        })
    ));
    Ok(())
}

// == List Entity Tests ==

#[tokio::test]
#[cfg(test)]
async fn test_list_entities_returns_only_that_kind() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let mut first = customer();
    first.id = Some(EntityId::from("customer-a"));
    let mut second = customer();
    second.id = Some(EntityId::from("customer-b"));
    second.email = "bia@example.com".to_string();
    service.save_entity(second).await?;
    service.save_entity(first).await?;
    service.save_entity(order()).await?;

    let customers: Vec<Customer> = service.list_entities().await?;

    let ids: Vec<_> = customers
        .iter()
        .filter_map(|customer| customer.id.as_ref().map(|id| id.as_str().to_string()))
        .collect();
    assert_eq!(ids, vec!["customer-a", "customer-b"]);
    assert_eq!(service.list_entities::<Order>().await?.len(), 1);
    Ok(())
}

// == Update Entity Tests ==

#[tokio::test]
#[cfg(test)]
async fn test_update_entity_replaces_document_and_enqueues_new_state()
-> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let saved = service.save_entity(order()).await?;
    let mut changed: Order = service.get_entity(&saved.entity_id).await?;
    changed.status = OrderStatus::Shipped;

    let updated = service.update_entity(changed).await?;

    assert_eq!(updated.entity_id, saved.entity_id);
    assert_ne!(updated.outbox_entry_id, saved.outbox_entry_id);
    assert_eq!(updated.topic, "Order_Topic_One");
    assert_eq!(store.document_count(EntityKind::Order), 1);

    let stored: Order = service.get_entity(&saved.entity_id).await?;
    assert_eq!(stored.status, OrderStatus::Shipped);

    let entries = store.entries_for(saved.entity_id.as_str());
    assert_eq!(entries.len(), 2, "Save and update each enqueue one event");
    let latest: Order = serde_json::from_slice(&entries[1].payload)?;
    assert_eq!(latest.status, OrderStatus::Shipped);
    assert_eq!(entries[1].state, OutboxState::Pending);
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_update_entity_missing_document_writes_nothing()
-> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let mut ghost = customer();
    ghost.id = Some(EntityId::from("never-saved"));

    let result = service.update_entity(ghost).await;

    assert!(
        matches!(
            result,
            Err(CoreError::EntityNotFound {
                kind: EntityKind::Customer,
                ..
            })
        ),
        "Expected EntityNotFound, got {:?}",
        result
    );
    assert_eq!(store.document_count(EntityKind::Customer), 0);
    assert!(store.entries().is_empty(), "No outbox entry should exist");
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_update_entity_without_id_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let result = service.update_entity(customer()).await;

    assert!(matches!(
        result,
        Err(CoreError::InvalidEntity {
            kind: EntityKind::Customer,
            ..
        })
    ));
    assert!(store.entries().is_empty());
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_update_entity_commit_failure_keeps_previous_state()
-> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let saved = service.save_entity(customer()).await?;
    let mut changed: Customer = service.get_entity(&saved.entity_id).await?;
    changed.city = "Campinas".to_string();
    store.fail_next_commit();

    let result = service.update_entity(changed).await;

    assert!(matches!(result, Err(CoreError::StorageError { .. })));
    let stored: Customer = service.get_entity(&saved.entity_id).await?;
    assert_eq!(stored.city, "Sao Paulo");
    assert_eq!(store.entries_for(saved.entity_id.as_str()).len(), 1);
    Ok(())
}

// == Delete Entity Tests ==

#[tokio::test]
#[cfg(test)]
async fn test_delete_entity_removes_document_without_event()
-> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let saved = service.save_entity(customer()).await?;
    service.delete_entity::<Customer>(&saved.entity_id).await?;

    assert_eq!(store.document_count(EntityKind::Customer), 0);
    assert_eq!(
        store.entries().len(),
        1,
        "Deleting must not enqueue an event"
    );
    assert!(matches!(
        service.get_entity::<Customer>(&saved.entity_id).await,
        Err(CoreError::EntityNotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_delete_entity_not_found() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let service = service(&store);

    let result = service
        .delete_entity::<Order>(&EntityId::from("missing"))
        .await;

    assert!(matches!(
        result,
        Err(CoreError::EntityNotFound {
            kind: EntityKind::Order,
            ..
        })
    ));
    Ok(())
}

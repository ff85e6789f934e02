use crate::domain::{
    catalog::{
        entities::{Entity, EntityId, SavedEntity},
        ports::CatalogService,
    },
    common::{CoreError, services::Service},
    outbox::ports::{OutboxLedger, RecordStore},
};

impl<S, L> CatalogService for Service<S, L>
where
    S: RecordStore,
    L: OutboxLedger,
{
    async fn save_entity<E: Entity>(&self, entity: E) -> Result<SavedEntity, CoreError> {
        entity.validate()?;

        let topic = self.topics.topic_for(E::KIND).to_string();
        let (entity_id, outbox_entry_id) =
            self.record_store.save_with_event(entity, &topic).await?;

        tracing::info!(
            kind = %E::KIND,
            entity_id = %entity_id,
            outbox_entry_id = %outbox_entry_id,
            topic = %topic,
            "Entity saved and outbox entry written"
        );

        Ok(SavedEntity {
            entity_id,
            outbox_entry_id,
            topic,
        })
    }

    async fn get_entity<E: Entity>(&self, id: &EntityId) -> Result<E, CoreError> {
        self.record_store
            .find_by_id::<E>(id)
            .await?
            .ok_or_else(|| CoreError::EntityNotFound {
                kind: E::KIND,
                id: id.to_string(),
            })
    }

    async fn list_entities<E: Entity>(&self) -> Result<Vec<E>, CoreError> {
        self.record_store.list::<E>().await
    }

    async fn update_entity<E: Entity>(&self, entity: E) -> Result<SavedEntity, CoreError> {
        entity.validate()?;
        let entity_id = entity.id().cloned().ok_or_else(|| {
            CoreError::invalid(E::KIND, "an update needs the id of an existing document")
        })?;

        let topic = self.topics.topic_for(E::KIND).to_string();
        let outbox_entry_id = self.record_store.update_with_event(entity, &topic).await?;

        tracing::info!(
            kind = %E::KIND,
            entity_id = %entity_id,
            outbox_entry_id = %outbox_entry_id,
            topic = %topic,
            "Entity updated and outbox entry written"
        );

        Ok(SavedEntity {
            entity_id,
            outbox_entry_id,
            topic,
        })
    }

    async fn delete_entity<E: Entity>(&self, id: &EntityId) -> Result<(), CoreError> {
        if !self.record_store.delete::<E>(id).await? {
            return Err(CoreError::EntityNotFound {
                kind: E::KIND,
                id: id.to_string(),
            });
        }

        tracing::info!(kind = %E::KIND, entity_id = %id, "Entity deleted");
        Ok(())
    }
}

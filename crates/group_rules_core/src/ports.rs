//! Collaborator port traits.
//! Implemented by the Postgres and HTTP adapters in `group-engine`; the core
//! depends only on these traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::definitions::{
    AttributeDefinition, EntityDefinition, EntityRelationshipDefinition, GroupDefinition,
};
use crate::error::{MetadataError, OrchestrationError};

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Read access to the metadata store (entities, attributes, relationships,
/// groups, workflows).
#[async_trait]
pub trait MetadataServiceClient: Send + Sync {
    async fn get_group_definition(&self, group_id: Uuid) -> Result<GroupDefinition>;

    async fn get_entity_definition(&self, entity_id: Uuid) -> Result<EntityDefinition>;

    async fn get_attribute_definition(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> Result<AttributeDefinition>;

    async fn get_entity_relationship(
        &self,
        relationship_id: Uuid,
    ) -> Result<EntityRelationshipDefinition>;

    /// Active workflows whose trigger is `on_group_update` for this group.
    async fn list_group_update_workflows(&self, group_id: Uuid) -> Result<Vec<Uuid>>;
}

/// Downstream workflow orchestrator.
#[async_trait]
pub trait OrchestrationServiceClient: Send + Sync {
    async fn trigger_workflow(&self, workflow_id: Uuid)
        -> std::result::Result<(), OrchestrationError>;
}

// ── InMemoryMetadataClient ────────────────────────────────────

#[derive(Default)]
struct Tables {
    groups: HashMap<Uuid, GroupDefinition>,
    entities: HashMap<Uuid, EntityDefinition>,
    attributes: HashMap<Uuid, AttributeDefinition>,
    relationships: HashMap<Uuid, EntityRelationshipDefinition>,
    workflows: HashMap<Uuid, Vec<Uuid>>,
}

/// HashMap-backed metadata client for embedding and tests.
#[derive(Default)]
pub struct InMemoryMetadataClient {
    tables: RwLock<Tables>,
    lookups: AtomicUsize,
}

impl InMemoryMetadataClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&self, group: GroupDefinition) {
        self.write().groups.insert(group.id, group);
    }

    pub fn add_entity(&self, entity: EntityDefinition) {
        self.write().entities.insert(entity.id, entity);
    }

    pub fn add_attribute(&self, attribute: AttributeDefinition) {
        self.write().attributes.insert(attribute.id, attribute);
    }

    pub fn add_relationship(&self, relationship: EntityRelationshipDefinition) {
        self.write().relationships.insert(relationship.id, relationship);
    }

    pub fn add_group_update_workflow(&self, group_id: Uuid, workflow_id: Uuid) {
        self.write().workflows.entry(group_id).or_default().push(workflow_id);
    }

    /// Number of lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MetadataServiceClient for InMemoryMetadataClient {
    async fn get_group_definition(&self, group_id: Uuid) -> Result<GroupDefinition> {
        self.read()
            .groups
            .get(&group_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(format!("group definition {}", group_id)))
    }

    async fn get_entity_definition(&self, entity_id: Uuid) -> Result<EntityDefinition> {
        self.read()
            .entities
            .get(&entity_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(format!("entity definition {}", entity_id)))
    }

    async fn get_attribute_definition(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> Result<AttributeDefinition> {
        self.read()
            .attributes
            .get(&attribute_id)
            .filter(|a| a.entity_id == entity_id)
            .cloned()
            .ok_or_else(|| {
                MetadataError::NotFound(format!(
                    "attribute definition {} for entity {}",
                    attribute_id, entity_id
                ))
            })
    }

    async fn get_entity_relationship(
        &self,
        relationship_id: Uuid,
    ) -> Result<EntityRelationshipDefinition> {
        self.read()
            .relationships
            .get(&relationship_id)
            .cloned()
            .ok_or_else(|| {
                MetadataError::NotFound(format!("entity relationship {}", relationship_id))
            })
    }

    async fn list_group_update_workflows(&self, group_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.read().workflows.get(&group_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_type::DataType;

    #[tokio::test]
    async fn attribute_lookup_is_scoped_to_entity() {
        let client = InMemoryMetadataClient::new();
        let entity = Uuid::new_v4();
        let attribute = AttributeDefinition {
            id: Uuid::new_v4(),
            entity_id: entity,
            name: "Age".into(),
            data_type: DataType::Integer,
        };
        client.add_attribute(attribute.clone());

        let found = client.get_attribute_definition(entity, attribute.id).await.unwrap();
        assert_eq!(found, attribute);

        let err = client
            .get_attribute_definition(Uuid::new_v4(), attribute.id)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(client.lookup_count(), 2);
    }

    #[tokio::test]
    async fn workflows_default_to_empty() {
        let client = InMemoryMetadataClient::new();
        let group = Uuid::new_v4();
        assert!(client.list_group_update_workflows(group).await.unwrap().is_empty());

        let wf = Uuid::new_v4();
        client.add_group_update_workflow(group, wf);
        assert_eq!(client.list_group_update_workflows(group).await.unwrap(), vec![wf]);
    }
}

//! Definition catalog handed to the compiler, and its prefetch from the
//! metadata collaborator.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::definitions::{AttributeDefinition, EntityRelationshipDefinition};
use crate::error::MetadataError;
use crate::ports::MetadataServiceClient;
use crate::rule_tree::{RuleGroup, RuleNode};

/// Attribute and relationship definitions keyed by id.
#[derive(Debug, Clone, Default)]
pub struct DefinitionSet {
    attributes: HashMap<Uuid, AttributeDefinition>,
    relationships: HashMap<Uuid, EntityRelationshipDefinition>,
}

impl DefinitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, attribute: AttributeDefinition) -> Self {
        self.insert_attribute(attribute);
        self
    }

    pub fn with_relationship(mut self, relationship: EntityRelationshipDefinition) -> Self {
        self.insert_relationship(relationship);
        self
    }

    pub fn insert_attribute(&mut self, attribute: AttributeDefinition) {
        self.attributes.insert(attribute.id, attribute);
    }

    pub fn insert_relationship(&mut self, relationship: EntityRelationshipDefinition) {
        self.relationships.insert(relationship.id, relationship);
    }

    pub fn attribute(&self, id: &Uuid) -> Option<&AttributeDefinition> {
        self.attributes.get(id)
    }

    pub fn relationship(&self, id: &Uuid) -> Option<&EntityRelationshipDefinition> {
        self.relationships.get(id)
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Load every definition `root` depends on, skipping ones already held.
    ///
    /// Relationships go first (with the attributes forming their join keys)
    /// because the entity a nested condition is looked up under depends on
    /// which way the enclosing relationship points. A condition without an
    /// `entityId` is looked up under the entity in scope, starting from
    /// `root_entity_id`. The first failed lookup is returned unchanged.
    pub async fn prefetch(
        &mut self,
        root: &RuleGroup,
        root_entity_id: Uuid,
        client: &dyn MetadataServiceClient,
    ) -> Result<(), MetadataError> {
        let refs = root.referenced_definitions();

        for relationship_id in refs.relationship_ids {
            if self.relationships.contains_key(&relationship_id) {
                continue;
            }
            let relationship = client.get_entity_relationship(relationship_id).await?;
            self.fetch_attribute(
                client,
                relationship.source_entity_id,
                relationship.source_attribute_id,
            )
            .await?;
            self.fetch_attribute(
                client,
                relationship.target_entity_id,
                relationship.target_attribute_id,
            )
            .await?;
            self.relationships.insert(relationship_id, relationship);
        }

        let mut lookups = Vec::new();
        self.collect_attribute_lookups(root, root_entity_id, &mut lookups);
        for (entity_id, attribute_id) in lookups {
            self.fetch_attribute(client, entity_id, attribute_id).await?;
        }

        debug!(
            attributes = self.attributes.len(),
            relationships = self.relationships.len(),
            "Prefetched rule definitions"
        );
        Ok(())
    }

    async fn fetch_attribute(
        &mut self,
        client: &dyn MetadataServiceClient,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> Result<(), MetadataError> {
        if !self.attributes.contains_key(&attribute_id) {
            let attribute = client.get_attribute_definition(entity_id, attribute_id).await?;
            self.attributes.insert(attribute_id, attribute);
        }
        Ok(())
    }

    fn collect_attribute_lookups(&self, group: &RuleGroup, scope: Uuid, out: &mut Vec<(Uuid, Uuid)>) {
        for rule in &group.rules {
            match rule {
                RuleNode::Condition(c) => out.push((c.entity_id.unwrap_or(scope), c.attribute_id)),
                RuleNode::Group(g) => self.collect_attribute_lookups(g, scope, out),
                RuleNode::RelationshipGroup(r) => {
                    let related = self
                        .relationships
                        .get(&r.relationship_id)
                        .and_then(|rel| rel.traverse_from(scope))
                        .map(|t| t.related_entity_id);
                    if let Some(related) = related {
                        self.collect_attribute_lookups(&r.related_entity_rules, related, out);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_type::DataType;
    use crate::definitions::RelationshipType;
    use crate::ports::InMemoryMetadataClient;
    use serde_json::json;

    const CUSTOMER: Uuid = Uuid::from_u128(0xA);
    const ORDER: Uuid = Uuid::from_u128(0xB);

    fn attr(id: u128, entity_id: Uuid, name: &str, data_type: DataType) -> AttributeDefinition {
        AttributeDefinition {
            id: Uuid::from_u128(id),
            entity_id,
            name: name.into(),
            data_type,
        }
    }

    fn seeded_client() -> InMemoryMetadataClient {
        let client = InMemoryMetadataClient::new();
        client.add_attribute(attr(1, CUSTOMER, "ID", DataType::Text));
        client.add_attribute(attr(2, CUSTOMER, "Age", DataType::Integer));
        client.add_attribute(attr(3, ORDER, "UserID", DataType::Text));
        client.add_attribute(attr(4, ORDER, "OrderAmount", DataType::Numeric));
        client.add_relationship(EntityRelationshipDefinition {
            id: Uuid::from_u128(100),
            name: "orders".into(),
            source_entity_id: CUSTOMER,
            source_attribute_id: Uuid::from_u128(1),
            target_entity_id: ORDER,
            target_attribute_id: Uuid::from_u128(3),
            relationship_type: RelationshipType::OneToMany,
        });
        client
    }

    fn tree() -> RuleGroup {
        RuleGroup::from_value(json!({
            "rules": [
                { "type": "condition", "attributeId": Uuid::from_u128(2), "operator": ">", "value": 30 },
                { "type": "relationship_group", "relationshipId": Uuid::from_u128(100),
                  "relatedEntityRules": { "rules": [
                      { "type": "condition", "attributeId": Uuid::from_u128(4), "operator": ">", "value": 100 }
                  ]}}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn prefetch_loads_conditions_relationships_and_join_keys() {
        let client = seeded_client();
        let mut defs = DefinitionSet::new();
        defs.prefetch(&tree(), CUSTOMER, &client).await.unwrap();

        assert_eq!(defs.relationship_count(), 1);
        assert_eq!(defs.attribute_count(), 4);
        assert_eq!(defs.attribute(&Uuid::from_u128(4)).unwrap().entity_id, ORDER);
    }

    #[tokio::test]
    async fn prefetch_skips_definitions_already_present() {
        let client = InMemoryMetadataClient::new();
        let mut defs = DefinitionSet::new()
            .with_attribute(attr(2, CUSTOMER, "Age", DataType::Integer));
        let group = RuleGroup::from_value(json!({
            "rules": [ { "type": "condition", "attributeId": Uuid::from_u128(2), "operator": "=", "value": 1 } ]
        }))
        .unwrap();
        defs.prefetch(&group, CUSTOMER, &client).await.unwrap();
        assert_eq!(client.lookup_count(), 0);
    }

    #[tokio::test]
    async fn prefetch_propagates_missing_relationship() {
        let client = InMemoryMetadataClient::new();
        client.add_attribute(attr(2, CUSTOMER, "Age", DataType::Integer));
        let mut defs = DefinitionSet::new();
        let err = defs.prefetch(&tree(), CUSTOMER, &client).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains(&Uuid::from_u128(100).to_string()));
    }

    #[tokio::test]
    async fn prefetch_propagates_missing_attribute() {
        let client = seeded_client();
        let group = RuleGroup::from_value(json!({
            "rules": [ { "type": "condition", "attributeId": Uuid::from_u128(99), "operator": "=", "value": 1 } ]
        }))
        .unwrap();
        let mut defs = DefinitionSet::new();
        assert!(defs.prefetch(&group, CUSTOMER, &client).await.unwrap_err().is_not_found());
    }
}

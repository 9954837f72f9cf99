//! Metadata definitions consumed by the compiler and the calculation pipeline.
//!
//! These are owned by the metadata collaborator; this crate only reads them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attribute_type::DataType;

/// An entity type (e.g. "Customer", "Order").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One attribute of an entity type, stored in the instance attribute bag
/// under `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefinition {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub name: String,
    pub data_type: DataType,
}

/// Cardinality of an entity relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToOne,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneToOne => "ONE_TO_ONE",
            Self::OneToMany => "ONE_TO_MANY",
            Self::ManyToOne => "MANY_TO_ONE",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONE_TO_ONE" => Ok(Self::OneToOne),
            "ONE_TO_MANY" => Ok(Self::OneToMany),
            "MANY_TO_ONE" => Ok(Self::ManyToOne),
            other => Err(format!("Unknown relationship type: {}", other)),
        }
    }
}

/// Join key between two entity types' attribute bags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelationshipDefinition {
    pub id: Uuid,
    pub name: String,
    pub source_entity_id: Uuid,
    pub source_attribute_id: Uuid,
    pub target_entity_id: Uuid,
    pub target_attribute_id: Uuid,
    pub relationship_type: RelationshipType,
}

/// A relationship seen from one side: which entity lies on the far end and
/// which attributes form the join key on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipTraversal {
    pub related_entity_id: Uuid,
    pub local_attribute_id: Uuid,
    pub related_attribute_id: Uuid,
}

impl EntityRelationshipDefinition {
    /// Traverse the relationship starting from `entity_id`.
    ///
    /// Source to target is the normal direction. Starting from the target
    /// walks the relationship in reverse. Returns `None` when `entity_id` is
    /// on neither end.
    pub fn traverse_from(&self, entity_id: Uuid) -> Option<RelationshipTraversal> {
        if entity_id == self.source_entity_id {
            Some(RelationshipTraversal {
                related_entity_id: self.target_entity_id,
                local_attribute_id: self.source_attribute_id,
                related_attribute_id: self.target_attribute_id,
            })
        } else if entity_id == self.target_entity_id {
            Some(RelationshipTraversal {
                related_entity_id: self.source_entity_id,
                local_attribute_id: self.target_attribute_id,
                related_attribute_id: self.source_attribute_id,
            })
        } else {
            None
        }
    }
}

/// A named dynamic group. `rules_json` holds the serialized root rule group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDefinition {
    pub id: Uuid,
    pub name: String,
    pub entity_id: Uuid,
    pub rules_json: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relationship() -> EntityRelationshipDefinition {
        EntityRelationshipDefinition {
            id: Uuid::new_v4(),
            name: "customer_orders".into(),
            source_entity_id: Uuid::from_u128(1),
            source_attribute_id: Uuid::from_u128(11),
            target_entity_id: Uuid::from_u128(2),
            target_attribute_id: Uuid::from_u128(22),
            relationship_type: RelationshipType::OneToMany,
        }
    }

    #[test]
    fn traverse_forward_from_source() {
        let t = relationship().traverse_from(Uuid::from_u128(1)).unwrap();
        assert_eq!(t.related_entity_id, Uuid::from_u128(2));
        assert_eq!(t.local_attribute_id, Uuid::from_u128(11));
        assert_eq!(t.related_attribute_id, Uuid::from_u128(22));
    }

    #[test]
    fn traverse_reverse_from_target() {
        let t = relationship().traverse_from(Uuid::from_u128(2)).unwrap();
        assert_eq!(t.related_entity_id, Uuid::from_u128(1));
        assert_eq!(t.local_attribute_id, Uuid::from_u128(22));
        assert_eq!(t.related_attribute_id, Uuid::from_u128(11));
    }

    #[test]
    fn traverse_from_unrelated_entity() {
        assert!(relationship().traverse_from(Uuid::from_u128(3)).is_none());
    }

    #[test]
    fn relationship_type_wire_format() {
        let json = serde_json::to_string(&RelationshipType::ManyToOne).unwrap();
        assert_eq!(json, "\"MANY_TO_ONE\"");
        assert_eq!(
            "one_to_many".parse::<RelationshipType>().unwrap(),
            RelationshipType::OneToMany
        );
    }
}

//! Postgres-backed metadata client.
//!
//! Reads entity, attribute, relationship, group and workflow definitions
//! straight from the metadata tables, so the engine can run in-process next
//! to the store that owns them.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use group_rules_core::ports::Result;
use group_rules_core::{
    AttributeDefinition, DataType, EntityDefinition, EntityRelationshipDefinition,
    GroupDefinition, MetadataError, MetadataServiceClient, RelationshipType,
};

/// Postgres-backed metadata client.
#[derive(Clone)]
pub struct PgMetadataClient {
    pool: PgPool,
}

impl PgMetadataClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct GroupDefinitionRow {
    id: Uuid,
    name: String,
    entity_id: Uuid,
    rules_json: serde_json::Value,
    description: Option<String>,
}

#[derive(Debug, FromRow)]
struct AttributeDefinitionRow {
    id: Uuid,
    entity_id: Uuid,
    name: String,
    data_type: String,
}

#[derive(Debug, FromRow)]
struct RelationshipRow {
    id: Uuid,
    name: String,
    source_entity_id: Uuid,
    source_attribute_id: Uuid,
    target_entity_id: Uuid,
    target_attribute_id: Uuid,
    relationship_type: String,
}

impl TryFrom<RelationshipRow> for EntityRelationshipDefinition {
    type Error = MetadataError;

    fn try_from(row: RelationshipRow) -> std::result::Result<Self, Self::Error> {
        let relationship_type = row
            .relationship_type
            .parse::<RelationshipType>()
            .map_err(MetadataError::InvalidDefinition)?;
        Ok(Self {
            id: row.id,
            name: row.name,
            source_entity_id: row.source_entity_id,
            source_attribute_id: row.source_attribute_id,
            target_entity_id: row.target_entity_id,
            target_attribute_id: row.target_attribute_id,
            relationship_type,
        })
    }
}

fn internal(e: sqlx::Error) -> MetadataError {
    MetadataError::Internal(anyhow!(e))
}

#[async_trait]
impl MetadataServiceClient for PgMetadataClient {
    async fn get_group_definition(&self, group_id: Uuid) -> Result<GroupDefinition> {
        let row = sqlx::query_as::<_, GroupDefinitionRow>(
            r#"
            SELECT id, name, entity_id, rules_json, description
            FROM group_definitions
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?
        .ok_or_else(|| MetadataError::NotFound(format!("group definition {}", group_id)))?;

        Ok(GroupDefinition {
            id: row.id,
            name: row.name,
            entity_id: row.entity_id,
            rules_json: row.rules_json,
            description: row.description,
        })
    }

    async fn get_entity_definition(&self, entity_id: Uuid) -> Result<EntityDefinition> {
        let row: Option<(Uuid, String, Option<String>)> = sqlx::query_as(
            "SELECT id, name, description FROM entity_definitions WHERE id = $1",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;

        let (id, name, description) = row
            .ok_or_else(|| MetadataError::NotFound(format!("entity definition {}", entity_id)))?;
        Ok(EntityDefinition {
            id,
            name,
            description,
        })
    }

    async fn get_attribute_definition(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> Result<AttributeDefinition> {
        let row = sqlx::query_as::<_, AttributeDefinitionRow>(
            r#"
            SELECT id, entity_id, name, data_type
            FROM attribute_definitions
            WHERE id = $1 AND entity_id = $2
            "#,
        )
        .bind(attribute_id)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            MetadataError::NotFound(format!(
                "attribute definition {} for entity {}",
                attribute_id, entity_id
            ))
        })?;

        Ok(AttributeDefinition {
            id: row.id,
            entity_id: row.entity_id,
            name: row.name,
            data_type: DataType::resolve(&row.data_type),
        })
    }

    async fn get_entity_relationship(
        &self,
        relationship_id: Uuid,
    ) -> Result<EntityRelationshipDefinition> {
        sqlx::query_as::<_, RelationshipRow>(
            r#"
            SELECT id, name, source_entity_id, source_attribute_id,
                   target_entity_id, target_attribute_id, relationship_type
            FROM entity_relationships
            WHERE id = $1
            "#,
        )
        .bind(relationship_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?
        .ok_or_else(|| MetadataError::NotFound(format!("entity relationship {}", relationship_id)))?
        .try_into()
    }

    async fn list_group_update_workflows(&self, group_id: Uuid) -> Result<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM workflows
            WHERE trigger_type = 'on_group_update'
              AND is_active
              AND trigger_config->>'group_id' = $1::text
            ORDER BY created_at
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }
}

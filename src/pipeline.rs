//! Group calculation pipeline.
//!
//! One call to [`GroupCalculationService::calculate_group`] recomputes a
//! group's membership from scratch:
//!
//! ```text
//! fetch definition -> prepare (parse + prefetch) -> CALCULATING -> COMPLETED | FAILED
//! ```
//!
//! Everything from the CALCULATING log row onwards happens in one
//! transaction. The membership query and inserts run inside a savepoint so a
//! statement error can be rolled back to it and the FAILED row still
//! committed on the same transaction. Existing memberships are deleted before
//! the query runs, so a failed calculation leaves the group empty.

use std::sync::Arc;

use sqlx::{Acquire, PgPool, Postgres, Transaction};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use group_rules_core::{
    compile_membership_query, CompiledQuery, DefinitionSet, GroupCalculationLog, GroupDefinition,
    GroupResults, MetadataServiceClient, OrchestrationServiceClient, RuleGroup,
};

use crate::config::CalculationOptions;
use crate::database::CalculationRepository;
use crate::error::{GroupEngineError, Result};
use crate::notify::{self, NotificationSummary};
use crate::results::GroupResultsReader;

/// A group whose rule tree is parsed and whose definitions are all loaded.
struct PreparedGroup {
    definition: GroupDefinition,
    rules: RuleGroup,
    definitions: DefinitionSet,
}

/// A failed query/insert step and how many ids the query had returned.
struct MaterializeFailure {
    member_count: usize,
    error: sqlx::Error,
}

pub struct GroupCalculationService {
    repository: CalculationRepository,
    metadata: Arc<dyn MetadataServiceClient>,
    orchestration: Option<Arc<dyn OrchestrationServiceClient>>,
    options: CalculationOptions,
}

impl GroupCalculationService {
    pub fn new(pool: PgPool, metadata: Arc<dyn MetadataServiceClient>) -> Self {
        Self {
            repository: CalculationRepository::new(pool),
            metadata,
            orchestration: None,
            options: CalculationOptions::default(),
        }
    }

    pub fn with_orchestration(mut self, orchestration: Arc<dyn OrchestrationServiceClient>) -> Self {
        self.orchestration = Some(orchestration);
        self
    }

    pub fn with_options(mut self, options: CalculationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn repository(&self) -> &CalculationRepository {
        &self.repository
    }

    /// Recompute the membership of `group_id` and return the member ids in
    /// query order.
    ///
    /// Every failure after the group definition was found is recorded as a
    /// FAILED log row before the error is returned. The post-commit
    /// notification keeps running in the background; callers that exit
    /// right after (the CLI) use [`Self::calculate_group_with_notification`]
    /// and await it.
    pub async fn calculate_group(&self, group_id: Uuid) -> Result<Vec<Uuid>> {
        let (member_ids, _notification) = self.calculate_group_with_notification(group_id).await?;
        Ok(member_ids)
    }

    /// [`Self::calculate_group`], also handing back the notification task.
    ///
    /// The handle is `None` when no orchestration client is configured.
    /// Nothing is spawned for a failed calculation.
    #[instrument(skip(self), fields(entity_id = tracing::field::Empty))]
    pub async fn calculate_group_with_notification(
        &self,
        group_id: Uuid,
    ) -> Result<(Vec<Uuid>, Option<JoinHandle<NotificationSummary>>)> {
        let definition = self.fetch_group(group_id).await?;
        tracing::Span::current().record("entity_id", tracing::field::display(definition.entity_id));
        info!(group = %definition.name, "Starting group calculation");

        let prepared = match self.prepare(definition.clone()).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.record_prepare_failure(&definition, &e).await;
                return Err(e);
            }
        };

        let group = &prepared.definition;
        let mut tx = self.repository.pool().begin().await?;

        if self.options.advisory_lock {
            CalculationRepository::lock_group(&mut tx, group.id).await?;
        }

        CalculationRepository::upsert_log(
            &mut tx,
            &GroupCalculationLog::calculating(group.id, group.entity_id),
        )
        .await?;

        let removed = CalculationRepository::delete_memberships(&mut tx, group.id).await?;
        debug!(removed, "Cleared previous memberships");

        let query = match compile_membership_query(
            &prepared.rules,
            &prepared.definitions,
            group.entity_id,
        ) {
            Ok(query) => query,
            Err(e) => {
                let err = GroupEngineError::Rule(e);
                self.fail(tx, group, 0, &err).await?;
                return Err(err);
            }
        };

        let member_ids = match materialize(&mut tx, group.id, &query).await {
            Ok(ids) => ids,
            Err(failure) => {
                let err = GroupEngineError::Database(failure.error);
                self.fail(tx, group, failure.member_count, &err).await?;
                return Err(err);
            }
        };

        CalculationRepository::upsert_log(
            &mut tx,
            &GroupCalculationLog::completed(group.id, group.entity_id, member_ids.len()),
        )
        .await?;
        tx.commit().await?;

        info!(member_count = member_ids.len(), status = "COMPLETED", "Group calculation finished");

        let notification = self.orchestration.as_ref().map(|orchestration| {
            notify::spawn_group_updated(self.metadata.clone(), orchestration.clone(), group.id)
        });

        Ok((member_ids, notification))
    }

    /// Prepare and compile the membership query of `group_id` without
    /// touching any table.
    #[instrument(skip(self))]
    pub async fn explain_group(&self, group_id: Uuid) -> Result<CompiledQuery> {
        let definition = self.fetch_group(group_id).await?;
        let prepared = self.prepare(definition).await?;
        Ok(compile_membership_query(
            &prepared.rules,
            &prepared.definitions,
            prepared.definition.entity_id,
        )?)
    }

    pub async fn get_group_results(&self, group_id: Uuid) -> Result<GroupResults> {
        GroupResultsReader::new(self.repository.clone())
            .get_group_results(group_id)
            .await
    }

    async fn fetch_group(&self, group_id: Uuid) -> Result<GroupDefinition> {
        match self.metadata.get_group_definition(group_id).await {
            Ok(definition) => Ok(definition),
            Err(e) if e.is_not_found() => Err(GroupEngineError::GroupNotFound(group_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn prepare(&self, definition: GroupDefinition) -> Result<PreparedGroup> {
        let rules = RuleGroup::from_value(definition.rules_json.clone())?;
        self.metadata
            .get_entity_definition(definition.entity_id)
            .await?;

        let mut definitions = DefinitionSet::new();
        definitions
            .prefetch(&rules, definition.entity_id, self.metadata.as_ref())
            .await?;

        Ok(PreparedGroup {
            definition,
            rules,
            definitions,
        })
    }

    /// Prepare failures happen before the calculation transaction exists, so
    /// the FAILED row goes in on its own.
    async fn record_prepare_failure(&self, group: &GroupDefinition, err: &GroupEngineError) {
        error!(error = %err, status = "FAILED", "Group calculation could not be prepared");
        let log = GroupCalculationLog::failed(group.id, group.entity_id, 0, err.to_string());
        if let Err(e) = self.repository.record_log(&log).await {
            warn!(error = %e, "Could not record failed calculation");
        }
    }

    async fn fail(
        &self,
        mut tx: Transaction<'_, Postgres>,
        group: &GroupDefinition,
        member_count: usize,
        err: &GroupEngineError,
    ) -> Result<()> {
        error!(error = %err, member_count, status = "FAILED", "Group calculation failed");
        CalculationRepository::upsert_log(
            &mut tx,
            &GroupCalculationLog::failed(group.id, group.entity_id, member_count, err.to_string()),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Run the membership query and insert one row per returned id, inside a
/// savepoint of `tx`. On error the savepoint is rolled back and `tx` stays
/// usable.
async fn materialize(
    tx: &mut Transaction<'_, Postgres>,
    group_id: Uuid,
    query: &CompiledQuery,
) -> std::result::Result<Vec<Uuid>, MaterializeFailure> {
    let mut savepoint = tx.begin().await.map_err(|error| MaterializeFailure {
        member_count: 0,
        error,
    })?;

    let outcome = insert_members(&mut savepoint, group_id, query).await;
    match outcome {
        Ok(ids) => {
            savepoint.commit().await.map_err(|error| MaterializeFailure {
                member_count: ids.len(),
                error,
            })?;
            Ok(ids)
        }
        Err(failure) => {
            if let Err(e) = savepoint.rollback().await {
                warn!(error = %e, "Rollback to savepoint failed");
            }
            Err(failure)
        }
    }
}

async fn insert_members(
    tx: &mut Transaction<'_, Postgres>,
    group_id: Uuid,
    query: &CompiledQuery,
) -> std::result::Result<Vec<Uuid>, MaterializeFailure> {
    debug!(sql = %query.sql, params = query.params.len(), "Running membership query");
    let ids = CalculationRepository::fetch_member_ids(tx, query)
        .await
        .map_err(|error| MaterializeFailure {
            member_count: 0,
            error,
        })?;

    for id in &ids {
        CalculationRepository::insert_membership(tx, group_id, *id)
            .await
            .map_err(|error| MaterializeFailure {
                member_count: ids.len(),
                error,
            })?;
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use group_rules_core::{AttributeDefinition, DataType, EntityDefinition, InMemoryMetadataClient};
    use serde_json::json;

    const USER: Uuid = Uuid::from_u128(0x1000);
    const AGE: Uuid = Uuid::from_u128(0x1001);

    fn service(metadata: Arc<InMemoryMetadataClient>) -> GroupCalculationService {
        // Never connects: explain and definition failures stop before any query.
        let pool = PgPool::connect_lazy("postgresql://localhost:1/unused").unwrap();
        GroupCalculationService::new(pool, metadata)
    }

    fn metadata_with_group(rules: serde_json::Value) -> (Arc<InMemoryMetadataClient>, Uuid) {
        let metadata = Arc::new(InMemoryMetadataClient::new());
        metadata.add_entity(EntityDefinition {
            id: USER,
            name: "User".into(),
            description: None,
        });
        metadata.add_attribute(AttributeDefinition {
            id: AGE,
            entity_id: USER,
            name: "Age".into(),
            data_type: DataType::Integer,
        });
        let group_id = Uuid::new_v4();
        metadata.add_group(GroupDefinition {
            id: group_id,
            name: "adults".into(),
            entity_id: USER,
            rules_json: rules,
            description: None,
        });
        (metadata, group_id)
    }

    #[tokio::test]
    async fn explain_compiles_against_metadata() {
        let (metadata, group_id) = metadata_with_group(json!({
            "rules": [{ "type": "condition", "attributeId": AGE, "attributeName": "Age",
                        "operator": ">=", "value": 18 }]
        }));
        let query = service(metadata).explain_group(group_id).await.unwrap();
        assert_eq!(
            query.sql,
            "SELECT id FROM processed_entities pe1 WHERE pe1.entity_definition_id = $1 \
             AND ((pe1.attributes->>'Age')::bigint >= $2)"
        );
        assert_eq!(query.params.len(), 2);
    }

    #[tokio::test]
    async fn unknown_group_is_group_not_found() {
        let metadata = Arc::new(InMemoryMetadataClient::new());
        let missing = Uuid::new_v4();
        assert!(matches!(
            service(metadata).explain_group(missing).await,
            Err(GroupEngineError::GroupNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn malformed_rules_are_rule_errors() {
        let (metadata, group_id) =
            metadata_with_group(json!({ "rules": [{ "type": "between" }] }));
        let err = service(metadata).explain_group(group_id).await.unwrap_err();
        assert!(matches!(err, GroupEngineError::Rule(_)));
        assert!(err.is_definition_error());
    }
}

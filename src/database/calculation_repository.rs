//! Group calculation log and membership persistence.
//!
//! NOTE: All queries use runtime-checked sqlx::query() rather than the
//! compile-time macros; the membership query is generated per group anyway.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::QueryScalar;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use group_rules_core::{BoundValue, CalculationStatus, CompiledQuery, GroupCalculationLog};

/// Log row as stored.
#[derive(Debug, Clone, FromRow)]
struct CalculationLogRow {
    group_definition_id: Uuid,
    entity_definition_id: Uuid,
    calculated_at: DateTime<Utc>,
    member_count: i64,
    status: String,
    error_message: Option<String>,
}

impl TryFrom<CalculationLogRow> for GroupCalculationLog {
    type Error = String;

    fn try_from(row: CalculationLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            group_definition_id: row.group_definition_id,
            entity_definition_id: row.entity_definition_id,
            calculated_at: row.calculated_at,
            member_count: row.member_count,
            status: row.status.parse::<CalculationStatus>()?,
            error_message: row.error_message,
        })
    }
}

/// Reads and writes `group_calculation_logs` and `group_memberships`.
///
/// Writes that belong to a calculation take the calculation's transaction;
/// reads go straight to the pool and only ever see committed state.
#[derive(Clone)]
pub struct CalculationRepository {
    pool: PgPool,
}

impl CalculationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Serialize calculations of one group until the transaction ends.
    pub async fn lock_group(
        tx: &mut Transaction<'_, Postgres>,
        group_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(group_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Insert or overwrite the group's single log row.
    pub async fn upsert_log(
        tx: &mut Transaction<'_, Postgres>,
        log: &GroupCalculationLog,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(UPSERT_LOG)
            .bind(log.group_definition_id)
            .bind(log.entity_definition_id)
            .bind(log.calculated_at)
            .bind(log.member_count)
            .bind(log.status.as_str())
            .bind(log.error_message.as_deref())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Same upsert, autocommitted on its own.
    pub async fn record_log(&self, log: &GroupCalculationLog) -> Result<(), sqlx::Error> {
        sqlx::query(UPSERT_LOG)
            .bind(log.group_definition_id)
            .bind(log.entity_definition_id)
            .bind(log.calculated_at)
            .bind(log.member_count)
            .bind(log.status.as_str())
            .bind(log.error_message.as_deref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every membership row of the group. Returns the number removed.
    pub async fn delete_memberships(
        tx: &mut Transaction<'_, Postgres>,
        group_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM group_memberships WHERE group_definition_id = $1")
            .bind(group_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    /// Run a compiled membership query and return the matching instance ids.
    pub async fn fetch_member_ids(
        tx: &mut Transaction<'_, Postgres>,
        query: &CompiledQuery,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        bind_params(sqlx::query_scalar::<_, Uuid>(&query.sql), &query.params)
            .fetch_all(&mut **tx)
            .await
    }

    pub async fn insert_membership(
        tx: &mut Transaction<'_, Postgres>,
        group_id: Uuid,
        instance_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO group_memberships (group_definition_id, processed_entity_instance_id)
            VALUES ($1, $2)
            "#,
        )
        .bind(group_id)
        .bind(instance_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// The group's log row, if it was ever calculated.
    pub async fn latest_log(&self, group_id: Uuid) -> Result<Option<GroupCalculationLog>, sqlx::Error> {
        let row = sqlx::query_as::<_, CalculationLogRow>(
            r#"
            SELECT group_definition_id, entity_definition_id, calculated_at,
                   member_count, status, error_message
            FROM group_calculation_logs
            WHERE group_definition_id = $1
            ORDER BY calculated_at DESC
            LIMIT 1
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            r.try_into()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))
        })
        .transpose()
    }

    pub async fn member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT processed_entity_instance_id
            FROM group_memberships
            WHERE group_definition_id = $1
            ORDER BY processed_entity_instance_id
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
    }
}

const UPSERT_LOG: &str = r#"
    INSERT INTO group_calculation_logs
        (group_definition_id, entity_definition_id, calculated_at, member_count, status, error_message)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (group_definition_id) DO UPDATE
        SET entity_definition_id = EXCLUDED.entity_definition_id,
            calculated_at = EXCLUDED.calculated_at,
            member_count = EXCLUDED.member_count,
            status = EXCLUDED.status,
            error_message = EXCLUDED.error_message
"#;

fn bind_params<'q, O>(
    mut query: QueryScalar<'q, Postgres, O, PgArguments>,
    params: &[BoundValue],
) -> QueryScalar<'q, Postgres, O, PgArguments> {
    for param in params {
        query = match param {
            BoundValue::Text(v) => query.bind(v.clone()),
            BoundValue::BigInt(v) => query.bind(*v),
            BoundValue::Numeric(v) => query.bind(*v),
            BoundValue::Boolean(v) => query.bind(*v),
            BoundValue::Timestamp(v) => query.bind(*v),
            BoundValue::Uuid(v) => query.bind(*v),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_row_converts_status() {
        let row = CalculationLogRow {
            group_definition_id: Uuid::new_v4(),
            entity_definition_id: Uuid::new_v4(),
            calculated_at: Utc::now(),
            member_count: 3,
            status: "COMPLETED".into(),
            error_message: None,
        };
        let log = GroupCalculationLog::try_from(row).unwrap();
        assert_eq!(log.status, CalculationStatus::Completed);
        assert_eq!(log.member_count, 3);
    }

    #[test]
    fn log_row_with_unknown_status_is_rejected() {
        let row = CalculationLogRow {
            group_definition_id: Uuid::new_v4(),
            entity_definition_id: Uuid::new_v4(),
            calculated_at: Utc::now(),
            member_count: 0,
            status: "PENDING".into(),
            error_message: None,
        };
        assert!(GroupCalculationLog::try_from(row).is_err());
    }
}

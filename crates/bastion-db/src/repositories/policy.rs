//! Relation tuple storage on PostgreSQL

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use bastion_core::{
    BastionError, DomainStatus, ObjectRef, ObjectType, PolicyRepository, PolicySnapshot,
    PolicyWriteTx, RelationFilter, RelationTuple, Result, TupleKey,
};

use super::{db_error, driver_error};

const KEY_COLUMNS: &str =
    "object_type, object_id, relation, subject_type, subject_id, subject_relation";

/// PostgreSQL implementation of PolicyRepository
pub struct PgPolicyRepository {
    pool: PgPool,
}

impl PgPolicyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn tuple_from_row(row: &PgRow) -> Result<RelationTuple> {
    TupleKey {
        object_type: row.get("object_type"),
        object_id: row.get("object_id"),
        relation: row.get("relation"),
        subject_type: row.get("subject_type"),
        subject_id: row.get("subject_id"),
        subject_relation: row.get("subject_relation"),
    }
    .to_tuple()
}

/// Appends `AND ...` clauses for every populated filter field.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &RelationFilter) {
    if let Some(object_type) = filter.object_type {
        builder.push(" AND object_type = ").push_bind(object_type.as_str());
    }
    if let Some(object_id) = &filter.object_id {
        builder.push(" AND object_id = ").push_bind(object_id.clone());
    }
    if let Some(relation) = &filter.relation {
        builder.push(" AND relation = ").push_bind(relation.clone());
    }
    if let Some(subject_type) = filter.subject_type {
        builder.push(" AND subject_type = ").push_bind(subject_type.as_str());
    }
    if let Some(subject_id) = &filter.subject_id {
        builder.push(" AND subject_id = ").push_bind(subject_id.clone());
    }
    if let Some(subject_relation) = &filter.subject_relation {
        builder
            .push(" AND subject_relation = ")
            .push_bind(subject_relation.clone());
    }
}

#[async_trait]
impl PolicyRepository for PgPolicyRepository {
    async fn begin_write(&self) -> Result<Box<dyn PolicyWriteTx>> {
        let tx = self.pool.begin().await.map_err(driver_error)?;
        Ok(Box::new(PgPolicyWriteTx { tx }))
    }

    async fn snapshot(&self) -> Result<Box<dyn PolicySnapshot>> {
        let mut tx = self.pool.begin().await.map_err(driver_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(driver_error)?;
        Ok(Box::new(PgPolicySnapshot { tx: Mutex::new(tx) }))
    }

    #[instrument(skip(self))]
    async fn delete(&self, filter: &RelationFilter) -> Result<u64> {
        let mut builder =
            QueryBuilder::<Postgres>::new("DELETE FROM policies WHERE deleted_at IS NULL");
        push_filter(&mut builder, filter);
        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(driver_error)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn tombstone_domain(&self, domain_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE policies SET deleted_at = $2
            WHERE deleted_at IS NULL AND (
                (object_type = 'domain' AND object_id = $1)
                OR (subject_type = 'domain' AND subject_id = $1)
                OR (object_type, object_id) IN (
                    SELECT object_type, object_id FROM policies
                    WHERE relation = 'domain'
                      AND subject_type = 'domain'
                      AND subject_id = $1
                )
            )
            "#,
        )
        .bind(domain_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(driver_error)?;

        debug!(domain_id, tombstoned = result.rows_affected(), "domain tuples tombstoned");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn purge_tombstones(&self, before: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM policies WHERE deleted_at IS NOT NULL AND deleted_at < $1")
                .bind(before)
                .execute(&self.pool)
                .await
                .map_err(driver_error)?;
        Ok(result.rows_affected())
    }
}

/// Write transaction. Domain rows read here are held `FOR SHARE` until commit,
/// which orders concurrent status changes after the insert.
pub struct PgPolicyWriteTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PolicyWriteTx for PgPolicyWriteTx {
    async fn domain_status(&mut self, domain_id: &str) -> Result<Option<DomainStatus>> {
        let Ok(id) = Uuid::parse_str(domain_id) else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT status FROM domains WHERE id = $1 FOR SHARE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(driver_error)?;

        match row {
            Some(row) => {
                let status: String = row.get("status");
                Ok(Some(status.parse()?))
            }
            None => Ok(None),
        }
    }

    async fn parent_domain(&mut self, object: &ObjectRef) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT subject_id FROM policies
            WHERE object_type = $1 AND object_id = $2
              AND relation = 'domain' AND subject_type = 'domain'
              AND deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(object.object_type.as_str())
        .bind(&object.id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(driver_error)?;

        Ok(row.map(|r| r.get("subject_id")))
    }

    async fn insert(&mut self, tuples: &[RelationTuple]) -> Result<()> {
        if tuples.is_empty() {
            return Ok(());
        }
        let keys: Vec<TupleKey> = tuples.iter().map(RelationTuple::key).collect();
        let distinct: BTreeSet<&TupleKey> = keys.iter().collect();
        if distinct.len() != keys.len() {
            return Err(BastionError::conflict("relation repeated within the batch"));
        }
        let object_types: Vec<&str> = keys.iter().map(|k| k.object_type.as_str()).collect();
        let object_ids: Vec<&str> = keys.iter().map(|k| k.object_id.as_str()).collect();
        let relations: Vec<&str> = keys.iter().map(|k| k.relation.as_str()).collect();
        let subject_types: Vec<&str> = keys.iter().map(|k| k.subject_type.as_str()).collect();
        let subject_ids: Vec<&str> = keys.iter().map(|k| k.subject_id.as_str()).collect();
        let subject_relations: Vec<&str> =
            keys.iter().map(|k| k.subject_relation.as_str()).collect();

        // A tombstoned row with the same key is revived; a live one blocks the batch.
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO policies ({KEY_COLUMNS})
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[])
            ON CONFLICT ({KEY_COLUMNS}) DO UPDATE
                SET created_at = NOW(), deleted_at = NULL
                WHERE policies.deleted_at IS NOT NULL
            "#
        ))
        .bind(&object_types)
        .bind(&object_ids)
        .bind(&relations)
        .bind(&subject_types)
        .bind(&subject_ids)
        .bind(&subject_relations)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error(e, "relation already exists"))?;

        if result.rows_affected() != keys.len() as u64 {
            return Err(BastionError::conflict("relation already exists"));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(driver_error)
    }
}

/// Read-only repeatable-read view; every query of one evaluation sees the same data.
pub struct PgPolicySnapshot {
    tx: Mutex<Transaction<'static, Postgres>>,
}

#[async_trait]
impl PolicySnapshot for PgPolicySnapshot {
    async fn object_tuples(&self, object: &ObjectRef, relation: &str) -> Result<Vec<RelationTuple>> {
        let mut tx = self.tx.lock().await;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {KEY_COLUMNS} FROM policies
            WHERE object_type = $1 AND object_id = $2 AND relation = $3 AND deleted_at IS NULL
            ORDER BY {KEY_COLUMNS}
            "#
        ))
        .bind(object.object_type.as_str())
        .bind(&object.id)
        .bind(relation)
        .fetch_all(&mut **tx)
        .await
        .map_err(driver_error)?;

        rows.iter().map(tuple_from_row).collect()
    }

    async fn object_ids(&self, object_type: ObjectType) -> Result<Vec<String>> {
        let mut tx = self.tx.lock().await;
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT object_id FROM policies
            WHERE object_type = $1 AND deleted_at IS NULL
            ORDER BY object_id
            "#,
        )
        .bind(object_type.as_str())
        .fetch_all(&mut **tx)
        .await
        .map_err(driver_error)?;

        Ok(rows.iter().map(|r| r.get("object_id")).collect())
    }

    async fn read(
        &self,
        filter: &RelationFilter,
        after: Option<&TupleKey>,
        limit: usize,
    ) -> Result<Vec<RelationTuple>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {KEY_COLUMNS} FROM policies WHERE deleted_at IS NULL"
        ));
        push_filter(&mut builder, filter);
        if let Some(after) = after {
            builder.push(format!(" AND ({KEY_COLUMNS}) > ("));
            let mut values = builder.separated(", ");
            values.push_bind(after.object_type.clone());
            values.push_bind(after.object_id.clone());
            values.push_bind(after.relation.clone());
            values.push_bind(after.subject_type.clone());
            values.push_bind(after.subject_id.clone());
            values.push_bind(after.subject_relation.clone());
            builder.push(")");
        }
        builder
            .push(format!(" ORDER BY {KEY_COLUMNS} LIMIT "))
            .push_bind(limit as i64);

        let mut tx = self.tx.lock().await;
        let rows = builder
            .build()
            .fetch_all(&mut **tx)
            .await
            .map_err(driver_error)?;

        rows.iter().map(tuple_from_row).collect()
    }
}

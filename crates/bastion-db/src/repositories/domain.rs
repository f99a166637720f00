//! Domain repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;
use uuid::Uuid;

use bastion_core::{
    BastionError, Domain, DomainFilter, DomainId, DomainPage, DomainRepository, DomainStatus,
    Result, UserId,
};

use super::{db_error, driver_error};

const DOMAIN_COLUMNS: &str = "id, name, alias, tags, metadata, status, created_by, created_at, \
                              updated_by, updated_at, frozen_at";

/// PostgreSQL implementation of DomainRepository
pub struct PgDomainRepository {
    pool: PgPool,
}

impl PgDomainRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn domain_from_row(row: &PgRow) -> Result<Domain> {
    let status: String = row.get("status");
    let tags: Vec<String> = row.get("tags");
    let metadata: serde_json::Value = row.get("metadata");
    let updated_by: Option<Uuid> = row.get("updated_by");

    Ok(Domain {
        id: DomainId::from_uuid(row.get("id")),
        name: row.get("name"),
        alias: row.get("alias"),
        tags: tags.into_iter().collect(),
        metadata: serde_json::from_value(metadata)
            .map_err(|e| BastionError::internal_with("corrupt domain metadata", e))?,
        status: status.parse()?,
        created_by: UserId::from_uuid(row.get("created_by")),
        created_at: row.get("created_at"),
        updated_by: updated_by.map(UserId::from_uuid),
        updated_at: row.get("updated_at"),
        frozen_at: row.get("frozen_at"),
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &DomainFilter) {
    builder.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(name) = &filter.name {
        builder
            .push(" AND name ILIKE ")
            .push_bind(format!("%{}%", name.replace('%', "\\%").replace('_', "\\_")));
    }
    if let Some(tag) = &filter.tag {
        builder.push(" AND ").push_bind(tag.clone()).push(" = ANY(tags)");
    }
    if let Some(ids) = &filter.ids {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
        builder.push(" AND id = ANY(").push_bind(ids).push(")");
    }
}

#[async_trait]
impl DomainRepository for PgDomainRepository {
    #[instrument(skip(self, domain), fields(alias = %domain.alias))]
    async fn create(&self, domain: &Domain) -> Result<Domain> {
        let metadata = serde_json::to_value(&domain.metadata)
            .map_err(|e| BastionError::internal_with("failed to encode metadata", e))?;
        let tags: Vec<String> = domain.tags.iter().cloned().collect();

        sqlx::query(
            r#"
            INSERT INTO domains (id, name, alias, tags, metadata, status, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(domain.id.as_uuid())
        .bind(&domain.name)
        .bind(&domain.alias)
        .bind(&tags)
        .bind(&metadata)
        .bind(domain.status.as_str())
        .bind(domain.created_by.as_uuid())
        .bind(domain.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, "domain alias already in use"))?;

        Ok(domain.clone())
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: DomainId) -> Result<Option<Domain>> {
        let row = sqlx::query(&format!("SELECT {} FROM domains WHERE id = $1", DOMAIN_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(driver_error)?;

        row.as_ref().map(domain_from_row).transpose()
    }

    #[instrument(skip(self, domain), fields(domain_id = %domain.id))]
    async fn update(&self, domain: &Domain) -> Result<Domain> {
        let metadata = serde_json::to_value(&domain.metadata)
            .map_err(|e| BastionError::internal_with("failed to encode metadata", e))?;
        let tags: Vec<String> = domain.tags.iter().cloned().collect();

        let row = sqlx::query(&format!(
            r#"
            UPDATE domains
            SET name = $1, tags = $2, metadata = $3, updated_by = $4, updated_at = $5
            WHERE id = $6
            RETURNING {}
            "#,
            DOMAIN_COLUMNS
        ))
        .bind(&domain.name)
        .bind(&tags)
        .bind(&metadata)
        .bind(domain.updated_by.map(|u| u.into_uuid()))
        .bind(domain.updated_at)
        .bind(domain.id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(driver_error)?;

        match row {
            Some(row) => domain_from_row(&row),
            None => Err(BastionError::not_found("domain", domain.id.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: DomainId,
        status: DomainStatus,
        updated_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<Domain> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE domains
            SET status = $1,
                updated_by = $2,
                updated_at = $3,
                frozen_at = CASE WHEN $1 = 'frozen' THEN COALESCE(frozen_at, $3) ELSE frozen_at END
            WHERE id = $4
            RETURNING {}
            "#,
            DOMAIN_COLUMNS
        ))
        .bind(status.as_str())
        .bind(updated_by.as_uuid())
        .bind(at)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(e, "domain alias already in use"))?;

        match row {
            Some(row) => domain_from_row(&row),
            None => Err(BastionError::not_found("domain", id.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &DomainFilter) -> Result<DomainPage> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM domains");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(driver_error)?
            .get("total");

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM domains", DOMAIN_COLUMNS));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);

        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(driver_error)?;

        let domains = rows.iter().map(domain_from_row).collect::<Result<Vec<_>>>()?;

        Ok(DomainPage {
            total: total as u64,
            offset: filter.offset,
            limit: filter.limit,
            domains,
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: DomainId) -> Result<()> {
        sqlx::query("DELETE FROM domains WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(driver_error)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge_frozen(&self, before: DateTime<Utc>) -> Result<Vec<DomainId>> {
        let rows = sqlx::query(
            "DELETE FROM domains WHERE status = 'frozen' AND frozen_at < $1 RETURNING id",
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(driver_error)?;

        Ok(rows
            .iter()
            .map(|row| DomainId::from_uuid(row.get("id")))
            .collect())
    }
}

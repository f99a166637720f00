//! Invitation repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;
use uuid::Uuid;

use bastion_core::{
    BastionError, DomainId, DomainRelation, Invitation, InvitationFilter, InvitationPage,
    InvitationRepository, InvitationState, Result, UserId,
};

use super::{db_error, driver_error};

const INVITATION_COLUMNS: &str =
    "user_id, domain_id, invited_by, relation, token, created_at, updated_at, confirmed_at";

/// PostgreSQL implementation of InvitationRepository
pub struct PgInvitationRepository {
    pool: PgPool,
}

impl PgInvitationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn invitation_from_row(row: &PgRow) -> Result<Invitation> {
    let relation: String = row.get("relation");
    Ok(Invitation {
        invited_by: UserId::from_uuid(row.get("invited_by")),
        user_id: UserId::from_uuid(row.get("user_id")),
        domain_id: DomainId::from_uuid(row.get("domain_id")),
        relation: relation.parse()?,
        token: row.get("token"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        confirmed_at: row.get("confirmed_at"),
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &InvitationFilter) {
    builder.push(" WHERE TRUE");
    if let Some(scope) = &filter.scope {
        let domains: Vec<Uuid> = scope.domains.iter().map(|d| d.into_uuid()).collect();
        builder
            .push(" AND (user_id = ")
            .push_bind(scope.user.into_uuid())
            .push(" OR invited_by = ")
            .push_bind(scope.user.into_uuid())
            .push(" OR domain_id = ANY(")
            .push_bind(domains)
            .push("))");
    }
    if let Some(user_id) = filter.user_id {
        builder.push(" AND user_id = ").push_bind(user_id.into_uuid());
    }
    if let Some(invited_by) = filter.invited_by {
        builder.push(" AND invited_by = ").push_bind(invited_by.into_uuid());
    }
    if let Some(domain_id) = filter.domain_id {
        builder.push(" AND domain_id = ").push_bind(domain_id.into_uuid());
    }
    if let Some(relation) = filter.relation {
        builder.push(" AND relation = ").push_bind(relation.as_str());
    }
    match filter.state {
        InvitationState::Pending => {
            builder.push(" AND confirmed_at IS NULL");
        }
        InvitationState::Accepted => {
            builder.push(" AND confirmed_at IS NOT NULL");
        }
        InvitationState::All => {}
    }
}

#[async_trait]
impl InvitationRepository for PgInvitationRepository {
    #[instrument(skip(self, invitation), fields(user_id = %invitation.user_id, domain_id = %invitation.domain_id))]
    async fn create(&self, invitation: &Invitation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO invitations (user_id, domain_id, invited_by, relation, token, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(invitation.user_id.as_uuid())
        .bind(invitation.domain_id.as_uuid())
        .bind(invitation.invited_by.as_uuid())
        .bind(invitation.relation.as_str())
        .bind(&invitation.token)
        .bind(invitation.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, "invitation already exists"))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, user_id: UserId, domain_id: DomainId) -> Result<Option<Invitation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM invitations WHERE user_id = $1 AND domain_id = $2",
            INVITATION_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .bind(domain_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(driver_error)?;

        row.as_ref().map(invitation_from_row).transpose()
    }

    #[instrument(skip(self, token))]
    async fn replace_token(
        &self,
        user_id: UserId,
        domain_id: DomainId,
        invited_by: UserId,
        relation: DomainRelation,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Invitation> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE invitations
            SET token = $1, invited_by = $2, relation = $3, updated_at = $4
            WHERE user_id = $5 AND domain_id = $6 AND confirmed_at IS NULL
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        ))
        .bind(token)
        .bind(invited_by.as_uuid())
        .bind(relation.as_str())
        .bind(at)
        .bind(user_id.as_uuid())
        .bind(domain_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(driver_error)?;

        match row {
            Some(row) => invitation_from_row(&row),
            None => Err(BastionError::not_found(
                "invitation",
                format!("{}/{}", user_id, domain_id),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn confirm(&self, user_id: UserId, domain_id: DomainId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE invitations SET confirmed_at = $1, updated_at = $1
            WHERE user_id = $2 AND domain_id = $3 AND confirmed_at IS NULL
            "#,
        )
        .bind(at)
        .bind(user_id.as_uuid())
        .bind(domain_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(driver_error)?;

        if result.rows_affected() == 0 {
            return Err(BastionError::not_found(
                "invitation",
                format!("{}/{}", user_id, domain_id),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &InvitationFilter) -> Result<InvitationPage> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM invitations");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(driver_error)?
            .get("total");

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM invitations", INVITATION_COLUMNS));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, user_id, domain_id LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);

        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(driver_error)?;

        Ok(InvitationPage {
            total: total as u64,
            offset: filter.offset,
            limit: filter.limit,
            invitations: rows.iter().map(invitation_from_row).collect::<Result<_>>()?,
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, user_id: UserId, domain_id: DomainId) -> Result<()> {
        let result = sqlx::query("DELETE FROM invitations WHERE user_id = $1 AND domain_id = $2")
            .bind(user_id.as_uuid())
            .bind(domain_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(driver_error)?;

        if result.rows_affected() == 0 {
            return Err(BastionError::not_found(
                "invitation",
                format!("{}/{}", user_id, domain_id),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_for_domain(&self, domain_id: DomainId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM invitations WHERE domain_id = $1")
            .bind(domain_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(driver_error)?;
        Ok(result.rows_affected())
    }
}

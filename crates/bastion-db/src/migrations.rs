//! Idempotent schema migrations for the authorization tables

use bastion_core::{BastionError, Result};
use sqlx::PgPool;
use tracing::{debug, info, instrument};

/// Ordered DDL statements. Every statement is safe to re-run.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "create domains table",
        r#"
        CREATE TABLE IF NOT EXISTS domains (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            alias TEXT NOT NULL,
            tags TEXT[] NOT NULL DEFAULT '{}',
            metadata JSONB NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'enabled'
                CHECK (status IN ('enabled', 'disabled', 'frozen')),
            created_by UUID NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_by UUID,
            updated_at TIMESTAMPTZ,
            frozen_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "create unique alias index on live domains",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_domains_alias_live
            ON domains (alias) WHERE status <> 'frozen'
        "#,
    ),
    (
        "create policies table",
        r#"
        CREATE TABLE IF NOT EXISTS policies (
            object_type TEXT COLLATE "C" NOT NULL,
            object_id TEXT COLLATE "C" NOT NULL,
            relation TEXT COLLATE "C" NOT NULL,
            subject_type TEXT COLLATE "C" NOT NULL,
            subject_id TEXT COLLATE "C" NOT NULL,
            subject_relation TEXT COLLATE "C" NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            deleted_at TIMESTAMPTZ,
            PRIMARY KEY (object_type, object_id, relation, subject_type, subject_id, subject_relation)
        )
        "#,
    ),
    (
        "create policies object index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_policies_object
            ON policies (object_type, object_id) WHERE deleted_at IS NULL
        "#,
    ),
    (
        "create policies subject index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_policies_subject
            ON policies (subject_type, subject_id) WHERE deleted_at IS NULL
        "#,
    ),
    (
        "create policies tombstone index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_policies_deleted_at
            ON policies (deleted_at) WHERE deleted_at IS NOT NULL
        "#,
    ),
    (
        "create invitations table",
        r#"
        CREATE TABLE IF NOT EXISTS invitations (
            user_id UUID NOT NULL,
            domain_id UUID NOT NULL REFERENCES domains (id) ON DELETE CASCADE,
            invited_by UUID NOT NULL,
            relation TEXT NOT NULL,
            token TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ,
            confirmed_at TIMESTAMPTZ,
            PRIMARY KEY (user_id, domain_id)
        )
        "#,
    ),
    (
        "create token nonces table",
        r#"
        CREATE TABLE IF NOT EXISTS token_nonces (
            nonce TEXT PRIMARY KEY,
            reason TEXT NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "create token nonces expiry index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_token_nonces_expires_at
            ON token_nonces (nonce, expires_at)
        "#,
    ),
];

/// Runs database migrations to create required tables.
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations");

    for (name, ddl) in MIGRATIONS {
        debug!(migration = name, "applying");
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| BastionError::internal_with(format!("migration failed: {}", name), e))?;
    }

    info!(count = MIGRATIONS.len(), "Database migrations complete");
    Ok(())
}

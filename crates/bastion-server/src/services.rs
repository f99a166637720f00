//! Wiring of repositories, engines and managers for the configured backend

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use bastion_api::AppState;
use bastion_core::{
    Authorizer, DomainRepository, InvitationRepository, NonceRepository, PolicyRepository,
    RequestContext,
};
use bastion_db::{
    create_pool, run_migrations, MemoryStore, PgDomainRepository, PgInvitationRepository,
    PgNonceRepository, PgPolicyRepository,
};
use bastion_domains::{DomainService, InvitationService};
use bastion_policy::{CacheMetrics, PolicyEngine, TracedAuthorizer};
use bastion_token::{OpenDirectory, SigningKeys, TokenService};

use crate::config::{Backend, Settings};

struct Repositories {
    policies: Arc<dyn PolicyRepository>,
    domains: Arc<dyn DomainRepository>,
    invitations: Arc<dyn InvitationRepository>,
    nonces: Arc<dyn NonceRepository>,
}

pub struct Services {
    pub authz: Arc<dyn Authorizer>,
    pub tokens: Arc<TokenService>,
    pub domains: Arc<DomainService>,
    pub invitations: Arc<InvitationService>,
    pub cache_metrics: Arc<CacheMetrics>,
    pub pool: Option<PgPool>,
}

impl Services {
    /// Connects the configured backend. Postgres schemas are migrated when
    /// `migrate` is set.
    pub async fn build(settings: &Settings, migrate: bool) -> Result<Self> {
        let (repos, pool) = match settings.database.backend {
            Backend::Memory => {
                info!("Using in-memory storage backend");
                let store = Arc::new(MemoryStore::new());
                let repos = Repositories {
                    policies: store.clone(),
                    domains: store.clone(),
                    invitations: store.clone(),
                    nonces: store,
                };
                (repos, None)
            }
            Backend::Postgres => {
                info!("Connecting to PostgreSQL...");
                let pool = create_pool(&settings.database_config())
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                if migrate {
                    run_migrations(&pool).await.context("Failed to run migrations")?;
                }
                let repos = Repositories {
                    policies: Arc::new(PgPolicyRepository::new(pool.clone())),
                    domains: Arc::new(PgDomainRepository::new(pool.clone())),
                    invitations: Arc::new(PgInvitationRepository::new(pool.clone())),
                    nonces: Arc::new(PgNonceRepository::new(pool.clone())),
                };
                (repos, Some(pool))
            }
        };

        let engine = PolicyEngine::new(repos.policies, &settings.cache_config());
        let cache_metrics = engine.cache_metrics();
        let authz: Arc<dyn Authorizer> = Arc::new(TracedAuthorizer::new(engine));

        let keys = SigningKeys::load(&settings.key_source()).context("Failed to load signing key")?;
        let tokens = Arc::new(
            TokenService::new(
                keys,
                settings.token_config(),
                repos.nonces,
                Arc::new(OpenDirectory),
            )
            .context("Failed to create token service")?,
        );
        let warmed = tokens
            .blacklist()
            .warm()
            .await
            .context("Failed to load the nonce blacklist")?;
        info!(entries = warmed, "nonce blacklist loaded");

        let domains = Arc::new(
            DomainService::new(repos.domains.clone(), repos.invitations.clone(), authz.clone())
                .with_retention(settings.freeze_retention()),
        );
        let invitations = Arc::new(InvitationService::new(
            repos.invitations,
            repos.domains,
            authz.clone(),
            tokens.clone(),
        ));

        Ok(Self {
            authz,
            tokens,
            domains,
            invitations,
            cache_metrics,
            pool,
        })
    }

    /// Grants platform administration to the configured users.
    pub async fn bootstrap(&self, settings: &Settings) -> Result<()> {
        let admins = settings.platform_admins()?;
        if admins.is_empty() {
            return Ok(());
        }
        let added = self
            .domains
            .ensure_platform_admins(&RequestContext::background(), &admins)
            .await
            .context("Failed to bootstrap platform administrators")?;
        info!(configured = admins.len(), added, "platform administrators bootstrapped");
        Ok(())
    }

    pub fn app_state(&self, settings: &Settings) -> AppState {
        let state = AppState::new(
            self.authz.clone(),
            self.tokens.clone(),
            self.domains.clone(),
            self.invitations.clone(),
        )
        .with_service_key(&settings.server.service_api_key)
        .with_request_timeout(settings.request_timeout())
        .with_cache_metrics(self.cache_metrics.clone());
        match &self.pool {
            Some(pool) => state.with_db_pool(pool.clone()),
            None => state,
        }
    }
}

//! Application state shared by all handlers

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use sqlx::PgPool;

use bastion_core::{Authorizer, RequestContext};
use bastion_domains::{DomainService, InvitationService};
use bastion_policy::CacheMetrics;
use bastion_token::TokenService;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub authz: Arc<dyn Authorizer>,
    pub tokens: Arc<TokenService>,
    pub domains: Arc<DomainService>,
    pub invitations: Arc<InvitationService>,
    /// Postgres pool checked by the health endpoints; `None` for the memory backend.
    pub db_pool: Option<PgPool>,
    pub cache_metrics: Option<Arc<CacheMetrics>>,
    /// SHA-256 of the service API key
    service_key_digest: Option<[u8; 32]>,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(
        authz: Arc<dyn Authorizer>,
        tokens: Arc<TokenService>,
        domains: Arc<DomainService>,
        invitations: Arc<InvitationService>,
    ) -> Self {
        Self {
            authz,
            tokens,
            domains,
            invitations,
            db_pool: None,
            cache_metrics: None,
            service_key_digest: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// An empty key leaves the service endpoints disabled.
    pub fn with_service_key(mut self, key: &str) -> Self {
        self.service_key_digest = (!key.is_empty()).then(|| digest(key.as_bytes()));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_db_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn with_cache_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.cache_metrics = Some(metrics);
        self
    }

    pub fn service_key_digest(&self) -> Option<&[u8; 32]> {
        self.service_key_digest.as_ref()
    }

    /// A fresh context carrying the configured deadline.
    pub fn request_context(&self, request_id: Option<&str>) -> RequestContext {
        let ctx = RequestContext::with_timeout(self.request_timeout);
        match request_id {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        }
    }
}

pub(crate) fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

//! Token issuance, verification, refresh rotation and revocation.
//!
//! Security properties:
//! - Only EdDSA is accepted; the algorithm is pinned on both sides
//! - `iss`, `aud`, `exp`, `nbf` and `sub` are required, with 30s leeway
//! - Refresh tokens rotate; presenting a rotated token revokes its whole chain
//! - Every rejection surfaces as the same `unauthenticated` message

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use bastion_core::{
    BastionError, DomainId, DomainRelation, ErrorKind, NonceReason, NonceRepository,
    RequestContext, Result, UserId,
};

use crate::blacklist::{chain_key, NonceBlacklist};
use crate::claims::{Claims, Identity, IssuedToken, TokenKind, TokenPair};
use crate::directory::SubjectDirectory;
use crate::keys::{JwkSet, SigningKeys};

const ALGORITHM: Algorithm = Algorithm::EdDSA;

/// Clock skew tolerated on `nbf` and `exp`.
pub const LEEWAY_SECS: u64 = 30;

/// Upper bound on recovery token lifetime.
pub const MAX_RECOVERY_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub invitation_ttl: Duration,
    pub recovery_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "bastion".to_string(),
            audience: "bastion".to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(24 * 60 * 60),
            invitation_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            recovery_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl TokenConfig {
    pub fn validate(&self) -> Result<()> {
        let ttls = [
            ("access", self.access_ttl),
            ("refresh", self.refresh_ttl),
            ("invitation", self.invitation_ttl),
            ("recovery", self.recovery_ttl),
        ];
        for (name, ttl) in ttls {
            if ttl.is_zero() {
                return Err(BastionError::invalid_argument(format!(
                    "{} token lifetime must be positive",
                    name
                )));
            }
        }
        if self.access_ttl > self.refresh_ttl {
            return Err(BastionError::invalid_argument(
                "access token lifetime must not exceed refresh token lifetime",
            ));
        }
        if self.recovery_ttl > MAX_RECOVERY_TTL {
            return Err(BastionError::invalid_argument(format!(
                "recovery token lifetime must be at most {}s",
                MAX_RECOVERY_TTL.as_secs()
            )));
        }
        if self.issuer.is_empty() || self.audience.is_empty() {
            return Err(BastionError::invalid_argument("issuer and audience are required"));
        }
        Ok(())
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::Invitation => self.invitation_ttl,
            TokenKind::Recovery => self.recovery_ttl,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRequest {
    pub subject: UserId,
    pub kind: TokenKind,
    #[serde(default)]
    pub domain: Option<DomainId>,
    #[serde(default)]
    pub relation: Option<DomainRelation>,
}

impl IssueRequest {
    pub fn new(subject: UserId, kind: TokenKind) -> Self {
        Self {
            subject,
            kind,
            domain: None,
            relation: None,
        }
    }

    pub fn in_domain(mut self, domain: DomainId) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_relation(mut self, relation: DomainRelation) -> Self {
        self.relation = Some(relation);
        self
    }

    /// Checks the kind/domain/relation pairing.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            TokenKind::Invitation => {
                if self.domain.is_none() || self.relation.is_none() {
                    return Err(BastionError::invalid_argument(
                        "invitation tokens require a domain and a relation",
                    ));
                }
            }
            TokenKind::Recovery => {
                if self.domain.is_some() || self.relation.is_some() {
                    return Err(BastionError::invalid_argument(
                        "recovery tokens cannot be scoped to a domain",
                    ));
                }
            }
            TokenKind::Access | TokenKind::Refresh => {
                if self.relation.is_some() {
                    return Err(BastionError::invalid_argument(format!(
                        "{} tokens do not carry a relation",
                        self.kind
                    )));
                }
            }
        }
        Ok(())
    }
}

pub struct TokenService {
    keys: SigningKeys,
    config: TokenConfig,
    blacklist: Arc<NonceBlacklist>,
    directory: Arc<dyn SubjectDirectory>,
}

impl TokenService {
    pub fn new(
        keys: SigningKeys,
        config: TokenConfig,
        nonces: Arc<dyn NonceRepository>,
        directory: Arc<dyn SubjectDirectory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keys,
            config,
            blacklist: Arc::new(NonceBlacklist::new(nonces)),
            directory,
        })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn blacklist(&self) -> &Arc<NonceBlacklist> {
        &self.blacklist
    }

    pub fn jwks(&self) -> JwkSet {
        self.keys.jwks()
    }

    /// Mints one token of the requested kind.
    #[instrument(skip(self, ctx, request), fields(subject = %request.subject, kind = %request.kind))]
    pub async fn issue(&self, ctx: &RequestContext, request: &IssueRequest) -> Result<IssuedToken> {
        request.validate()?;
        ctx.run("issue", async {
            self.ensure_known(&request.subject).await?;
            let chain = (request.kind == TokenKind::Refresh).then(new_nonce);
            let (token, claims) = self.mint(
                &request.subject,
                request.kind,
                request.domain.as_ref(),
                request.relation,
                chain,
            )?;
            debug!(nonce = %claims.jti, "token issued");
            Ok(IssuedToken {
                token,
                kind: request.kind,
                expires_at: claims.expires_at(),
            })
        })
        .await
    }

    /// Mints an access/refresh pair on a fresh chain.
    #[instrument(skip(self, ctx, subject), fields(subject = %subject))]
    pub async fn issue_pair(
        &self,
        ctx: &RequestContext,
        subject: &UserId,
        domain: Option<&DomainId>,
    ) -> Result<TokenPair> {
        ctx.run("issue_pair", async {
            self.ensure_known(subject).await?;
            let pair = self.mint_pair(subject, domain, new_nonce())?;
            info!("token pair issued");
            Ok(pair)
        })
        .await
    }

    /// Verifies signature, lifetime and blacklist status.
    pub async fn identify(&self, ctx: &RequestContext, token: &str) -> Result<Identity> {
        ctx.run("identify", async {
            let claims = self.verify(token, true)?;
            self.ensure_not_blocked(&claims).await?;
            Identity::from_claims(&claims)
        })
        .await
    }

    /// Rotates `refresh_token` into a new pair on the same chain.
    pub async fn refresh(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
        domain: Option<&DomainId>,
    ) -> Result<TokenPair> {
        self.refresh_with(ctx, refresh_token, domain, |_| async { Ok(()) })
            .await
    }

    /// Like [`TokenService::refresh`], with `authorize` deciding whether the
    /// bearer may have the new pair. It runs after reuse detection and before
    /// the token is rotated, so a refusal leaves the refresh token usable.
    #[instrument(skip(self, ctx, refresh_token, authorize))]
    pub async fn refresh_with<F, Fut>(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
        domain: Option<&DomainId>,
        authorize: F,
    ) -> Result<TokenPair>
    where
        F: FnOnce(Identity) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        ctx.run("refresh", async {
            let claims = self.verify(refresh_token, true)?;
            if claims.kind != TokenKind::Refresh {
                warn!(kind = %claims.kind, "non-refresh token presented for refresh");
                return Err(rejected());
            }
            let Some(chain) = claims.chain.clone() else {
                return Err(rejected());
            };
            let identity = Identity::from_claims(&claims)?;

            if self.blocked(&chain_key(&chain)).await?.is_some() {
                return Err(rejected());
            }
            match self.blocked(&claims.jti).await? {
                Some(NonceReason::Rotated) => return self.reuse_detected(&chain).await,
                Some(_) => return Err(rejected()),
                None => {}
            }

            let subject = identity.subject;
            let target = domain.copied().or(identity.domain);
            authorize(identity).await?;

            let rotated = self
                .blacklist
                .rotate(&claims.jti, claims.expires_at())
                .await
                .map_err(unavailable)?;
            if !rotated {
                return self.reuse_detected(&chain).await;
            }

            let pair = self.mint_pair(&subject, target.as_ref(), chain)?;
            debug!(subject = %subject, "refresh token rotated");
            Ok(pair)
        })
        .await
    }

    /// Blocks the token's nonce until it expires. Revoking a refresh token
    /// revokes its whole chain. Expired tokens are a no-op.
    #[instrument(skip(self, ctx, token))]
    pub async fn revoke(&self, ctx: &RequestContext, token: &str) -> Result<()> {
        ctx.run("revoke", async {
            let claims = self.verify(token, false)?;
            let now = Utc::now();
            if claims.exp + LEEWAY_SECS as i64 <= now.timestamp() {
                debug!("revoking an expired token is a no-op");
                return Ok(());
            }
            self.blacklist
                .block(&claims.jti, NonceReason::Revoked, claims.expires_at())
                .await?;
            if claims.kind == TokenKind::Refresh {
                if let Some(chain) = &claims.chain {
                    self.revoke_chain(chain).await?;
                }
            }
            info!(kind = %claims.kind, nonce = %claims.jti, "token revoked");
            Ok(())
        })
        .await
    }

    async fn reuse_detected<T>(&self, chain: &str) -> Result<T> {
        warn!(chain, "rotated refresh token reused, revoking chain");
        self.revoke_chain(chain).await?;
        Err(rejected())
    }

    async fn revoke_chain(&self, chain: &str) -> Result<()> {
        // Nothing minted on this chain outlives a refresh lifetime from now.
        let until = Utc::now() + chrono_ttl(self.config.refresh_ttl) + chrono::Duration::seconds(LEEWAY_SECS as i64);
        self.blacklist
            .block(&chain_key(chain), NonceReason::ChainRevoked, until)
            .await
    }

    async fn ensure_known(&self, subject: &UserId) -> Result<()> {
        match self.directory.exists(subject).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(subject = %subject, "token requested for unknown subject");
                Err(rejected())
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn ensure_not_blocked(&self, claims: &Claims) -> Result<()> {
        if let Some(reason) = self.blocked(&claims.jti).await? {
            warn!(nonce = %claims.jti, reason = reason.as_str(), "blacklisted token presented");
            return Err(rejected());
        }
        if let Some(chain) = &claims.chain {
            if self.blocked(&chain_key(chain)).await?.is_some() {
                warn!(chain = %chain, "token from revoked chain presented");
                return Err(rejected());
            }
        }
        Ok(())
    }

    async fn blocked(&self, key: &str) -> Result<Option<NonceReason>> {
        self.blacklist.lookup(key).await.map_err(unavailable)
    }

    fn mint_pair(&self, subject: &UserId, domain: Option<&DomainId>, chain: String) -> Result<TokenPair> {
        let (access_token, access) =
            self.mint(subject, TokenKind::Access, domain, None, Some(chain.clone()))?;
        let (refresh_token, refresh) =
            self.mint(subject, TokenKind::Refresh, domain, None, Some(chain))?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            access_expires_at: access.expires_at(),
            refresh_expires_at: refresh.expires_at(),
        })
    }

    fn mint(
        &self,
        subject: &UserId,
        kind: TokenKind,
        domain: Option<&DomainId>,
        relation: Option<DomainRelation>,
        chain: Option<String>,
    ) -> Result<(String, Claims)> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            sub: subject.to_string(),
            iat: now,
            nbf: now,
            exp: now + self.config.ttl(kind).as_secs() as i64,
            jti: new_nonce(),
            kind,
            domain: domain.map(|d| d.to_string()),
            relation,
            chain,
        };
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        let mut header = Header::new(ALGORITHM);
        header.kid = Some(self.keys.kid().to_string());
        encode(&header, claims, self.keys.encoding())
            .map_err(|e| BastionError::internal_with("token signing failed", e))
    }

    fn verify(&self, token: &str, validate_exp: bool) -> Result<Claims> {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
        validation.leeway = LEEWAY_SECS;
        validation.validate_nbf = true;
        validation.validate_exp = validate_exp;

        decode::<Claims>(token, self.keys.decoding(), &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!(error = %e, "token verification failed");
                rejected()
            })
    }
}

fn new_nonce() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::seconds(ttl.as_secs() as i64)
}

fn rejected() -> BastionError {
    BastionError::unauthenticated("invalid or expired token")
}

/// Nonce store failures fail the call closed.
fn unavailable(e: BastionError) -> BastionError {
    if e.kind() == ErrorKind::Unauthenticated {
        return e;
    }
    error!(error = %e, "nonce blacklist unavailable");
    rejected()
}

//! Domain invitations: send, view, list, accept and delete.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use bastion_core::{
    Authorizer, BastionError, DomainId, DomainRelation, DomainRepository, DomainStatus, ErrorKind,
    Invitation, InvitationFilter, InvitationPage, InvitationRepository, InvitationScope,
    InvitationState, ObjectRef, ObjectType, RelationTuple, RequestContext, Result, SubjectRef,
    UserId,
};
use bastion_token::{IssueRequest, TokenKind, TokenService};

use crate::access::Access;

/// Upper bound on invitations processed by one accept call.
pub const MAX_ACCEPT: u64 = 1000;

/// Attempts at each write that completes an invitation: revoking a token and
/// setting `confirmed_at`.
pub const CONFIRM_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendInvitation {
    pub user_id: UserId,
    pub domain_id: DomainId,
    pub relation: DomainRelation,
    #[serde(default)]
    pub resend: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptFailure {
    pub domain_id: DomainId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of accepting pending invitations. `failed` is non-empty only on
/// partial success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptOutcome {
    pub accepted: Vec<DomainId>,
    pub failed: Vec<AcceptFailure>,
}

pub struct InvitationService {
    invitations: Arc<dyn InvitationRepository>,
    domains: Arc<dyn DomainRepository>,
    tokens: Arc<TokenService>,
    access: Access,
}

impl InvitationService {
    pub fn new(
        invitations: Arc<dyn InvitationRepository>,
        domains: Arc<dyn DomainRepository>,
        authz: Arc<dyn Authorizer>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            invitations,
            domains,
            tokens,
            access: Access::new(authz),
        }
    }

    fn authz(&self) -> &Arc<dyn Authorizer> {
        self.access.authz()
    }

    /// Issues an invitation token and stores the invitation. Returns the
    /// invitation and whether a new row was created (`false` on resend).
    #[instrument(skip(self, ctx, request), fields(user_id = %request.user_id, domain_id = %request.domain_id))]
    pub async fn send(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        request: &SendInvitation,
    ) -> Result<(Invitation, bool)> {
        ctx.run("send_invitation", async {
            let SendInvitation {
                user_id,
                domain_id,
                relation,
                resend,
            } = *request;

            if !self.access.is_domain_admin(ctx, caller, &domain_id).await? {
                return Err(BastionError::permission_denied("admin", format!("domain:{}", domain_id)));
            }
            let domain = self
                .domains
                .get_by_id(domain_id)
                .await?
                .ok_or_else(|| BastionError::not_found("domain", domain_id.to_string()))?;
            if domain.status != DomainStatus::Enabled {
                return Err(BastionError::failed_precondition(format!(
                    "domain is {}",
                    domain.status
                )));
            }

            let held = self
                .authz()
                .retrieve_permissions(ctx, &SubjectRef::user(&user_id), &ObjectRef::domain(&domain_id))
                .await?;
            if held.iter().any(|r| r == relation.as_str()) {
                return Err(BastionError::conflict(format!(
                    "user already holds {} on the domain",
                    relation
                )));
            }

            if resend {
                let existing = self
                    .invitations
                    .get(user_id, domain_id)
                    .await?
                    .ok_or_else(|| BastionError::not_found("invitation", format!("{}/{}", user_id, domain_id)))?;
                if !existing.is_pending() {
                    return Err(BastionError::conflict("invitation was already accepted"));
                }
                let issued = self.issue(ctx, user_id, domain_id, relation).await?;
                self.revoke_token(ctx, domain_id, &existing.token).await?;
                let invitation = self
                    .invitations
                    .replace_token(user_id, domain_id, *caller, relation, &issued, Utc::now())
                    .await?;
                info!(invited_by = %caller, "invitation resent");
                return Ok((invitation, false));
            }

            let token = self.issue(ctx, user_id, domain_id, relation).await?;
            let invitation = Invitation {
                invited_by: *caller,
                user_id,
                domain_id,
                relation,
                token,
                created_at: Utc::now(),
                updated_at: None,
                confirmed_at: None,
            };
            if let Err(e) = self.invitations.create(&invitation).await {
                // The token was never handed out; the create error is what the caller needs.
                if let Err(revoke_err) = self.revoke_token(ctx, domain_id, &invitation.token).await {
                    error!(error = %revoke_err, "failed to revoke unsent invitation token");
                }
                return Err(e);
            }
            info!(invited_by = %caller, relation = %relation, "invitation sent");
            Ok((invitation, true))
        })
        .await
    }

    pub async fn view(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        user_id: UserId,
        domain_id: DomainId,
    ) -> Result<Invitation> {
        ctx.run("view_invitation", async { self.visible(ctx, caller, user_id, domain_id).await })
            .await
    }

    /// Platform administrators see every invitation. Everyone else sees the
    /// invitations addressed to or sent by them and those of the domains they
    /// administer.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        mut filter: InvitationFilter,
    ) -> Result<InvitationPage> {
        filter.validate()?;
        ctx.run("list_invitations", async {
            if !self.access.is_platform_admin(ctx, caller).await? {
                let administered = self
                    .authz()
                    .lookup_resources(ctx, &SubjectRef::user(caller), "admin", ObjectType::Domain)
                    .await?;
                let domains = administered
                    .iter()
                    .map(|id| id.parse::<DomainId>())
                    .collect::<Result<Vec<_>>>()?;
                filter.scope = Some(InvitationScope {
                    user: *caller,
                    domains,
                });
            }
            self.invitations.list(&filter).await
        })
        .await
    }

    /// Accepts every pending invitation addressed to `caller`. Domains whose
    /// invitation could not be completed are reported in `failed`.
    #[instrument(skip(self, ctx))]
    pub async fn accept(&self, ctx: &RequestContext, caller: &UserId) -> Result<AcceptOutcome> {
        let filter = InvitationFilter {
            user_id: Some(*caller),
            state: InvitationState::Pending,
            limit: MAX_ACCEPT,
            ..InvitationFilter::default()
        };
        let pending = ctx
            .run("list_pending_invitations", self.invitations.list(&filter))
            .await?;

        // Deadline is enforced per invitation; domains joined before it
        // expires stay in `accepted`.
        let mut outcome = AcceptOutcome::default();
        for invitation in pending.invitations {
            let domain_id = invitation.domain_id;
            let result = ctx
                .run("accept_invitation", self.accept_one(ctx, caller, &invitation))
                .await;
            match result {
                Ok(()) => outcome.accepted.push(domain_id),
                Err(e) => {
                    warn!(domain_id = %domain_id, error = %e, "invitation not accepted");
                    outcome.failed.push(AcceptFailure {
                        domain_id,
                        kind: e.kind(),
                        message: e.public_message(),
                    });
                }
            }
        }
        info!(
            accepted = outcome.accepted.len(),
            failed = outcome.failed.len(),
            "invitations processed"
        );
        Ok(outcome)
    }

    /// Invitee, inviter, domain admin or platform admin. Revokes the token of
    /// a pending invitation.
    #[instrument(skip(self, ctx))]
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        user_id: UserId,
        domain_id: DomainId,
    ) -> Result<()> {
        ctx.run("delete_invitation", async {
            let invitation = self.visible(ctx, caller, user_id, domain_id).await?;
            if invitation.is_pending() {
                self.revoke_token(ctx, domain_id, &invitation.token).await?;
            }
            self.invitations.delete(user_id, domain_id).await
        })
        .await
    }

    /// Writes the relation, revokes the token, then records `confirmed_at`.
    /// A failure after the revoke leaves a pending invitation with a dead
    /// token; the next accept finds the relation in place and only confirms.
    async fn accept_one(&self, ctx: &RequestContext, caller: &UserId, invitation: &Invitation) -> Result<()> {
        let domain = ObjectRef::domain(&invitation.domain_id);
        let identity = match self.tokens.identify(ctx, &invitation.token).await {
            Ok(identity) => identity,
            Err(e) if e.kind() == ErrorKind::Unauthenticated => {
                let held = self
                    .authz()
                    .retrieve_permissions(ctx, &SubjectRef::user(caller), &domain)
                    .await?;
                if !held.iter().any(|r| r == invitation.relation.as_str()) {
                    return Err(e);
                }
                info!(domain_id = %invitation.domain_id, "completing interrupted invitation accept");
                return self.confirm(caller, invitation.domain_id).await;
            }
            Err(e) => return Err(e),
        };
        if identity.kind != TokenKind::Invitation
            || identity.subject != *caller
            || identity.domain != Some(invitation.domain_id)
            || identity.relation != Some(invitation.relation)
        {
            return Err(BastionError::unauthenticated("invitation token does not match"));
        }

        let tuple = RelationTuple::new(SubjectRef::user(caller), invitation.relation.as_str(), domain);
        match self.authz().create_relations(ctx, &[tuple]).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Conflict => {}
            Err(e) => return Err(e),
        }

        self.revoke_token(ctx, invitation.domain_id, &invitation.token).await?;
        self.confirm(caller, invitation.domain_id).await
    }

    async fn confirm(&self, user_id: &UserId, domain_id: DomainId) -> Result<()> {
        retrying("confirm", domain_id, move || {
            self.invitations.confirm(*user_id, domain_id, Utc::now())
        })
        .await
    }

    async fn revoke_token(&self, ctx: &RequestContext, domain_id: DomainId, token: &str) -> Result<()> {
        retrying("revoke", domain_id, move || self.tokens.revoke(ctx, token)).await
    }

    async fn visible(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        user_id: UserId,
        domain_id: DomainId,
    ) -> Result<Invitation> {
        let invitation = self.invitations.get(user_id, domain_id).await?;
        let allowed = match &invitation {
            Some(inv) if inv.user_id == *caller || inv.invited_by == *caller => true,
            None if user_id == *caller => true,
            _ => self.access.is_domain_admin(ctx, caller, &domain_id).await?,
        };
        if !allowed {
            return Err(BastionError::permission_denied("view", "invitation"));
        }
        invitation.ok_or_else(|| BastionError::not_found("invitation", format!("{}/{}", user_id, domain_id)))
    }

    async fn issue(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        domain_id: DomainId,
        relation: DomainRelation,
    ) -> Result<String> {
        let request = IssueRequest::new(user_id, TokenKind::Invitation)
            .in_domain(domain_id)
            .with_relation(relation);
        Ok(self.tokens.issue(ctx, &request).await?.token)
    }
}

/// Runs `op` up to [`CONFIRM_ATTEMPTS`] times while it fails with a retryable
/// error, backing off 25-75 ms times the attempt number.
async fn retrying<T, F, Fut>(operation: &str, domain_id: DomainId, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < CONFIRM_ATTEMPTS => {
                let jitter = rand::thread_rng().gen_range(25..=75u64);
                warn!(domain_id = %domain_id, operation, attempt, error = %e, "invitation write failed, retrying");
                tokio::time::sleep(Duration::from_millis(jitter * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

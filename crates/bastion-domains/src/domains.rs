//! Domain lifecycle: creation, status transitions and membership.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use bastion_core::{
    Authorizer, BastionError, Domain, DomainFilter, DomainId, DomainPage, DomainPatch,
    DomainRelation, DomainRepository, DomainStatus, InvitationRepository, NewDomain, ObjectRef,
    ObjectType, RelationFilter, RelationTuple, RequestContext, Result, SubjectRef, UserId,
    MAX_BATCH, PLATFORM_ID,
};

use crate::access::Access;

/// Days a frozen domain is kept before it becomes purgeable.
pub const DEFAULT_FREEZE_RETENTION_DAYS: i64 = 30;

/// What a purge run removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub domains: Vec<DomainId>,
    pub invitations: u64,
    pub tombstones: u64,
}

pub struct DomainService {
    domains: Arc<dyn DomainRepository>,
    invitations: Arc<dyn InvitationRepository>,
    access: Access,
    retention: Duration,
}

impl DomainService {
    pub fn new(
        domains: Arc<dyn DomainRepository>,
        invitations: Arc<dyn InvitationRepository>,
        authz: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            domains,
            invitations,
            access: Access::new(authz),
            retention: Duration::days(DEFAULT_FREEZE_RETENTION_DAYS),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn authz(&self) -> &Arc<dyn Authorizer> {
        self.access.authz()
    }

    /// Creates the domain and makes `caller` its administrator. The domain row
    /// is removed again if the membership tuples cannot be written.
    #[instrument(skip(self, ctx, input), fields(alias = %input.alias))]
    pub async fn create(&self, ctx: &RequestContext, caller: &UserId, input: NewDomain) -> Result<Domain> {
        input.validate()?;
        ctx.run("create_domain", async {
            let domain = Domain {
                id: DomainId::new(),
                name: input.name.trim().to_string(),
                alias: input.alias,
                tags: input.tags,
                metadata: input.metadata,
                status: DomainStatus::Enabled,
                created_by: *caller,
                created_at: Utc::now(),
                updated_by: None,
                updated_at: None,
                frozen_at: None,
            };
            let created = self.domains.create(&domain).await?;

            let object = ObjectRef::domain(&created.id);
            let tuples = [
                RelationTuple::new(
                    SubjectRef::user(caller),
                    DomainRelation::Administrator.as_str(),
                    object.clone(),
                ),
                RelationTuple::new(
                    SubjectRef::new(ObjectType::Platform, PLATFORM_ID),
                    "platform",
                    object,
                ),
            ];
            if let Err(e) = self.authz().create_relations(ctx, &tuples).await {
                warn!(domain_id = %created.id, error = %e, "domain policies failed, removing domain");
                if let Err(cleanup) = self.domains.delete(created.id).await {
                    error!(domain_id = %created.id, error = %cleanup, "failed to remove orphaned domain");
                }
                return Err(e);
            }

            info!(domain_id = %created.id, created_by = %caller, "domain created");
            Ok(created)
        })
        .await
    }

    /// Members of the domain and platform administrators may read it.
    pub async fn retrieve(&self, ctx: &RequestContext, caller: &UserId, id: DomainId) -> Result<Domain> {
        ctx.run("retrieve_domain", async {
            let allowed = self.access.holds(ctx, caller, "membership", &id).await?
                || self.access.is_platform_admin(ctx, caller).await?;
            if !allowed {
                return Err(BastionError::permission_denied("membership", format!("domain:{}", id)));
            }
            self.get(id).await
        })
        .await
    }

    #[instrument(skip(self, ctx, patch))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        id: DomainId,
        patch: DomainPatch,
    ) -> Result<Domain> {
        patch.validate()?;
        ctx.run("update_domain", async {
            self.access.require_admin(ctx, caller, &id).await?;
            let mut domain = self.get(id).await?;
            if domain.status != DomainStatus::Enabled {
                return Err(BastionError::failed_precondition(format!(
                    "domain is {}",
                    domain.status
                )));
            }
            patch.apply(&mut domain);
            if let Some(name) = &patch.name {
                domain.name = name.trim().to_string();
            }
            domain.updated_by = Some(*caller);
            domain.updated_at = Some(Utc::now());
            self.domains.update(&domain).await
        })
        .await
    }

    /// Enabling and disabling need domain `admin`; freezing, or touching an
    /// already frozen domain, needs platform `admin`. Freezing a frozen domain
    /// re-runs the policy cascade.
    #[instrument(skip(self, ctx))]
    pub async fn change_status(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        id: DomainId,
        status: DomainStatus,
    ) -> Result<Domain> {
        ctx.run("change_domain_status", async {
            let platform_admin = self.access.is_platform_admin(ctx, caller).await?;
            if !platform_admin && !self.access.holds(ctx, caller, "admin", &id).await? {
                return Err(BastionError::permission_denied("admin", format!("domain:{}", id)));
            }
            let current = self.get(id).await?;
            let freezing = status == DomainStatus::Frozen || current.status == DomainStatus::Frozen;
            if freezing && !platform_admin {
                return Err(BastionError::permission_denied("admin", "platform"));
            }
            if !current.status.can_transition_to(status) {
                return Err(BastionError::failed_precondition(format!(
                    "domain cannot move from {} to {}",
                    current.status, status
                )));
            }
            if current.status == status && status != DomainStatus::Frozen {
                return Ok(current);
            }

            if status != DomainStatus::Frozen {
                let updated = self
                    .domains
                    .update_status(id, status, *caller, Utc::now())
                    .await?;
                info!(domain_id = %id, status = %status, "domain status changed");
                return Ok(updated);
            }

            // Tuples are tombstoned before the status row is written. The
            // second pass covers writes admitted in between.
            let mut tombstoned = self.authz().freeze_domain(ctx, &id).await?;
            let updated = if current.status == status {
                current
            } else {
                let updated = self
                    .domains
                    .update_status(id, status, *caller, Utc::now())
                    .await?;
                tombstoned += self.authz().freeze_domain(ctx, &id).await?;
                updated
            };
            info!(domain_id = %id, tombstoned, "domain frozen");
            Ok(updated)
        })
        .await
    }

    /// Grants `relation` on the domain to every user in one atomic batch.
    #[instrument(skip(self, ctx, users), fields(users = users.len()))]
    pub async fn assign_users(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        id: DomainId,
        users: &[UserId],
        relation: DomainRelation,
    ) -> Result<()> {
        let users = dedup_users(users)?;
        ctx.run("assign_users", async {
            self.access.require_admin(ctx, caller, &id).await?;
            let object = ObjectRef::domain(&id);
            let tuples: Vec<RelationTuple> = users
                .iter()
                .map(|u| RelationTuple::new(SubjectRef::user(u), relation.as_str(), object.clone()))
                .collect();
            self.authz().create_relations(ctx, &tuples).await?;
            info!(domain_id = %id, relation = %relation, count = tuples.len(), "users assigned");
            Ok(())
        })
        .await
    }

    /// Removes `relation` (or every domain relation when `None`) from each user.
    /// Refuses to leave the domain without an administrator.
    #[instrument(skip(self, ctx, users), fields(users = users.len()))]
    pub async fn unassign_users(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        id: DomainId,
        users: &[UserId],
        relation: Option<DomainRelation>,
    ) -> Result<u64> {
        let users = dedup_users(users)?;
        ctx.run("unassign_users", async {
            self.access.require_admin(ctx, caller, &id).await?;
            let object = ObjectRef::domain(&id);

            if relation.map_or(true, |r| r == DomainRelation::Administrator) {
                let admins = self.administrators(ctx, &object).await?;
                let removing: BTreeSet<String> = users.iter().map(|u| u.to_string()).collect();
                if !admins.is_empty() && admins.is_subset(&removing) {
                    return Err(BastionError::failed_precondition(
                        "cannot remove the last administrator of a domain",
                    ));
                }
            }

            let mut removed = 0;
            for user in &users {
                let mut filter = RelationFilter::for_object(&object);
                filter.subject_type = Some(ObjectType::User);
                filter.subject_id = Some(user.to_string());
                filter.subject_relation = Some(String::new());
                filter.relation = relation.map(|r| r.as_str().to_string());
                removed += self.authz().delete_relations(ctx, &filter).await?;
            }
            info!(domain_id = %id, removed, "users unassigned");
            Ok(removed)
        })
        .await
    }

    /// Platform administrators see every domain; other callers see the
    /// domains they hold a relation on.
    pub async fn list(&self, ctx: &RequestContext, caller: &UserId, mut filter: DomainFilter) -> Result<DomainPage> {
        filter.validate()?;
        ctx.run("list_domains", async {
            if !self.access.is_platform_admin(ctx, caller).await? {
                filter.ids = Some(self.access.direct_domains(ctx, caller).await?);
            }
            self.domains.list(&filter).await
        })
        .await
    }

    pub async fn list_by_user(
        &self,
        ctx: &RequestContext,
        caller: &UserId,
        user: &UserId,
        mut filter: DomainFilter,
    ) -> Result<DomainPage> {
        filter.validate()?;
        ctx.run("list_user_domains", async {
            if caller != user {
                self.access.require_platform_admin(ctx, caller).await?;
            }
            filter.ids = Some(self.access.direct_domains(ctx, user).await?);
            self.domains.list(&filter).await
        })
        .await
    }

    /// Hard-deletes domains frozen longer than the retention period together
    /// with their invitations and policy tombstones.
    #[instrument(skip(self, ctx))]
    pub async fn purge_frozen(&self, ctx: &RequestContext) -> Result<PurgeReport> {
        ctx.run("purge_frozen", async {
            let cutoff = Utc::now() - self.retention;
            let domains = self.domains.purge_frozen(cutoff).await?;
            let mut invitations = 0;
            for id in &domains {
                invitations += self.invitations.delete_for_domain(*id).await?;
            }
            let tombstones = self.authz().purge_tombstones(ctx, cutoff).await?;
            if !domains.is_empty() || tombstones > 0 {
                info!(domains = domains.len(), invitations, tombstones, "purged frozen domains");
            }
            Ok(PurgeReport {
                domains,
                invitations,
                tombstones,
            })
        })
        .await
    }

    /// Makes each user a platform administrator, skipping those who already
    /// are. Returns how many were added.
    pub async fn ensure_platform_admins(&self, ctx: &RequestContext, users: &[UserId]) -> Result<usize> {
        let platform = ObjectRef::platform();
        let mut missing = Vec::new();
        for user in users {
            let subject = SubjectRef::user(user);
            let held = self.authz().retrieve_permissions(ctx, &subject, &platform).await?;
            if !held.iter().any(|r| r == "administrator") {
                missing.push(RelationTuple::new(subject, "administrator", platform.clone()));
            }
        }
        missing.dedup();
        if !missing.is_empty() {
            self.authz().create_relations(ctx, &missing).await?;
            info!(count = missing.len(), "platform administrators bootstrapped");
        }
        Ok(missing.len())
    }

    async fn get(&self, id: DomainId) -> Result<Domain> {
        self.domains
            .get_by_id(id)
            .await?
            .ok_or_else(|| BastionError::not_found("domain", id.to_string()))
    }

    async fn administrators(&self, ctx: &RequestContext, object: &ObjectRef) -> Result<BTreeSet<String>> {
        let mut filter = RelationFilter::for_object(object).with_relation(DomainRelation::Administrator.as_str());
        filter.subject_type = Some(ObjectType::User);
        filter.subject_relation = Some(String::new());

        let mut admins = BTreeSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.authz().read_relations(ctx, &filter, cursor.as_deref(), MAX_BATCH).await?;
            admins.extend(page.tuples.into_iter().map(|t| t.subject.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(admins),
            }
        }
    }
}

fn dedup_users(users: &[UserId]) -> Result<Vec<UserId>> {
    if users.is_empty() {
        return Err(BastionError::invalid_argument("user list cannot be empty"));
    }
    if users.len() > MAX_BATCH {
        return Err(BastionError::invalid_argument(format!(
            "at most {} users per request",
            MAX_BATCH
        )));
    }
    let mut unique: Vec<UserId> = users.to_vec();
    unique.sort();
    unique.dedup();
    Ok(unique)
}

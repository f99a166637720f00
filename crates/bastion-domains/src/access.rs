use std::sync::Arc;

use bastion_core::{
    Authorizer, BastionError, DomainId, ObjectRef, ObjectType, RelationFilter, RequestContext,
    Result, SubjectRef, UserId,
};

/// Permission questions the managers ask about a caller.
#[derive(Clone)]
pub(crate) struct Access {
    authz: Arc<dyn Authorizer>,
}

impl Access {
    pub(crate) fn new(authz: Arc<dyn Authorizer>) -> Self {
        Self { authz }
    }

    pub(crate) fn authz(&self) -> &Arc<dyn Authorizer> {
        &self.authz
    }

    pub(crate) async fn is_platform_admin(&self, ctx: &RequestContext, user: &UserId) -> Result<bool> {
        self.authz
            .check(ctx, &SubjectRef::user(user), "admin", &ObjectRef::platform())
            .await
    }

    pub(crate) async fn holds(
        &self,
        ctx: &RequestContext,
        user: &UserId,
        permission: &str,
        domain: &DomainId,
    ) -> Result<bool> {
        self.authz
            .check(ctx, &SubjectRef::user(user), permission, &ObjectRef::domain(domain))
            .await
    }

    /// Domain `admin`, or platform administrator.
    pub(crate) async fn is_domain_admin(
        &self,
        ctx: &RequestContext,
        user: &UserId,
        domain: &DomainId,
    ) -> Result<bool> {
        Ok(self.holds(ctx, user, "admin", domain).await?
            || self.is_platform_admin(ctx, user).await?)
    }

    /// Fails with `permission_denied` unless `user` administers the domain.
    pub(crate) async fn require_admin(&self, ctx: &RequestContext, user: &UserId, domain: &DomainId) -> Result<()> {
        if self.is_domain_admin(ctx, user, domain).await? {
            Ok(())
        } else {
            Err(BastionError::permission_denied("admin", format!("domain:{}", domain)))
        }
    }

    pub(crate) async fn require_platform_admin(&self, ctx: &RequestContext, user: &UserId) -> Result<()> {
        if self.is_platform_admin(ctx, user).await? {
            Ok(())
        } else {
            Err(BastionError::permission_denied("admin", "platform"))
        }
    }

    /// Domains on which `user` holds any direct relation, sorted.
    pub(crate) async fn direct_domains(&self, ctx: &RequestContext, user: &UserId) -> Result<Vec<DomainId>> {
        let filter = RelationFilter {
            subject_relation: Some(String::new()),
            ..RelationFilter::for_subject(&SubjectRef::user(user))
        }
        .with_object_type(ObjectType::Domain);

        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .authz
                .read_relations(ctx, &filter, cursor.as_deref(), bastion_core::MAX_BATCH)
                .await?;
            for tuple in &page.tuples {
                ids.push(tuple.object.id.parse::<DomainId>()?);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

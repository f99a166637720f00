//! Logging decorator for any [`Authorizer`].

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use bastion_core::{
    Authorizer, DomainId, ErrorKind, ObjectRef, ObjectType, RelationFilter, RelationPage,
    RelationTuple, RequestContext, Result, SubjectRef, UsersetTree,
};

/// Wraps an [`Authorizer`] and logs each call with its outcome and latency.
pub struct TracedAuthorizer<A> {
    inner: A,
}

impl<A: Authorizer> TracedAuthorizer<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    async fn observe<T, F>(&self, ctx: &RequestContext, method: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let request_id = ctx.request_id().unwrap_or("-");
        match &result {
            Ok(_) => debug!(method, request_id, elapsed_ms, "authorizer call succeeded"),
            Err(e) if e.kind() == ErrorKind::Internal => {
                error!(method, request_id, elapsed_ms, error = %e, "authorizer call failed")
            }
            Err(e) => warn!(method, request_id, elapsed_ms, kind = %e.kind(), error = %e, "authorizer call rejected"),
        }
        result
    }
}

#[async_trait]
impl<A: Authorizer> Authorizer for TracedAuthorizer<A> {
    async fn create_relations(&self, ctx: &RequestContext, tuples: &[RelationTuple]) -> Result<()> {
        self.observe(ctx, "create_relations", self.inner.create_relations(ctx, tuples))
            .await
    }

    async fn delete_relations(&self, ctx: &RequestContext, filter: &RelationFilter) -> Result<u64> {
        self.observe(ctx, "delete_relations", self.inner.delete_relations(ctx, filter))
            .await
    }

    async fn read_relations(
        &self,
        ctx: &RequestContext,
        filter: &RelationFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RelationPage> {
        self.observe(
            ctx,
            "read_relations",
            self.inner.read_relations(ctx, filter, cursor, limit),
        )
        .await
    }

    async fn retrieve_permissions(
        &self,
        ctx: &RequestContext,
        subject: &SubjectRef,
        object: &ObjectRef,
    ) -> Result<Vec<String>> {
        self.observe(
            ctx,
            "retrieve_permissions",
            self.inner.retrieve_permissions(ctx, subject, object),
        )
        .await
    }

    async fn check(
        &self,
        ctx: &RequestContext,
        subject: &SubjectRef,
        permission: &str,
        object: &ObjectRef,
    ) -> Result<bool> {
        self.observe(ctx, "check", self.inner.check(ctx, subject, permission, object))
            .await
    }

    async fn expand(
        &self,
        ctx: &RequestContext,
        permission: &str,
        object: &ObjectRef,
    ) -> Result<UsersetTree> {
        self.observe(ctx, "expand", self.inner.expand(ctx, permission, object))
            .await
    }

    async fn lookup_resources(
        &self,
        ctx: &RequestContext,
        subject: &SubjectRef,
        permission: &str,
        object_type: ObjectType,
    ) -> Result<Vec<String>> {
        self.observe(
            ctx,
            "lookup_resources",
            self.inner.lookup_resources(ctx, subject, permission, object_type),
        )
        .await
    }

    async fn lookup_subjects(
        &self,
        ctx: &RequestContext,
        permission: &str,
        object: &ObjectRef,
        subject_type: Option<ObjectType>,
    ) -> Result<Vec<SubjectRef>> {
        self.observe(
            ctx,
            "lookup_subjects",
            self.inner.lookup_subjects(ctx, permission, object, subject_type),
        )
        .await
    }

    async fn delete_entity_policies(&self, ctx: &RequestContext, entity: &ObjectRef) -> Result<u64> {
        self.observe(
            ctx,
            "delete_entity_policies",
            self.inner.delete_entity_policies(ctx, entity),
        )
        .await
    }

    async fn freeze_domain(&self, ctx: &RequestContext, domain_id: &DomainId) -> Result<u64> {
        self.observe(ctx, "freeze_domain", self.inner.freeze_domain(ctx, domain_id))
            .await
    }

    async fn purge_tombstones(&self, ctx: &RequestContext, before: DateTime<Utc>) -> Result<u64> {
        self.observe(ctx, "purge_tombstones", self.inner.purge_tombstones(ctx, before))
            .await
    }
}

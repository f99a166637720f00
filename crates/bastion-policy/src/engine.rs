//! [`Authorizer`] implementation backed by a [`PolicyRepository`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use bastion_core::{
    Authorizer, DomainId, ObjectRef, ObjectType, PolicyRepository, RelationFilter, RelationPage,
    RelationTuple, RequestContext, Result, SubjectRef, UsersetTree,
};

use crate::cache::{CacheMetrics, CheckCache, CheckCacheConfig, CheckKey};
use crate::evaluator::Evaluator;
use crate::schema::{Schema, SCHEMA};
use crate::store::RelationStore;

pub struct PolicyEngine {
    store: RelationStore,
    evaluator: Evaluator,
    cache: CheckCache,
}

impl PolicyEngine {
    pub fn new(repo: Arc<dyn PolicyRepository>, cache: &CheckCacheConfig) -> Self {
        Self::with_schema(repo, &SCHEMA, cache)
    }

    pub fn with_schema(
        repo: Arc<dyn PolicyRepository>,
        schema: &'static Schema,
        cache: &CheckCacheConfig,
    ) -> Self {
        Self {
            store: RelationStore::new(repo, schema),
            evaluator: Evaluator::new(schema),
            cache: CheckCache::new(cache),
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.evaluator.schema()
    }

    pub fn store(&self) -> &RelationStore {
        &self.store
    }

    pub fn cache_metrics(&self) -> Arc<CacheMetrics> {
        self.cache.metrics()
    }

    async fn check_cached(
        &self,
        subject: &SubjectRef,
        permission: &str,
        object: &ObjectRef,
    ) -> Result<bool> {
        let key = CheckKey::new(subject, permission, object);
        if let Some(allowed) = self.cache.get(&key).await {
            return Ok(allowed);
        }
        let generation = self.cache.generation();
        let snapshot = self.store.repository().snapshot().await?;
        let allowed = self
            .evaluator
            .check(snapshot.as_ref(), subject, permission, object)
            .await?;
        drop(snapshot);
        self.cache.insert(key, allowed, generation).await;
        Ok(allowed)
    }
}

#[async_trait]
impl Authorizer for PolicyEngine {
    async fn create_relations(&self, ctx: &RequestContext, tuples: &[RelationTuple]) -> Result<()> {
        ctx.run("create_relations", async {
            self.cache.invalidate_tuples(tuples);
            let result = self.store.create(tuples).await;
            self.cache.invalidate_tuples(tuples);
            result
        })
        .await
    }

    async fn delete_relations(&self, ctx: &RequestContext, filter: &RelationFilter) -> Result<u64> {
        ctx.run("delete_relations", async {
            self.cache.invalidate_filter(filter);
            let result = self.store.delete(filter).await;
            self.cache.invalidate_filter(filter);
            result
        })
        .await
    }

    async fn read_relations(
        &self,
        ctx: &RequestContext,
        filter: &RelationFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RelationPage> {
        ctx.run("read_relations", self.store.read(filter, cursor, limit))
            .await
    }

    async fn retrieve_permissions(
        &self,
        ctx: &RequestContext,
        subject: &SubjectRef,
        object: &ObjectRef,
    ) -> Result<Vec<String>> {
        ctx.run(
            "retrieve_permissions",
            self.store.retrieve_permissions(subject, object),
        )
        .await
    }

    #[instrument(skip(self, ctx), fields(subject = %subject, object = %object))]
    async fn check(
        &self,
        ctx: &RequestContext,
        subject: &SubjectRef,
        permission: &str,
        object: &ObjectRef,
    ) -> Result<bool> {
        subject.validate()?;
        object.validate()?;
        let allowed = ctx
            .run("check", self.check_cached(subject, permission, object))
            .await?;
        debug!(allowed, "check evaluated");
        Ok(allowed)
    }

    async fn expand(
        &self,
        ctx: &RequestContext,
        permission: &str,
        object: &ObjectRef,
    ) -> Result<UsersetTree> {
        object.validate()?;
        ctx.run("expand", async {
            let snapshot = self.store.repository().snapshot().await?;
            self.evaluator.expand(snapshot.as_ref(), permission, object).await
        })
        .await
    }

    async fn lookup_resources(
        &self,
        ctx: &RequestContext,
        subject: &SubjectRef,
        permission: &str,
        object_type: ObjectType,
    ) -> Result<Vec<String>> {
        subject.validate()?;
        ctx.run("lookup_resources", async {
            let snapshot = self.store.repository().snapshot().await?;
            self.evaluator
                .lookup_resources(snapshot.as_ref(), subject, permission, object_type)
                .await
        })
        .await
    }

    async fn lookup_subjects(
        &self,
        ctx: &RequestContext,
        permission: &str,
        object: &ObjectRef,
        subject_type: Option<ObjectType>,
    ) -> Result<Vec<SubjectRef>> {
        object.validate()?;
        ctx.run("lookup_subjects", async {
            let snapshot = self.store.repository().snapshot().await?;
            self.evaluator
                .lookup_subjects(snapshot.as_ref(), permission, object, subject_type)
                .await
        })
        .await
    }

    async fn delete_entity_policies(&self, ctx: &RequestContext, entity: &ObjectRef) -> Result<u64> {
        ctx.run("delete_entity_policies", async {
            self.cache.invalidate_all();
            let result = self.store.delete_entity(entity).await;
            self.cache.invalidate_all();
            result
        })
        .await
    }

    async fn freeze_domain(&self, ctx: &RequestContext, domain_id: &DomainId) -> Result<u64> {
        ctx.run("freeze_domain", async {
            self.cache.invalidate_all();
            let result = self.store.freeze_domain(domain_id, Utc::now()).await;
            self.cache.invalidate_all();
            result
        })
        .await
    }

    async fn purge_tombstones(&self, ctx: &RequestContext, before: DateTime<Utc>) -> Result<u64> {
        ctx.run("purge_tombstones", self.store.purge_tombstones(before))
            .await
    }
}

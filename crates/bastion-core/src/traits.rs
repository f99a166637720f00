//! Core traits for storage backends and the authorization service

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::RequestContext;
use crate::error::Result;
use crate::ids::*;
use crate::models::*;
use crate::relations::*;

// =============================================================================
// Authorization Traits
// =============================================================================

/// The relationship store plus permission evaluator, as seen by the domain and
/// invitation managers and the HTTP layer.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Atomically inserts `tuples`.
    async fn create_relations(&self, ctx: &RequestContext, tuples: &[RelationTuple]) -> Result<()>;

    /// Deletes every tuple matching `filter`, returning the number removed.
    async fn delete_relations(&self, ctx: &RequestContext, filter: &RelationFilter) -> Result<u64>;

    async fn read_relations(
        &self,
        ctx: &RequestContext,
        filter: &RelationFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RelationPage>;

    /// Direct relations of `subject` on `object`; no schema rewrite.
    async fn retrieve_permissions(
        &self,
        ctx: &RequestContext,
        subject: &SubjectRef,
        object: &ObjectRef,
    ) -> Result<Vec<String>>;

    async fn check(
        &self,
        ctx: &RequestContext,
        subject: &SubjectRef,
        permission: &str,
        object: &ObjectRef,
    ) -> Result<bool>;

    async fn expand(
        &self,
        ctx: &RequestContext,
        permission: &str,
        object: &ObjectRef,
    ) -> Result<UsersetTree>;

    /// Ids of `object_type` objects on which `subject` holds `permission`, sorted.
    async fn lookup_resources(
        &self,
        ctx: &RequestContext,
        subject: &SubjectRef,
        permission: &str,
        object_type: ObjectType,
    ) -> Result<Vec<String>>;

    async fn lookup_subjects(
        &self,
        ctx: &RequestContext,
        permission: &str,
        object: &ObjectRef,
        subject_type: Option<ObjectType>,
    ) -> Result<Vec<SubjectRef>>;

    /// Removes every tuple where `entity` appears as subject or object.
    async fn delete_entity_policies(&self, ctx: &RequestContext, entity: &ObjectRef) -> Result<u64>;

    /// Tombstones everything owned by the domain.
    async fn freeze_domain(&self, ctx: &RequestContext, domain_id: &DomainId) -> Result<u64>;

    async fn purge_tombstones(&self, ctx: &RequestContext, before: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// Policy Storage Traits
// =============================================================================

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Opens a write transaction. Domain rows read through it stay locked until commit.
    async fn begin_write(&self) -> Result<Box<dyn PolicyWriteTx>>;

    /// Opens a consistent read view used for a whole evaluation.
    async fn snapshot(&self) -> Result<Box<dyn PolicySnapshot>>;

    async fn delete(&self, filter: &RelationFilter) -> Result<u64>;

    /// Soft-deletes tuples on the domain and on every object linked to it.
    async fn tombstone_domain(&self, domain_id: &str, at: DateTime<Utc>) -> Result<u64>;

    async fn purge_tombstones(&self, before: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait PolicyWriteTx: Send {
    async fn domain_status(&mut self, domain_id: &str) -> Result<Option<DomainStatus>>;

    /// Id of the domain `object` is attached to through its `domain` relation.
    async fn parent_domain(&mut self, object: &ObjectRef) -> Result<Option<String>>;

    /// Fails with `conflict` if any key already exists.
    async fn insert(&mut self, tuples: &[RelationTuple]) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait PolicySnapshot: Send + Sync {
    /// Live tuples on `object` with `relation`.
    async fn object_tuples(&self, object: &ObjectRef, relation: &str) -> Result<Vec<RelationTuple>>;

    /// Distinct ids of objects of `object_type` that have at least one live tuple.
    async fn object_ids(&self, object_type: ObjectType) -> Result<Vec<String>>;

    /// Live tuples in canonical key order, strictly after `after`.
    async fn read(
        &self,
        filter: &RelationFilter,
        after: Option<&TupleKey>,
        limit: usize,
    ) -> Result<Vec<RelationTuple>>;
}

// =============================================================================
// Repository Traits
// =============================================================================

#[async_trait]
pub trait DomainRepository: Send + Sync {
    /// Fails with `conflict` when the alias is held by a non-frozen domain.
    async fn create(&self, domain: &Domain) -> Result<Domain>;
    async fn get_by_id(&self, id: DomainId) -> Result<Option<Domain>>;
    async fn update(&self, domain: &Domain) -> Result<Domain>;
    async fn update_status(
        &self,
        id: DomainId,
        status: DomainStatus,
        updated_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<Domain>;
    async fn list(&self, filter: &DomainFilter) -> Result<DomainPage>;
    async fn delete(&self, id: DomainId) -> Result<()>;
    /// Hard-deletes domains frozen before `before`, returning their ids.
    async fn purge_frozen(&self, before: DateTime<Utc>) -> Result<Vec<DomainId>>;
}

#[async_trait]
pub trait InvitationRepository: Send + Sync {
    /// Fails with `conflict` when `(user_id, domain_id)` already exists.
    async fn create(&self, invitation: &Invitation) -> Result<()>;
    async fn get(&self, user_id: UserId, domain_id: DomainId) -> Result<Option<Invitation>>;
    async fn replace_token(
        &self,
        user_id: UserId,
        domain_id: DomainId,
        invited_by: UserId,
        relation: DomainRelation,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Invitation>;
    async fn confirm(&self, user_id: UserId, domain_id: DomainId, at: DateTime<Utc>) -> Result<()>;
    async fn list(&self, filter: &InvitationFilter) -> Result<InvitationPage>;
    async fn delete(&self, user_id: UserId, domain_id: DomainId) -> Result<()>;
    async fn delete_for_domain(&self, domain_id: DomainId) -> Result<u64>;
}

#[async_trait]
pub trait NonceRepository: Send + Sync {
    /// Returns `false` when the nonce was already present.
    async fn insert_if_absent(&self, entry: &NonceEntry) -> Result<bool>;
    async fn upsert(&self, entry: &NonceEntry) -> Result<()>;
    async fn get(&self, nonce: &str) -> Result<Option<NonceEntry>>;
    async fn active(&self, now: DateTime<Utc>) -> Result<Vec<NonceEntry>>;
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64>;
}

use std::collections::{BTreeSet, HashSet};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::{debug, instrument};
use uuid::Uuid;

use bastion_core::{
    BastionError, DomainId, DomainStatus, ObjectRef, ObjectType, PolicyRepository,
    PolicySnapshot, PolicyWriteTx, RelationFilter, RelationTuple, Result, TupleKey,
};

use super::{MemoryStore, PolicyState, TupleRow};

#[async_trait]
impl PolicyRepository for MemoryStore {
    async fn begin_write(&self) -> Result<Box<dyn PolicyWriteTx>> {
        let guard = self.state.clone().write_owned().await;
        Ok(Box::new(MemoryPolicyWriteTx {
            guard,
            pending: Vec::new(),
        }))
    }

    async fn snapshot(&self) -> Result<Box<dyn PolicySnapshot>> {
        let guard = self.state.clone().read_owned().await;
        Ok(Box::new(MemoryPolicySnapshot { guard }))
    }

    #[instrument(skip(self))]
    async fn delete(&self, filter: &RelationFilter) -> Result<u64> {
        let mut state = self.state.write().await;
        let doomed: Vec<TupleKey> = state
            .tuples
            .iter()
            .filter(|(_, row)| row.is_live() && filter.matches(&row.tuple))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            state.remove_row(key);
        }
        Ok(doomed.len() as u64)
    }

    #[instrument(skip(self))]
    async fn tombstone_domain(&self, domain_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;

        let mut owned: HashSet<(String, String)> = HashSet::new();
        owned.insert((ObjectType::Domain.as_str().to_string(), domain_id.to_string()));
        for row in state.tuples.values() {
            let t = &row.tuple;
            if row.is_live()
                && t.relation == "domain"
                && t.subject.subject_type == ObjectType::Domain
                && t.subject.id == domain_id
            {
                owned.insert((t.object.object_type.as_str().to_string(), t.object.id.clone()));
            }
        }

        let mut count = 0u64;
        for row in state.tuples.values_mut() {
            if !row.is_live() {
                continue;
            }
            let t = &row.tuple;
            let on_owned_object =
                owned.contains(&(t.object.object_type.as_str().to_string(), t.object.id.clone()));
            let domain_subject =
                t.subject.subject_type == ObjectType::Domain && t.subject.id == domain_id;
            if on_owned_object || domain_subject {
                row.deleted_at = Some(at);
                count += 1;
            }
        }

        debug!(domain_id, tombstoned = count, "domain tuples tombstoned");
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn purge_tombstones(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let expired: Vec<TupleKey> = state
            .tuples
            .iter()
            .filter(|(_, row)| row.deleted_at.is_some_and(|at| at < before))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove_row(key);
        }
        Ok(expired.len() as u64)
    }
}

/// Holds the state write lock for its whole lifetime; inserts are buffered and
/// applied on commit, so dropping the transaction discards them.
pub struct MemoryPolicyWriteTx {
    guard: OwnedRwLockWriteGuard<PolicyState>,
    pending: Vec<(TupleKey, RelationTuple)>,
}

#[async_trait]
impl PolicyWriteTx for MemoryPolicyWriteTx {
    async fn domain_status(&mut self, domain_id: &str) -> Result<Option<DomainStatus>> {
        let Ok(uuid) = Uuid::parse_str(domain_id) else {
            return Ok(None);
        };
        Ok(self
            .guard
            .domains
            .get(&DomainId::from_uuid(uuid))
            .map(|d| d.status))
    }

    async fn parent_domain(&mut self, object: &ObjectRef) -> Result<Option<String>> {
        Ok(self
            .guard
            .parent_domain(object.object_type.as_str(), &object.id))
    }

    async fn insert(&mut self, tuples: &[RelationTuple]) -> Result<()> {
        let mut seen: BTreeSet<TupleKey> = self.pending.iter().map(|(k, _)| k.clone()).collect();
        for tuple in tuples {
            let key = tuple.key();
            let live = self.guard.tuples.get(&key).is_some_and(|row| row.is_live());
            if live || !seen.insert(key.clone()) {
                return Err(BastionError::conflict(format!(
                    "relation already exists: {}",
                    tuple
                )));
            }
        }
        self.pending
            .extend(tuples.iter().map(|t| (t.key(), t.clone())));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryPolicyWriteTx { mut guard, pending } = *self;
        let now = Utc::now();
        for (key, tuple) in pending {
            guard.insert_row(
                key,
                TupleRow {
                    tuple,
                    created_at: now,
                    deleted_at: None,
                },
            );
        }
        Ok(())
    }
}

/// Read view holding the shared lock; writers wait until the evaluation ends.
pub struct MemoryPolicySnapshot {
    guard: OwnedRwLockReadGuard<PolicyState>,
}

#[async_trait]
impl PolicySnapshot for MemoryPolicySnapshot {
    async fn object_tuples(&self, object: &ObjectRef, relation: &str) -> Result<Vec<RelationTuple>> {
        Ok(self
            .guard
            .object_rows(object.object_type.as_str(), &object.id)
            .filter(|row| row.tuple.relation == relation)
            .map(|row| row.tuple.clone())
            .collect())
    }

    async fn object_ids(&self, object_type: ObjectType) -> Result<Vec<String>> {
        let ids: BTreeSet<String> = self
            .guard
            .by_object
            .keys()
            .filter(|(t, _)| t == object_type.as_str())
            .filter(|(t, id)| self.guard.object_rows(t, id).next().is_some())
            .map(|(_, id)| id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn read(
        &self,
        filter: &RelationFilter,
        after: Option<&TupleKey>,
        limit: usize,
    ) -> Result<Vec<RelationTuple>> {
        let lower = match after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        Ok(self
            .guard
            .tuples
            .range((lower, Bound::Unbounded))
            .map(|(_, row)| row)
            .filter(|row| row.is_live() && filter.matches(&row.tuple))
            .take(limit)
            .map(|row| row.tuple.clone())
            .collect())
    }
}

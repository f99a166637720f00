//! In-memory storage backend.
//!
//! Domains and relation tuples share one `RwLock` so a policy write transaction
//! can check domain status and insert tuples atomically. Invitations and nonces
//! have no cross-table invariants and live in `DashMap`s.

mod domain;
mod invitation;
mod nonce;
mod policy;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use bastion_core::{Domain, DomainId, Invitation, NonceEntry, RelationTuple, TupleKey, UserId};

pub use policy::{MemoryPolicySnapshot, MemoryPolicyWriteTx};

/// In-memory implementation of every repository trait.
///
/// Cloning is cheap; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<PolicyState>>,
    invitations: Arc<DashMap<(UserId, DomainId), Invitation>>,
    nonces: Arc<DashMap<String, NonceEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TupleRow {
    pub tuple: RelationTuple,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TupleRow {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

type IndexKey = (String, String);

#[derive(Debug, Default)]
pub(crate) struct PolicyState {
    pub domains: HashMap<DomainId, Domain>,
    pub tuples: BTreeMap<TupleKey, TupleRow>,
    pub by_object: HashMap<IndexKey, BTreeSet<TupleKey>>,
    pub by_subject: HashMap<IndexKey, BTreeSet<TupleKey>>,
}

impl PolicyState {
    pub fn insert_row(&mut self, key: TupleKey, row: TupleRow) {
        self.by_object
            .entry((key.object_type.clone(), key.object_id.clone()))
            .or_default()
            .insert(key.clone());
        self.by_subject
            .entry((key.subject_type.clone(), key.subject_id.clone()))
            .or_default()
            .insert(key.clone());
        self.tuples.insert(key, row);
    }

    pub fn remove_row(&mut self, key: &TupleKey) -> Option<TupleRow> {
        let row = self.tuples.remove(key)?;
        remove_from_index(
            &mut self.by_object,
            (key.object_type.clone(), key.object_id.clone()),
            key,
        );
        remove_from_index(
            &mut self.by_subject,
            (key.subject_type.clone(), key.subject_id.clone()),
            key,
        );
        Some(row)
    }

    /// Live tuples on one object, in key order.
    pub fn object_rows<'a>(
        &'a self,
        object_type: &str,
        object_id: &str,
    ) -> impl Iterator<Item = &'a TupleRow> + 'a {
        self.by_object
            .get(&(object_type.to_string(), object_id.to_string()))
            .into_iter()
            .flat_map(|keys| keys.iter())
            .filter_map(|key| self.tuples.get(key))
            .filter(|row| row.is_live())
    }

    pub fn parent_domain(&self, object_type: &str, object_id: &str) -> Option<String> {
        self.object_rows(object_type, object_id)
            .find(|row| {
                row.tuple.relation == "domain"
                    && row.tuple.subject.subject_type == bastion_core::ObjectType::Domain
            })
            .map(|row| row.tuple.subject.id.clone())
    }
}

fn remove_from_index(index: &mut HashMap<IndexKey, BTreeSet<TupleKey>>, at: IndexKey, key: &TupleKey) {
    if let Some(keys) = index.get_mut(&at) {
        keys.remove(key);
        if keys.is_empty() {
            index.remove(&at);
        }
    }
}

#[cfg(test)]
mod tests;

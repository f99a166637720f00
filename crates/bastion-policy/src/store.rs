//! Validated writes and paged reads over a [`PolicyRepository`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use bastion_core::{
    BastionError, DomainId, DomainStatus, ObjectRef, ObjectType, PolicyRepository, PolicyWriteTx,
    RelationFilter, RelationPage, RelationTuple, Result, SubjectRef, TupleKey, MAX_BATCH,
};

use crate::schema::Schema;

/// Page size used when a caller does not pass one.
pub const DEFAULT_READ_LIMIT: usize = 100;

/// The relation a group or thing uses to point at its owning domain.
const DOMAIN_RELATION: &str = "domain";

pub struct RelationStore {
    repo: Arc<dyn PolicyRepository>,
    schema: &'static Schema,
}

impl RelationStore {
    pub fn new(repo: Arc<dyn PolicyRepository>, schema: &'static Schema) -> Self {
        Self { repo, schema }
    }

    pub fn repository(&self) -> &Arc<dyn PolicyRepository> {
        &self.repo
    }

    /// Checks everything that can be decided without the store.
    pub fn validate_batch(&self, tuples: &[RelationTuple]) -> Result<()> {
        if tuples.is_empty() {
            return Err(BastionError::invalid_argument("at least one tuple is required"));
        }
        if tuples.len() > MAX_BATCH {
            return Err(BastionError::invalid_argument(format!(
                "at most {} tuples per call, got {}",
                MAX_BATCH,
                tuples.len()
            )));
        }
        let mut seen = HashSet::with_capacity(tuples.len());
        for tuple in tuples {
            tuple.subject.validate()?;
            tuple.object.validate()?;
            self.schema.validate_tuple(tuple)?;
            if !seen.insert(tuple.key()) {
                return Err(BastionError::conflict(format!("duplicate tuple {} in batch", tuple)));
            }
        }
        Ok(())
    }

    /// Inserts `tuples` atomically.
    #[instrument(skip(self, tuples), fields(count = tuples.len()))]
    pub async fn create(&self, tuples: &[RelationTuple]) -> Result<()> {
        self.validate_batch(tuples)?;

        let mut batch_parents: HashMap<ObjectRef, &str> = HashMap::new();
        for tuple in tuples.iter().filter(|t| t.relation == DOMAIN_RELATION) {
            if batch_parents
                .insert(tuple.object.clone(), tuple.subject.id.as_str())
                .is_some()
            {
                return Err(BastionError::conflict(format!(
                    "{} may belong to only one domain",
                    tuple.object
                )));
            }
        }

        let mut tx = self.repo.begin_write().await?;
        let mut checked: HashSet<String> = HashSet::new();

        for tuple in tuples {
            for domain_id in referenced_domains(tuple) {
                ensure_writable(tx.as_mut(), &mut checked, domain_id).await?;
            }

            if matches!(tuple.object.object_type, ObjectType::Group | ObjectType::Thing) {
                let existing = tx.parent_domain(&tuple.object).await?;
                if tuple.relation == DOMAIN_RELATION {
                    if existing.is_some() {
                        return Err(BastionError::conflict(format!(
                            "{} already belongs to a domain",
                            tuple.object
                        )));
                    }
                    continue;
                }
                let parent = match batch_parents.get(&tuple.object) {
                    Some(parent) => parent.to_string(),
                    None => existing.ok_or_else(|| {
                        BastionError::failed_precondition(format!(
                            "{} is not attached to a domain",
                            tuple.object
                        ))
                    })?,
                };
                ensure_writable(tx.as_mut(), &mut checked, &parent).await?;
            }
        }

        tx.insert(tuples).await?;
        tx.commit().await?;
        debug!(count = tuples.len(), "relations created");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, filter: &RelationFilter) -> Result<u64> {
        if filter.is_empty() {
            return Err(BastionError::invalid_argument("delete filter must not be empty"));
        }
        let deleted = self.repo.delete(filter).await?;
        debug!(deleted, "relations deleted");
        Ok(deleted)
    }

    /// One page of live tuples in canonical order.
    pub async fn read(
        &self,
        filter: &RelationFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RelationPage> {
        if limit == 0 || limit > MAX_BATCH {
            return Err(BastionError::invalid_argument(format!(
                "limit must be between 1 and {}",
                MAX_BATCH
            )));
        }
        let after = cursor.map(TupleKey::from_cursor).transpose()?;

        let snapshot = self.repo.snapshot().await?;
        let mut tuples = snapshot.read(filter, after.as_ref(), limit + 1).await?;
        let next_cursor = if tuples.len() > limit {
            tuples.truncate(limit);
            tuples.last().map(|t| t.key().to_cursor())
        } else {
            None
        };
        Ok(RelationPage { tuples, next_cursor })
    }

    /// Relations `subject` holds directly on `object`, sorted.
    pub async fn retrieve_permissions(
        &self,
        subject: &SubjectRef,
        object: &ObjectRef,
    ) -> Result<Vec<String>> {
        subject.validate()?;
        object.validate()?;
        let mut filter = RelationFilter::for_object(object);
        filter.subject_type = Some(subject.subject_type);
        filter.subject_id = Some(subject.id.clone());
        filter.subject_relation = Some(subject.relation.clone().unwrap_or_default());

        let snapshot = self.repo.snapshot().await?;
        let mut relations = BTreeSet::new();
        let mut after: Option<TupleKey> = None;
        loop {
            let page = snapshot.read(&filter, after.as_ref(), MAX_BATCH).await?;
            let done = page.len() < MAX_BATCH;
            after = page.last().map(RelationTuple::key);
            relations.extend(page.into_iter().map(|t| t.relation));
            if done {
                break;
            }
        }
        Ok(relations.into_iter().collect())
    }

    /// Removes every tuple naming `entity` as object or subject.
    #[instrument(skip(self), fields(entity = %entity))]
    pub async fn delete_entity(&self, entity: &ObjectRef) -> Result<u64> {
        entity.validate()?;
        let as_object = self.repo.delete(&RelationFilter::for_object(entity)).await?;
        let as_subject = self
            .repo
            .delete(&RelationFilter {
                subject_type: Some(entity.object_type),
                subject_id: Some(entity.id.clone()),
                ..Default::default()
            })
            .await?;
        info!(removed = as_object + as_subject, "entity policies deleted");
        Ok(as_object + as_subject)
    }

    #[instrument(skip(self), fields(domain_id = %domain_id))]
    pub async fn freeze_domain(&self, domain_id: &DomainId, at: DateTime<Utc>) -> Result<u64> {
        let tombstoned = self.repo.tombstone_domain(&domain_id.to_string(), at).await?;
        info!(tombstoned, "domain tuples frozen");
        Ok(tombstoned)
    }

    #[instrument(skip(self))]
    pub async fn purge_tombstones(&self, before: DateTime<Utc>) -> Result<u64> {
        let purged = self.repo.purge_tombstones(before).await?;
        if purged > 0 {
            info!(purged, "tombstoned relations purged");
        }
        Ok(purged)
    }
}

/// Domain ids a tuple names directly, as object or subject.
fn referenced_domains(tuple: &RelationTuple) -> Vec<&str> {
    let mut ids = Vec::with_capacity(2);
    if tuple.object.object_type == ObjectType::Domain {
        ids.push(tuple.object.id.as_str());
    }
    if tuple.subject.subject_type == ObjectType::Domain {
        ids.push(tuple.subject.id.as_str());
    }
    ids
}

async fn ensure_writable(
    tx: &mut dyn PolicyWriteTx,
    checked: &mut HashSet<String>,
    domain_id: &str,
) -> Result<()> {
    if checked.contains(domain_id) {
        return Ok(());
    }
    match tx.domain_status(domain_id).await? {
        None => Err(BastionError::not_found("domain", domain_id)),
        Some(DomainStatus::Frozen) => Err(BastionError::failed_precondition(format!(
            "domain {} is frozen",
            domain_id
        ))),
        Some(DomainStatus::Disabled) => Err(BastionError::failed_precondition(format!(
            "domain {} is disabled",
            domain_id
        ))),
        Some(DomainStatus::Enabled) => {
            checked.insert(domain_id.to_string());
            Ok(())
        }
    }
}

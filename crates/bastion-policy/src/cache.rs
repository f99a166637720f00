//! Check result cache
//!
//! Keyed on `(subject, permission, object)`. Writers bump a generation counter
//! before and after committing; results computed under an older generation are
//! dropped, so a check that raced a write never repopulates stale data.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, instrument, warn};

use bastion_core::{ObjectRef, ObjectType, RelationFilter, RelationTuple, SubjectRef};

/// Configuration for the check cache
#[derive(Debug, Clone)]
pub struct CheckCacheConfig {
    pub enabled: bool,
    /// Maximum number of cached check results
    pub max_capacity: u64,
    /// TTL for cached results
    pub ttl: Duration,
}

impl Default for CheckCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 10_000,
            ttl: Duration::from_secs(30),
        }
    }
}

impl CheckCacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckKey {
    subject: SubjectRef,
    permission: String,
    object: ObjectRef,
}

impl CheckKey {
    pub fn new(subject: &SubjectRef, permission: &str, object: &ObjectRef) -> Self {
        Self {
            subject: subject.clone(),
            permission: permission.to_string(),
            object: object.clone(),
        }
    }
}

/// Cache metrics for monitoring
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub struct CheckCache {
    cache: Option<Cache<CheckKey, bool>>,
    generation: AtomicU64,
    metrics: Arc<CacheMetrics>,
}

impl CheckCache {
    pub fn new(config: &CheckCacheConfig) -> Self {
        let cache = config.enabled.then(|| {
            Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_live(config.ttl)
                .support_invalidation_closures()
                .build()
        });
        Self {
            cache,
            generation: AtomicU64::new(0),
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        self.metrics.clone()
    }

    /// Current write generation; pass it back to [`CheckCache::insert`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn get(&self, key: &CheckKey) -> Option<bool> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Some(allowed) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                debug!(subject = %key.subject, permission = %key.permission, object = %key.object, "check cache hit");
                Some(allowed)
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `allowed` if no write bumped the generation since `generation`
    /// was read. The generation is compared after the insert, so a write that
    /// lands between the two still removes the entry.
    pub async fn insert(&self, key: CheckKey, allowed: bool, generation: u64) {
        let Some(cache) = &self.cache else {
            return;
        };
        cache.insert(key.clone(), allowed).await;
        if self.generation() != generation {
            cache.invalidate(&key).await;
        }
    }

    /// Invalidates entries a tuple write may affect. Only thing objects have no
    /// dependents, so writes confined to things drop just those objects' entries.
    #[instrument(skip(self, tuples), fields(count = tuples.len()))]
    pub fn invalidate_tuples(&self, tuples: &[RelationTuple]) {
        let objects: HashSet<ObjectRef> = tuples.iter().map(|t| t.object.clone()).collect();
        self.invalidate_objects(objects);
    }

    pub fn invalidate_filter(&self, filter: &RelationFilter) {
        match (filter.object_type, &filter.object_id) {
            (Some(object_type), Some(id)) => {
                self.invalidate_objects(HashSet::from([ObjectRef::new(object_type, id.clone())]))
            }
            _ => self.invalidate_all(),
        }
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
            self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn invalidate_objects(&self, objects: HashSet<ObjectRef>) {
        if objects.iter().any(|o| o.object_type != ObjectType::Thing) {
            self.invalidate_all();
            return;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        let Some(cache) = &self.cache else {
            return;
        };
        let result = cache.invalidate_entries_if(move |key, _| objects.contains(&key.object));
        if let Err(e) = result {
            warn!(error = %e, "targeted invalidation unavailable, clearing check cache");
            cache.invalidate_all();
        }
        self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{DomainId, ThingId, UserId};

    fn key_on(object: ObjectRef) -> CheckKey {
        CheckKey::new(&SubjectRef::user(&UserId::new()), "read", &object)
    }

    #[tokio::test]
    async fn test_hit_and_miss_metrics() {
        let cache = CheckCache::new(&CheckCacheConfig::default());
        let key = key_on(ObjectRef::thing(&ThingId::new()));

        assert_eq!(cache.get(&key).await, None);
        cache.insert(key.clone(), true, cache.generation()).await;
        assert_eq!(cache.get(&key).await, Some(true));

        let metrics = cache.metrics();
        assert_eq!(metrics.hits.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.misses.load(Ordering::Relaxed), 1);
        assert!((metrics.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_stale_generation_not_stored() {
        let cache = CheckCache::new(&CheckCacheConfig::default());
        let key = key_on(ObjectRef::domain(&DomainId::new()));
        let generation = cache.generation();
        cache.invalidate_all();
        cache.insert(key.clone(), true, generation).await;
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_current_generation_survives_unrelated_reads() {
        let cache = CheckCache::new(&CheckCacheConfig::default());
        let stale = key_on(ObjectRef::thing(&ThingId::new()));
        let fresh = key_on(ObjectRef::thing(&ThingId::new()));

        let before = cache.generation();
        cache.invalidate_tuples(&[RelationTuple::new(
            SubjectRef::user(&UserId::new()),
            "viewer",
            stale.object.clone(),
        )]);
        cache.insert(stale.clone(), true, before).await;
        cache.insert(fresh.clone(), false, cache.generation()).await;

        assert_eq!(cache.get(&stale).await, None);
        assert_eq!(cache.get(&fresh).await, Some(false));
    }

    #[tokio::test]
    async fn test_domain_write_clears_everything() {
        let cache = CheckCache::new(&CheckCacheConfig::default());
        let thing_key = key_on(ObjectRef::thing(&ThingId::new()));
        cache.insert(thing_key.clone(), true, cache.generation()).await;

        let d = DomainId::new();
        cache.invalidate_tuples(&[RelationTuple::new(
            SubjectRef::user(&UserId::new()),
            "viewer",
            ObjectRef::domain(&d),
        )]);
        assert_eq!(cache.get(&thing_key).await, None);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_inert() {
        let cache = CheckCache::new(&CheckCacheConfig::disabled());
        let key = key_on(ObjectRef::thing(&ThingId::new()));
        cache.insert(key.clone(), true, cache.generation()).await;
        assert_eq!(cache.get(&key).await, None);
    }
}

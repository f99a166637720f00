//! Unit tests for bastion-policy, run against the in-memory backend.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;

use bastion_core::*;
use bastion_db::MemoryStore;

use crate::{CheckCacheConfig, Evaluator, PolicyEngine, SCHEMA};

struct Fixture {
    store: MemoryStore,
    engine: PolicyEngine,
    ctx: RequestContext,
}

impl Fixture {
    fn new() -> Self {
        Self::with_cache(CheckCacheConfig::default())
    }

    fn with_cache(cache: CheckCacheConfig) -> Self {
        let store = MemoryStore::new();
        let engine = PolicyEngine::new(Arc::new(store.clone()), &cache);
        Self {
            store,
            engine,
            ctx: RequestContext::background(),
        }
    }

    async fn domain(&self, status: DomainStatus) -> DomainId {
        let id = DomainId::new();
        let domain = Domain {
            id,
            name: "Test".to_string(),
            alias: format!("d-{}", &id.to_string()[..8]),
            tags: BTreeSet::new(),
            metadata: HashMap::new(),
            status: DomainStatus::Enabled,
            created_by: UserId::new(),
            created_at: Utc::now(),
            updated_by: None,
            updated_at: None,
            frozen_at: None,
        };
        DomainRepository::create(&self.store, &domain).await.unwrap();
        if status != DomainStatus::Enabled {
            self.store
                .update_status(id, status, domain.created_by, Utc::now())
                .await
                .unwrap();
        }
        id
    }

    async fn write(&self, tuples: &[RelationTuple]) -> Result<()> {
        self.engine.create_relations(&self.ctx, tuples).await
    }

    async fn check(&self, subject: &SubjectRef, permission: &str, object: &ObjectRef) -> bool {
        self.engine
            .check(&self.ctx, subject, permission, object)
            .await
            .unwrap()
    }
}

fn user(id: &UserId) -> SubjectRef {
    SubjectRef::user(id)
}

fn tuple(subject: SubjectRef, relation: &str, object: ObjectRef) -> RelationTuple {
    RelationTuple::new(subject, relation, object)
}

fn owned_by(domain: &DomainId, object: ObjectRef) -> RelationTuple {
    tuple(ObjectRef::domain(domain).into(), "domain", object)
}

// =============================================================================
// Check
// =============================================================================

#[cfg(test)]
mod check_tests {
    use super::*;

    #[tokio::test]
    async fn test_domain_administrator_inherits_everything() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let (u1, u2) = (UserId::new(), UserId::new());
        fx.write(&[tuple(user(&u1), "administrator", ObjectRef::domain(&d))])
            .await
            .unwrap();

        let domain = ObjectRef::domain(&d);
        for permission in ["admin", "edit", "view", "membership"] {
            assert!(fx.check(&user(&u1), permission, &domain).await, "{}", permission);
        }
        assert!(!fx.check(&user(&u2), "view", &domain).await);
    }

    #[tokio::test]
    async fn test_viewer_does_not_get_edit() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let u = UserId::new();
        fx.write(&[tuple(user(&u), "viewer", ObjectRef::domain(&d))])
            .await
            .unwrap();

        let domain = ObjectRef::domain(&d);
        assert!(fx.check(&user(&u), "view", &domain).await);
        assert!(fx.check(&user(&u), "membership", &domain).await);
        assert!(!fx.check(&user(&u), "edit", &domain).await);
    }

    #[tokio::test]
    async fn test_platform_admin_reaches_domain_admin() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let root = UserId::new();
        fx.write(&[
            tuple(user(&root), "administrator", ObjectRef::platform()),
            tuple(ObjectRef::platform().into(), "platform", ObjectRef::domain(&d)),
        ])
        .await
        .unwrap();

        assert!(fx.check(&user(&root), "admin", &ObjectRef::domain(&d)).await);
        assert!(fx.check(&user(&root), "admin", &ObjectRef::platform()).await);
    }

    #[tokio::test]
    async fn test_thing_read_through_group_view() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let (g, t, u) = (GroupId::new(), ThingId::new(), UserId::new());
        fx.write(&[
            owned_by(&d, ObjectRef::group(&g)),
            owned_by(&d, ObjectRef::thing(&t)),
            tuple(ObjectRef::group(&g).into(), "group", ObjectRef::thing(&t)),
            tuple(user(&u), "viewer", ObjectRef::group(&g)),
        ])
        .await
        .unwrap();

        assert!(fx.check(&user(&u), "read", &ObjectRef::thing(&t)).await);
        assert!(!fx.check(&user(&u), "write", &ObjectRef::thing(&t)).await);
    }

    #[tokio::test]
    async fn test_domain_admin_administers_owned_thing() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let (t, u) = (ThingId::new(), UserId::new());
        fx.write(&[
            tuple(user(&u), "administrator", ObjectRef::domain(&d)),
            owned_by(&d, ObjectRef::thing(&t)),
        ])
        .await
        .unwrap();

        let thing = ObjectRef::thing(&t);
        assert!(fx.check(&user(&u), "admin", &thing).await);
        assert!(fx.check(&user(&u), "write", &thing).await);
        assert!(fx.check(&user(&u), "read", &thing).await);
    }

    #[tokio::test]
    async fn test_userset_subject_grants_domain_members() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let (g, member) = (GroupId::new(), UserId::new());
        let members = SubjectRef::userset(&ObjectRef::domain(&d), "membership");
        fx.write(&[
            owned_by(&d, ObjectRef::group(&g)),
            tuple(members, "viewer", ObjectRef::group(&g)),
            tuple(user(&member), "member", ObjectRef::domain(&d)),
        ])
        .await
        .unwrap();

        assert!(fx.check(&user(&member), "view", &ObjectRef::group(&g)).await);
        assert!(!fx.check(&user(&UserId::new()), "view", &ObjectRef::group(&g)).await);
    }

    #[tokio::test]
    async fn test_unknown_permission_is_invalid() {
        let fx = Fixture::new();
        let err = fx
            .engine
            .check(&fx.ctx, &user(&UserId::new()), "fly", &ObjectRef::domain(&DomainId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_non_canonical_id_is_invalid() {
        let fx = Fixture::new();
        let object = ObjectRef::new(ObjectType::Domain, "ABC");
        let err = fx
            .engine
            .check(&fx.ctx, &user(&UserId::new()), "view", &object)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_depth_bound_cuts_deep_branches() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let (t, u) = (ThingId::new(), UserId::new());
        fx.write(&[
            tuple(user(&u), "administrator", ObjectRef::domain(&d)),
            owned_by(&d, ObjectRef::thing(&t)),
        ])
        .await
        .unwrap();

        let snapshot = fx.store.snapshot().await.unwrap();
        let shallow = Evaluator::new(&SCHEMA).with_max_depth(2);
        let thing = ObjectRef::thing(&t);
        assert!(!shallow.check(snapshot.as_ref(), &user(&u), "read", &thing).await.unwrap());

        let full = Evaluator::new(&SCHEMA);
        assert!(full.check(snapshot.as_ref(), &user(&u), "read", &thing).await.unwrap());
    }

    #[tokio::test]
    async fn test_userset_cycle_terminates() {
        use crate::schema::{AllowedSubject, Operand, PermissionDef, RelationDef, Schema, TypeDef};

        static CYCLIC: Schema = Schema::new(&[TypeDef {
            object_type: ObjectType::Group,
            relations: &[RelationDef {
                name: "parent",
                allowed: &[
                    AllowedSubject::Type(ObjectType::User),
                    AllowedSubject::Userset(ObjectType::Group, "view"),
                ],
            }],
            permissions: &[PermissionDef {
                name: "view",
                operands: &[Operand::Computed("parent")],
            }],
        }]);

        let store = MemoryStore::new();
        let (g1, g2) = (ObjectRef::group(&GroupId::new()), ObjectRef::group(&GroupId::new()));
        let (u, outsider) = (UserId::new(), UserId::new());
        let mut tx = store.begin_write().await.unwrap();
        tx.insert(&[
            tuple(SubjectRef::userset(&g2, "view"), "parent", g1.clone()),
            tuple(SubjectRef::userset(&g1, "view"), "parent", g2.clone()),
            tuple(user(&u), "parent", g2.clone()),
        ])
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        let evaluator = Evaluator::new(&CYCLIC).with_max_depth(u32::MAX);
        assert!(evaluator.check(snapshot.as_ref(), &user(&u), "view", &g1).await.unwrap());
        assert!(!evaluator.check(snapshot.as_ref(), &user(&outsider), "view", &g1).await.unwrap());

        let tree = evaluator.expand(snapshot.as_ref(), "view", &g1).await.unwrap();
        assert!(tree.leaves().contains(&user(&u)));
    }

    #[tokio::test]
    async fn test_cached_result_invalidated_by_write() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let u = UserId::new();
        let domain = ObjectRef::domain(&d);

        assert!(!fx.check(&user(&u), "view", &domain).await);
        assert!(!fx.check(&user(&u), "view", &domain).await);
        fx.write(&[tuple(user(&u), "viewer", domain.clone())]).await.unwrap();
        assert!(fx.check(&user(&u), "view", &domain).await);

        let metrics = fx.engine.cache_metrics();
        assert!(metrics.hits.load(std::sync::atomic::Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn test_expired_deadline_reports_deadline_exceeded() {
        let fx = Fixture::new();
        let ctx = RequestContext::with_timeout(std::time::Duration::ZERO);
        let err = fx
            .engine
            .check(&ctx, &user(&UserId::new()), "view", &ObjectRef::domain(&DomainId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }
}

// =============================================================================
// Store writes and reads
// =============================================================================

#[cfg(test)]
mod store_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_domain_is_not_found() {
        let fx = Fixture::new();
        let err = fx
            .write(&[tuple(user(&UserId::new()), "viewer", ObjectRef::domain(&DomainId::new()))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_frozen_and_disabled_domains_reject_writes() {
        let fx = Fixture::new();
        for status in [DomainStatus::Frozen, DomainStatus::Disabled] {
            let d = fx.domain(status).await;
            let err = fx
                .write(&[tuple(user(&UserId::new()), "viewer", ObjectRef::domain(&d))])
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::FailedPrecondition, "{:?}", status);
        }
    }

    #[tokio::test]
    async fn test_thing_requires_domain() {
        let fx = Fixture::new();
        let err = fx
            .write(&[tuple(user(&UserId::new()), "viewer", ObjectRef::thing(&ThingId::new()))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_second_domain_conflicts() {
        let fx = Fixture::new();
        let (d1, d2) = (
            fx.domain(DomainStatus::Enabled).await,
            fx.domain(DomainStatus::Enabled).await,
        );
        let g = GroupId::new();
        fx.write(&[owned_by(&d1, ObjectRef::group(&g))]).await.unwrap();

        let err = fx.write(&[owned_by(&d2, ObjectRef::group(&g))]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_batch_rules() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;

        let err = fx.write(&[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let t = tuple(user(&UserId::new()), "viewer", ObjectRef::domain(&d));
        let err = fx.write(&[t.clone(), t.clone()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let too_many: Vec<RelationTuple> = (0..=MAX_BATCH)
            .map(|_| tuple(user(&UserId::new()), "viewer", ObjectRef::domain(&d)))
            .collect();
        let err = fx.write(&too_many).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let bad_subject = tuple(
            ObjectRef::thing(&ThingId::new()).into(),
            "viewer",
            ObjectRef::domain(&d),
        );
        let err = fx.write(&[bad_subject]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_failed_batch_writes_nothing() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let good = tuple(user(&UserId::new()), "viewer", ObjectRef::domain(&d));
        let orphan = tuple(user(&UserId::new()), "viewer", ObjectRef::group(&GroupId::new()));
        assert!(fx.write(&[good.clone(), orphan]).await.is_err());

        let page = fx
            .engine
            .read_relations(&fx.ctx, &RelationFilter::exact(&good), None, 10)
            .await
            .unwrap();
        assert!(page.tuples.is_empty());
    }

    #[tokio::test]
    async fn test_read_pages_with_cursor() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let tuples: Vec<RelationTuple> = (0..7)
            .map(|_| tuple(user(&UserId::new()), "viewer", ObjectRef::domain(&d)))
            .collect();
        fx.write(&tuples).await.unwrap();

        let filter = RelationFilter::for_object(&ObjectRef::domain(&d));
        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = fx
                .engine
                .read_relations(&fx.ctx, &filter, cursor.as_deref(), 3)
                .await
                .unwrap();
            assert!(page.tuples.len() <= 3);
            seen.extend(page.tuples);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 7);
        let keys: Vec<TupleKey> = seen.iter().map(RelationTuple::key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[tokio::test]
    async fn test_read_limit_bounds() {
        let fx = Fixture::new();
        for limit in [0, MAX_BATCH + 1] {
            let err = fx
                .engine
                .read_relations(&fx.ctx, &RelationFilter::default(), None, limit)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        let err = fx
            .engine
            .read_relations(&fx.ctx, &RelationFilter::default(), Some("%%%"), 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_retrieve_permissions_lists_direct_relations() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let u = UserId::new();
        fx.write(&[
            tuple(user(&u), "viewer", ObjectRef::domain(&d)),
            tuple(user(&u), "editor", ObjectRef::domain(&d)),
        ])
        .await
        .unwrap();

        let relations = fx
            .engine
            .retrieve_permissions(&fx.ctx, &user(&u), &ObjectRef::domain(&d))
            .await
            .unwrap();
        assert_eq!(relations, vec!["editor".to_string(), "viewer".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_delete_filter_rejected() {
        let fx = Fixture::new();
        let err = fx
            .engine
            .delete_relations(&fx.ctx, &RelationFilter::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_delete_entity_removes_both_sides() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let (g, t, u) = (GroupId::new(), ThingId::new(), UserId::new());
        fx.write(&[
            owned_by(&d, ObjectRef::group(&g)),
            owned_by(&d, ObjectRef::thing(&t)),
            tuple(ObjectRef::group(&g).into(), "group", ObjectRef::thing(&t)),
            tuple(user(&u), "viewer", ObjectRef::group(&g)),
        ])
        .await
        .unwrap();

        let removed = fx
            .engine
            .delete_entity_policies(&fx.ctx, &ObjectRef::group(&g))
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert!(!fx.check(&user(&u), "read", &ObjectRef::thing(&t)).await);
    }

    #[tokio::test]
    async fn test_freeze_hides_domain_and_owned_objects() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let (g, t, u1, u2) = (GroupId::new(), ThingId::new(), UserId::new(), UserId::new());
        fx.write(&[
            tuple(user(&u1), "administrator", ObjectRef::domain(&d)),
            tuple(user(&u2), "viewer", ObjectRef::domain(&d)),
            owned_by(&d, ObjectRef::group(&g)),
            owned_by(&d, ObjectRef::thing(&t)),
            tuple(ObjectRef::group(&g).into(), "group", ObjectRef::thing(&t)),
            tuple(user(&u2), "viewer", ObjectRef::thing(&t)),
        ])
        .await
        .unwrap();
        assert!(fx.check(&user(&u2), "read", &ObjectRef::thing(&t)).await);

        fx.engine.freeze_domain(&fx.ctx, &d).await.unwrap();

        assert!(!fx.check(&user(&u2), "read", &ObjectRef::thing(&t)).await);
        assert!(!fx.check(&user(&u1), "admin", &ObjectRef::domain(&d)).await);
        assert!(!fx.check(&user(&u1), "view", &ObjectRef::group(&g)).await);
    }
}

// =============================================================================
// Expand and lookups
// =============================================================================

#[cfg(test)]
mod lookup_tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_resources_sorted() {
        let fx = Fixture::new();
        let u = UserId::new();
        let mut expected = Vec::new();
        for _ in 0..3 {
            let d = fx.domain(DomainStatus::Enabled).await;
            fx.write(&[tuple(user(&u), "viewer", ObjectRef::domain(&d))])
                .await
                .unwrap();
            expected.push(d.to_string());
        }
        let other = fx.domain(DomainStatus::Enabled).await;
        fx.write(&[tuple(user(&UserId::new()), "viewer", ObjectRef::domain(&other))])
            .await
            .unwrap();
        expected.sort();

        let found = fx
            .engine
            .lookup_resources(&fx.ctx, &user(&u), "view", ObjectType::Domain)
            .await
            .unwrap();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn test_expand_and_lookup_subjects() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let (admin, viewer) = (UserId::new(), UserId::new());
        fx.write(&[
            tuple(user(&admin), "administrator", ObjectRef::domain(&d)),
            tuple(user(&viewer), "viewer", ObjectRef::domain(&d)),
        ])
        .await
        .unwrap();

        let tree = fx
            .engine
            .expand(&fx.ctx, "view", &ObjectRef::domain(&d))
            .await
            .unwrap();
        assert!(matches!(tree.node, UsersetNode::Union { .. }));
        let mut expected = vec![user(&admin), user(&viewer)];
        expected.sort();
        assert_eq!(tree.leaves(), expected);

        let admins = fx
            .engine
            .lookup_subjects(&fx.ctx, "admin", &ObjectRef::domain(&d), Some(ObjectType::User))
            .await
            .unwrap();
        assert_eq!(admins, vec![user(&admin)]);
    }

    #[tokio::test]
    async fn test_expand_follows_usersets() {
        let fx = Fixture::new();
        let d = fx.domain(DomainStatus::Enabled).await;
        let (g, member) = (GroupId::new(), UserId::new());
        fx.write(&[
            owned_by(&d, ObjectRef::group(&g)),
            tuple(
                SubjectRef::userset(&ObjectRef::domain(&d), "membership"),
                "viewer",
                ObjectRef::group(&g),
            ),
            tuple(user(&member), "member", ObjectRef::domain(&d)),
        ])
        .await
        .unwrap();

        let subjects = fx
            .engine
            .lookup_subjects(&fx.ctx, "view", &ObjectRef::group(&g), Some(ObjectType::User))
            .await
            .unwrap();
        assert_eq!(subjects, vec![user(&member)]);
    }
}

// =============================================================================
// Property tests
// =============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    const RELATIONS: [&str; 3] = ["administrator", "editor", "viewer"];

    /// A small fixed world: one domain owning two groups and two things,
    /// with thing 0 inside group 0.
    struct World {
        users: Vec<UserId>,
        objects: Vec<ObjectRef>,
    }

    async fn world(fx: &Fixture) -> World {
        let d = fx.domain(DomainStatus::Enabled).await;
        let groups = [GroupId::new(), GroupId::new()];
        let things = [ThingId::new(), ThingId::new()];
        let mut base = Vec::new();
        for g in &groups {
            base.push(owned_by(&d, ObjectRef::group(g)));
        }
        for t in &things {
            base.push(owned_by(&d, ObjectRef::thing(t)));
        }
        base.push(tuple(ObjectRef::group(&groups[0]).into(), "group", ObjectRef::thing(&things[0])));
        fx.write(&base).await.unwrap();

        let mut objects = vec![ObjectRef::domain(&d)];
        objects.extend(groups.iter().map(ObjectRef::group));
        objects.extend(things.iter().map(ObjectRef::thing));
        World {
            users: (0..3).map(|_| UserId::new()).collect(),
            objects,
        }
    }

    fn grants(world: &World, picks: &[(usize, usize, usize)]) -> Vec<RelationTuple> {
        let mut seen = BTreeSet::new();
        picks
            .iter()
            .map(|&(u, r, o)| {
                tuple(
                    user(&world.users[u % world.users.len()]),
                    RELATIONS[r % RELATIONS.len()],
                    world.objects[o % world.objects.len()].clone(),
                )
            })
            .filter(|t| seen.insert(t.key()))
            .collect()
    }

    async fn answers(fx: &Fixture, world: &World) -> Vec<bool> {
        let mut out = Vec::new();
        for u in &world.users {
            for object in &world.objects {
                let permissions: &[&str] = match object.object_type {
                    ObjectType::Domain => &["admin", "edit", "view", "membership"],
                    ObjectType::Group => &["admin", "edit", "view"],
                    _ => &["admin", "write", "read"],
                };
                for p in permissions {
                    out.push(fx.check(&user(u), p, object).await);
                }
            }
        }
        out
    }

    fn pick() -> impl Strategy<Value = Vec<(usize, usize, usize)>> {
        prop::collection::vec((0usize..3, 0usize..3, 0usize..5), 0..8)
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_check_is_monotone(first in pick(), second in pick()) {
            runtime().block_on(async {
                let fx = Fixture::new();
                let world = world(&fx).await;
                let before_tuples = grants(&world, &first);
                if !before_tuples.is_empty() {
                    fx.write(&before_tuples).await.unwrap();
                }
                let before = answers(&fx, &world).await;

                let existing: BTreeSet<TupleKey> = before_tuples.iter().map(RelationTuple::key).collect();
                let added: Vec<RelationTuple> = grants(&world, &second)
                    .into_iter()
                    .filter(|t| !existing.contains(&t.key()))
                    .collect();
                if !added.is_empty() {
                    fx.write(&added).await.unwrap();
                }
                let after = answers(&fx, &world).await;

                for (b, a) in before.iter().zip(after.iter()) {
                    assert!(!b || *a, "a check went from true to false after adding tuples");
                }
            });
        }

        #[test]
        fn prop_create_then_delete_restores_state(picks in pick()) {
            runtime().block_on(async {
                let fx = Fixture::new();
                let world = world(&fx).await;
                let all = RelationFilter::default();
                let initial_rows = fx.engine.read_relations(&fx.ctx, &all, None, MAX_BATCH).await.unwrap();
                let initial = answers(&fx, &world).await;

                let added = grants(&world, &picks);
                if added.is_empty() {
                    return;
                }
                fx.write(&added).await.unwrap();
                for t in &added {
                    let relations = fx
                        .engine
                        .retrieve_permissions(&fx.ctx, &t.subject, &t.object)
                        .await
                        .unwrap();
                    assert!(relations.contains(&t.relation));
                }
                for t in &added {
                    let removed = fx.engine.delete_relations(&fx.ctx, &RelationFilter::exact(t)).await.unwrap();
                    assert_eq!(removed, 1);
                }

                let final_rows = fx.engine.read_relations(&fx.ctx, &all, None, MAX_BATCH).await.unwrap();
                assert_eq!(initial_rows, final_rows);
                assert_eq!(initial, answers(&fx, &world).await);
            });
        }
    }
}

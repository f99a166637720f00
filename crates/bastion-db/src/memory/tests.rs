use std::collections::{BTreeSet, HashMap};

use chrono::{Duration, Utc};

use bastion_core::*;

use super::MemoryStore;

fn domain(alias: &str) -> Domain {
    Domain {
        id: DomainId::new(),
        name: alias.to_uppercase(),
        alias: alias.to_string(),
        tags: BTreeSet::new(),
        metadata: HashMap::new(),
        status: DomainStatus::Enabled,
        created_by: UserId::new(),
        created_at: Utc::now(),
        updated_by: None,
        updated_at: None,
        frozen_at: None,
    }
}

fn viewer_of(user: &UserId, d: &DomainId) -> RelationTuple {
    RelationTuple::new(SubjectRef::user(user), "viewer", ObjectRef::domain(d))
}

async fn write(store: &MemoryStore, tuples: &[RelationTuple]) -> Result<()> {
    let mut tx = store.begin_write().await?;
    tx.insert(tuples).await?;
    tx.commit().await
}

#[tokio::test]
async fn test_alias_unique_among_live_domains() {
    let store = MemoryStore::new();
    let first = domain("acme");
    DomainRepository::create(&store, &first).await.unwrap();

    let err = DomainRepository::create(&store, &domain("acme")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    store
        .update_status(first.id, DomainStatus::Frozen, first.created_by, Utc::now())
        .await
        .unwrap();
    DomainRepository::create(&store, &domain("acme")).await.unwrap();
}

#[tokio::test]
async fn test_uncommitted_write_is_discarded() {
    let store = MemoryStore::new();
    let d = DomainId::new();
    {
        let mut tx = store.begin_write().await.unwrap();
        tx.insert(&[viewer_of(&UserId::new(), &d)]).await.unwrap();
    }
    let snapshot = store.snapshot().await.unwrap();
    let rows = snapshot.read(&RelationFilter::default(), None, 10).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_duplicate_insert_conflicts() {
    let store = MemoryStore::new();
    let tuple = viewer_of(&UserId::new(), &DomainId::new());
    write(&store, &[tuple.clone()]).await.unwrap();

    let err = write(&store, &[tuple]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_read_is_ordered_and_resumable() {
    let store = MemoryStore::new();
    let d = DomainId::new();
    let tuples: Vec<RelationTuple> = (0..5).map(|_| viewer_of(&UserId::new(), &d)).collect();
    write(&store, &tuples).await.unwrap();

    let snapshot = store.snapshot().await.unwrap();
    let first = snapshot.read(&RelationFilter::default(), None, 3).await.unwrap();
    assert_eq!(first.len(), 3);
    let after = first.last().map(RelationTuple::key);
    let rest = snapshot
        .read(&RelationFilter::default(), after.as_ref(), 10)
        .await
        .unwrap();
    assert_eq!(rest.len(), 2);

    let mut keys: Vec<TupleKey> = first.iter().chain(rest.iter()).map(|t| t.key()).collect();
    let sorted = {
        let mut k = keys.clone();
        k.sort();
        k
    };
    assert_eq!(keys, sorted);
    keys.dedup();
    assert_eq!(keys.len(), 5);
}

#[tokio::test]
async fn test_tombstone_hides_owned_objects() {
    let store = MemoryStore::new();
    let d = DomainId::new();
    let g = GroupId::new();
    let user = UserId::new();
    write(
        &store,
        &[
            viewer_of(&user, &d),
            RelationTuple::new(SubjectRef::new(ObjectType::Domain, d.to_string()), "domain", ObjectRef::group(&g)),
            RelationTuple::new(SubjectRef::user(&user), "viewer", ObjectRef::group(&g)),
        ],
    )
    .await
    .unwrap();

    let tombstoned = store.tombstone_domain(&d.to_string(), Utc::now()).await.unwrap();
    assert_eq!(tombstoned, 3);

    {
        let snapshot = store.snapshot().await.unwrap();
        assert!(snapshot.read(&RelationFilter::default(), None, 10).await.unwrap().is_empty());
        assert!(snapshot.object_ids(ObjectType::Group).await.unwrap().is_empty());
    }

    let purged = store
        .purge_tombstones(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(purged, 3);
}

#[tokio::test]
async fn test_tombstoned_tuple_can_be_rewritten() {
    let store = MemoryStore::new();
    let (d, user) = (DomainId::new(), UserId::new());
    let tuple = viewer_of(&user, &d);
    write(&store, std::slice::from_ref(&tuple)).await.unwrap();
    store.tombstone_domain(&d.to_string(), Utc::now()).await.unwrap();

    write(&store, std::slice::from_ref(&tuple)).await.unwrap();
    let rows = store
        .snapshot()
        .await
        .unwrap()
        .read(&RelationFilter::default(), None, 10)
        .await
        .unwrap();
    assert_eq!(rows, vec![tuple.clone()]);

    let err = write(&store, std::slice::from_ref(&tuple)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let purged = store
        .purge_tombstones(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(purged, 0);
}

#[tokio::test]
async fn test_nonce_insert_if_absent() {
    let store = MemoryStore::new();
    let entry = NonceEntry {
        nonce: "n1".to_string(),
        reason: NonceReason::Rotated,
        expires_at: Utc::now() + Duration::minutes(5),
    };
    assert!(store.insert_if_absent(&entry).await.unwrap());
    assert!(!store.insert_if_absent(&entry).await.unwrap());

    let pruned = store.prune(Utc::now() + Duration::minutes(10)).await.unwrap();
    assert_eq!(pruned, 1);
    assert!(NonceRepository::get(&store, "n1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_invitation_confirm_only_once() {
    let store = MemoryStore::new();
    let invitation = Invitation {
        invited_by: UserId::new(),
        user_id: UserId::new(),
        domain_id: DomainId::new(),
        relation: DomainRelation::Viewer,
        token: "t".to_string(),
        created_at: Utc::now(),
        updated_at: None,
        confirmed_at: None,
    };
    InvitationRepository::create(&store, &invitation).await.unwrap();
    store
        .confirm(invitation.user_id, invitation.domain_id, Utc::now())
        .await
        .unwrap();
    let err = store
        .confirm(invitation.user_id, invitation.domain_id, Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

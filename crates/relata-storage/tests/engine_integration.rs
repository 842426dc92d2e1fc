//! The engines driving the in-memory back end end to end: schema written
//! through the contract, tuples committed, questions answered.

use std::sync::Arc;

use relata_domain::cache::MokaCheckCache;
use relata_domain::engine::{
    CheckEngine, CheckRequest, Decision, ExpandEngine, ExpandRequest, ExpandTree,
    LookupEntityEngine, LookupEntityRequest,
};
use relata_domain::schema::compile_source;
use relata_domain::storage::{RelationshipReader, RelationshipWriter, SchemaWriter};
use relata_domain::tuple::{Entity, EntityAndRelation, Subject, Tuple};
use relata_storage::MemoryStore;

const DRIVE_SCHEMA: &str = r#"
entity user {}

entity organization {
    relation admin @user
}

entity folder {
    relation org @organization
    relation creator @user
    relation collaborator @user

    action read = collaborator
    action delete = creator or org.admin
}

entity doc {
    relation org @organization
    relation parent @folder
    relation owner @user

    action read = (owner or parent.collaborator) or org.admin
    action update = owner and org.admin
}
"#;

async fn drive_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new_shared();
    let definition = compile_source(DRIVE_SCHEMA).expect("drive schema compiles");
    store.write_schema("t1", definition).await.expect("schema writes");

    let tuples: Vec<Tuple> = [
        "doc:1#owner@user:2",
        "doc:1#parent@folder:1#...",
        "folder:1#collaborator@user:1",
        "folder:1#collaborator@user:3",
        "doc:1#org@organization:1#...",
        "organization:1#admin@user:1",
    ]
    .iter()
    .map(|text| Tuple::parse(text).expect("tuple parses"))
    .collect();
    store
        .write_relationships("t1", tuples, "")
        .await
        .expect("tuples write");
    store
}

fn check_engine(store: &Arc<MemoryStore>) -> CheckEngine<MemoryStore, MemoryStore> {
    CheckEngine::with_cache(
        Arc::clone(store),
        Arc::clone(store),
        Arc::new(MokaCheckCache::default()),
    )
}

async fn decide(store: &Arc<MemoryStore>, id: &str, permission: &str, user: &str) -> Decision {
    check_engine(store)
        .check(&CheckRequest::new(
            "t1",
            Entity::new("doc", id),
            permission,
            Subject::concrete("user", user),
        ))
        .await
        .expect("check succeeds")
        .decision
}

#[tokio::test]
async fn drive_scenarios_resolve_against_the_store() {
    let store = drive_store().await;
    assert_eq!(decide(&store, "1", "read", "2").await, Decision::Allowed);
    assert_eq!(decide(&store, "1", "read", "3").await, Decision::Allowed);
    assert_eq!(decide(&store, "1", "read", "1").await, Decision::Allowed);
    assert_eq!(decide(&store, "1", "read", "4").await, Decision::Denied);
    assert_eq!(decide(&store, "1", "update", "2").await, Decision::Denied);
}

#[tokio::test]
async fn checks_pin_to_their_snapshot() {
    let store = drive_store().await;
    let engine = check_engine(&store);

    let before_grant = store.head_snapshot("t1").await.unwrap();
    store
        .write_relationships(
            "t1",
            vec![Tuple::parse("doc:1#owner@user:8").unwrap()],
            "",
        )
        .await
        .unwrap();

    let pinned = CheckRequest::new(
        "t1",
        Entity::new("doc", "1"),
        "read",
        Subject::concrete("user", "8"),
    )
    .with_snap_token(before_grant);
    assert_eq!(
        engine.check(&pinned).await.unwrap().decision,
        Decision::Denied,
        "the grant landed after the pinned snapshot"
    );

    let fresh = CheckRequest::new(
        "t1",
        Entity::new("doc", "1"),
        "read",
        Subject::concrete("user", "8"),
    );
    assert_eq!(engine.check(&fresh).await.unwrap().decision, Decision::Allowed);
}

#[tokio::test]
async fn expand_builds_the_drive_tree_from_the_store() {
    let store = drive_store().await;
    let engine = ExpandEngine::new(Arc::clone(&store), Arc::clone(&store));

    let response = engine
        .expand(&ExpandRequest::new("t1", Entity::new("doc", "1"), "read"))
        .await
        .expect("expand succeeds");

    let target = |entity_type: &str, id: &str, relation: &str| {
        EntityAndRelation::new(Entity::new(entity_type, id), relation)
    };
    let expected = ExpandTree::union(vec![
        ExpandTree::union(vec![
            ExpandTree::leaf(
                target("doc", "1", "owner"),
                vec![Subject::concrete("user", "2")],
            ),
            ExpandTree::union(vec![ExpandTree::leaf(
                target("folder", "1", "collaborator"),
                vec![
                    Subject::concrete("user", "1"),
                    Subject::concrete("user", "3"),
                ],
            )]),
        ]),
        ExpandTree::union(vec![ExpandTree::leaf(
            target("organization", "1", "admin"),
            vec![Subject::concrete("user", "1")],
        )]),
    ]);
    assert_eq!(response.tree, expected);
}

#[tokio::test]
async fn lookup_finds_every_readable_doc() {
    let store = drive_store().await;
    store
        .write_relationships(
            "t1",
            vec![Tuple::parse("doc:2#owner@user:1").unwrap()],
            "",
        )
        .await
        .unwrap();

    let check = Arc::new(check_engine(&store));
    let engine = LookupEntityEngine::new(check, Arc::clone(&store), Arc::clone(&store));

    let mut response = engine
        .execute(&LookupEntityRequest::new(
            "t1",
            "doc",
            "read",
            Subject::concrete("user", "1"),
        ))
        .await
        .expect("lookup succeeds");
    response.entity_ids.sort();
    assert_eq!(response.entity_ids, vec!["1".to_string(), "2".to_string()]);
}

#[tokio::test]
async fn deleting_a_grant_revokes_access_at_the_new_head() {
    let store = drive_store().await;
    let engine = check_engine(&store);

    let request = CheckRequest::new(
        "t1",
        Entity::new("doc", "1"),
        "read",
        Subject::concrete("user", "2"),
    );
    assert_eq!(engine.check(&request).await.unwrap().decision, Decision::Allowed);

    let mut filter = relata_domain::tuple::TupleFilter::entity_relation(
        &Entity::new("doc", "1"),
        "owner",
    );
    filter.subject.subject_type = "user".to_string();
    filter.subject.ids = vec!["2".to_string()];
    store.delete_relationships("t1", &filter).await.unwrap();

    assert_eq!(engine.check(&request).await.unwrap().decision, Decision::Denied);
}

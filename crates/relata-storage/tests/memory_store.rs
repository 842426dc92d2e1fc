//! Behavior of the in-memory back end through the storage contract.

use relata_domain::schema::compile_source;
use relata_domain::storage::{
    Pagination, RelationshipReader, RelationshipWriter, SchemaReader, SchemaWriter,
};
use relata_domain::tuple::{Entity, Tuple, TupleFilter};
use relata_storage::MemoryStore;

fn tuples(texts: &[&str]) -> Vec<Tuple> {
    texts
        .iter()
        .map(|text| Tuple::parse(text).expect("test tuple parses"))
        .collect()
}

#[tokio::test]
async fn old_snapshot_does_not_see_later_writes() {
    let store = MemoryStore::new();
    store
        .write_relationships("t1", tuples(&["doc:1#owner@user:1"]), "")
        .await
        .unwrap();

    let old_snap = store.head_snapshot("t1").await.unwrap();
    store
        .write_relationships("t1", tuples(&["doc:1#owner@user:2"]), "")
        .await
        .unwrap();

    let filter = TupleFilter::entity_relation(&Entity::new("doc", "1"), "owner");
    let old_view: Vec<Tuple> = store
        .query_relationships("t1", &filter, &old_snap)
        .await
        .unwrap()
        .collect();
    assert_eq!(old_view, tuples(&["doc:1#owner@user:1"]));

    let new_snap = store.head_snapshot("t1").await.unwrap();
    let new_view: Vec<Tuple> = store
        .query_relationships("t1", &filter, &new_snap)
        .await
        .unwrap()
        .collect();
    assert_eq!(new_view.len(), 2);
}

#[tokio::test]
async fn old_snapshot_still_sees_deleted_rows() {
    let store = MemoryStore::new();
    store
        .write_relationships("t1", tuples(&["doc:1#owner@user:1"]), "")
        .await
        .unwrap();
    let before_delete = store.head_snapshot("t1").await.unwrap();

    let filter = TupleFilter::entity_relation(&Entity::new("doc", "1"), "owner");
    store.delete_relationships("t1", &filter).await.unwrap();

    let old_view: Vec<Tuple> = store
        .query_relationships("t1", &filter, &before_delete)
        .await
        .unwrap()
        .collect();
    assert_eq!(old_view.len(), 1, "deletion is invisible to the old snapshot");

    let after_delete = store.head_snapshot("t1").await.unwrap();
    let new_view: Vec<Tuple> = store
        .query_relationships("t1", &filter, &after_delete)
        .await
        .unwrap()
        .collect();
    assert!(new_view.is_empty());
}

#[tokio::test]
async fn tenants_are_isolated() {
    let store = MemoryStore::new();
    store
        .write_relationships("t1", tuples(&["doc:1#owner@user:1"]), "")
        .await
        .unwrap();

    let snap = store.head_snapshot("t2").await.unwrap();
    let view: Vec<Tuple> = store
        .query_relationships("t2", &TupleFilter::default(), &snap)
        .await
        .unwrap()
        .collect();
    assert!(view.is_empty());
}

#[tokio::test]
async fn unique_entity_ids_deduplicate_under_the_snapshot() {
    let store = MemoryStore::new();
    store
        .write_relationships(
            "t1",
            tuples(&[
                "doc:1#owner@user:1",
                "doc:1#viewer@user:2",
                "doc:2#owner@user:1",
                "folder:9#owner@user:1",
            ]),
            "",
        )
        .await
        .unwrap();
    let snap = store.head_snapshot("t1").await.unwrap();
    store
        .write_relationships("t1", tuples(&["doc:3#owner@user:1"]), "")
        .await
        .unwrap();

    let ids = store
        .get_unique_entity_ids_by_entity_type("t1", "doc", &snap)
        .await
        .unwrap();
    assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
}

#[tokio::test]
async fn pagination_walks_the_result_set_with_stable_tokens() {
    let store = MemoryStore::new();
    store
        .write_relationships(
            "t1",
            tuples(&[
                "doc:1#viewer@user:1",
                "doc:1#viewer@user:2",
                "doc:1#viewer@user:3",
                "doc:1#viewer@user:4",
                "doc:1#viewer@user:5",
            ]),
            "",
        )
        .await
        .unwrap();
    let snap = store.head_snapshot("t1").await.unwrap();
    let filter = TupleFilter::entity_relation(&Entity::new("doc", "1"), "viewer");

    let (first_page, token) = store
        .read_relationships("t1", &filter, &snap, &Pagination::new(2))
        .await
        .unwrap();
    assert_eq!(first_page.len(), 2);
    let token = token.as_str().expect("more pages remain").to_string();

    // The same query with the same token returns the same page.
    let pagination = Pagination::new(2).with_token(token.clone());
    let (second_page, next) = store
        .read_relationships("t1", &filter, &snap, &pagination)
        .await
        .unwrap();
    let (second_again, _) = store
        .read_relationships("t1", &filter, &snap, &pagination)
        .await
        .unwrap();
    assert_eq!(second_page, second_again);
    assert_eq!(second_page.len(), 2);

    let pagination = Pagination::new(2).with_token(next.as_str().expect("one more page"));
    let (last_page, end) = store
        .read_relationships("t1", &filter, &snap, &pagination)
        .await
        .unwrap();
    assert_eq!(last_page.len(), 1);
    assert!(end.is_noop());

    let mut all: Vec<Tuple> = Vec::new();
    all.extend(first_page.tuples().iter().cloned());
    all.extend(second_page.tuples().iter().cloned());
    all.extend(last_page.tuples().iter().cloned());
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn invalid_continuous_token_is_rejected() {
    let store = MemoryStore::new();
    store
        .write_relationships("t1", tuples(&["doc:1#viewer@user:1"]), "")
        .await
        .unwrap();
    let snap = store.head_snapshot("t1").await.unwrap();

    let pagination = Pagination::new(2).with_token("!!not-a-token!!");
    let err = store
        .read_relationships("t1", &TupleFilter::default(), &snap, &pagination)
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_CONTINUOUS_TOKEN");
}

#[tokio::test]
async fn schema_versions_are_monotone_and_addressable() {
    let store = MemoryStore::new();
    let first = compile_source("entity user {}").unwrap();
    let second = compile_source(
        r#"
        entity user {}
        entity doc {
            relation owner @user
            action read = owner
        }
        "#,
    )
    .unwrap();

    let v1 = store.write_schema("t1", first).await.unwrap();
    let v2 = store.write_schema("t1", second).await.unwrap();
    assert!(v2 > v1, "versions sort in creation order");
    assert_eq!(store.head_version("t1").await.unwrap(), v2);

    // The old version still serves its own content.
    assert!(store.read_schema_definition("t1", "doc", &v1).await.is_err());
    let (doc, served) = store.read_schema_definition("t1", "doc", &v2).await.unwrap();
    assert_eq!(doc.name, "doc");
    assert_eq!(served, v2);

    let err = store.head_version("t9").await.unwrap_err();
    assert_eq!(err.code().as_str(), "NOT_FOUND");
}

//! Expand engine tests: exact tree shapes over the drive sample.

use std::sync::Arc;

use crate::engine::{ExpandEngine, ExpandRequest, ExpandTree};
use crate::schema::RewriteOperation;
use crate::tuple::{Entity, EntityAndRelation, Subject};

use super::mocks::FixtureStore;
use super::{DRIVE_SCHEMA, DRIVE_TUPLES};

fn engine_over(store: Arc<FixtureStore>) -> ExpandEngine<FixtureStore, FixtureStore> {
    ExpandEngine::new(Arc::clone(&store), store)
}

fn target(entity_type: &str, id: &str, relation: &str) -> EntityAndRelation {
    EntityAndRelation::new(Entity::new(entity_type, id), relation)
}

#[tokio::test]
async fn drive_sample_read_tree() {
    let store = Arc::new(FixtureStore::new(DRIVE_SCHEMA, DRIVE_TUPLES));
    let engine = engine_over(store);

    let response = engine
        .expand(&ExpandRequest::new("t1", Entity::new("doc", "1"), "read"))
        .await
        .expect("expand succeeds");

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
async fn intersection_tree_preserves_the_operation() {
    let store = Arc::new(FixtureStore::new(DRIVE_SCHEMA, DRIVE_TUPLES));
    let engine = engine_over(store);

    let response = engine
        .expand(&ExpandRequest::new("t1", Entity::new("doc", "1"), "update"))
        .await
        .expect("expand succeeds");

    let expected = ExpandTree::intersection(vec![
        ExpandTree::leaf(
            target("doc", "1", "owner"),
            vec![Subject::concrete("user", "2")],
        ),
        ExpandTree::union(vec![ExpandTree::leaf(
            target("organization", "1", "admin"),
            vec![Subject::concrete("user", "1")],
        )]),
    ]);
    assert_eq!(response.tree, expected);
}

#[tokio::test]
async fn exclusion_is_recorded_on_the_leaf() {
    let schema = r#"
        entity user {}
        entity doc {
            relation viewer @user
            relation banned @user
            action read = viewer or not banned
        }
    "#;
    let tuples = &["doc:1#viewer@user:1", "doc:1#banned@user:2"];
    let store = Arc::new(FixtureStore::new(schema, tuples));
    let engine = engine_over(store);

    let response = engine
        .expand(&ExpandRequest::new("t1", Entity::new("doc", "1"), "read"))
        .await
        .expect("expand succeeds");

    let expected = ExpandTree::Node {
        exclusion: false,
        operation: RewriteOperation::Union,
        children: vec![
            ExpandTree::leaf(
                target("doc", "1", "viewer"),
                vec![Subject::concrete("user", "1")],
            ),
            ExpandTree::Leaf {
                exclusion: true,
                target: target("doc", "1", "banned"),
                subjects: vec![Subject::concrete("user", "2")],
            },
        ],
    };
    assert_eq!(response.tree, expected);
}

#[tokio::test]
async fn userset_subjects_expand_recursively() {
    let schema = r#"
        entity user {}
        entity team {
            relation member @user
        }
        entity doc {
            relation viewer @user @team#member
            action read = viewer
        }
    "#;
    let tuples = &[
        "doc:1#viewer@user:9",
        "doc:1#viewer@team:eng#member",
        "team:eng#member@user:7",
    ];
    let store = Arc::new(FixtureStore::new(schema, tuples));
    let engine = engine_over(store);

    let response = engine
        .expand(&ExpandRequest::new("t1", Entity::new("doc", "1"), "read"))
        .await
        .expect("expand succeeds");

    let expected = ExpandTree::union(vec![
        ExpandTree::leaf(
            target("doc", "1", "viewer"),
            vec![Subject::concrete("user", "9")],
        ),
        ExpandTree::leaf(
            target("team", "eng", "member"),
            vec![Subject::concrete("user", "7")],
        ),
    ]);
    assert_eq!(response.tree, expected);
}

#[tokio::test]
async fn expanding_an_unknown_permission_fails() {
    let store = Arc::new(FixtureStore::new(DRIVE_SCHEMA, DRIVE_TUPLES));
    let engine = engine_over(store);
    let err = engine
        .expand(&ExpandRequest::new("t1", Entity::new("doc", "1"), "annotate"))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "UNDEFINED_RELATION_REFERENCE");
}

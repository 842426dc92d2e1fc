//! Engine tests against an instrumented in-memory fixture store.

mod expand_tests;
mod mocks;

/// Document-drive sample schema shared across the engine tests.
pub const DRIVE_SCHEMA: &str = r#"
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

/// Tuples backing the drive sample scenarios.
pub const DRIVE_TUPLES: &[&str] = &[
    "doc:1#owner@user:2",
    "doc:1#parent@folder:1#...",
    "folder:1#collaborator@user:1",
    "folder:1#collaborator@user:3",
    "doc:1#org@organization:1#...",
    "organization:1#admin@user:1",
];

//! Request and response types for the engines.

use serde::{Deserialize, Serialize};

use crate::schema::RewriteOperation;
use crate::tuple::{Entity, EntityAndRelation, Subject};

/// Default depth budget for check recursion.
pub const DEFAULT_CHECK_DEPTH: u32 = 20;

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Flips the decision; used for exclusion leaves.
    pub fn inverted(self) -> Self {
        match self {
            Decision::Allowed => Decision::Denied,
            Decision::Denied => Decision::Allowed,
        }
    }
}

/// A permission check question.
///
/// `snap_token` and `schema_version` default to the tenant's head when
/// absent.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub tenant_id: String,
    pub entity: Entity,
    pub permission: String,
    pub subject: Subject,
    pub snap_token: Option<String>,
    pub schema_version: Option<String>,
    pub depth: u32,
}

impl CheckRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        entity: Entity,
        permission: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity,
            permission: permission.into(),
            subject,
            snap_token: None,
            schema_version: None,
            depth: DEFAULT_CHECK_DEPTH,
        }
    }

    pub fn with_snap_token(mut self, snap_token: impl Into<String>) -> Self {
        self.snap_token = Some(snap_token.into());
        self
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = Some(schema_version.into());
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

/// Check result and the smallest depth budget observed on the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResponse {
    pub decision: Decision,
    pub remaining_depth: u32,
}

/// A request to materialize the evaluation tree of a permission.
#[derive(Debug, Clone)]
pub struct ExpandRequest {
    pub tenant_id: String,
    pub entity: Entity,
    pub permission: String,
    pub snap_token: Option<String>,
    pub schema_version: Option<String>,
}

impl ExpandRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        entity: Entity,
        permission: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity,
            permission: permission.into(),
            snap_token: None,
            schema_version: None,
        }
    }

    pub fn with_snap_token(mut self, snap_token: impl Into<String>) -> Self {
        self.snap_token = Some(snap_token.into());
        self
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = Some(schema_version.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandResponse {
    pub tree: ExpandTree,
}

/// The materialized evaluation tree of a permission.
///
/// Leaves name the relation that contributed and the subjects found on
/// it; nodes preserve the set operation of the rewrite they came from.
/// An exclusion flag set on a node means its result is subtracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpandTree {
    Leaf {
        exclusion: bool,
        target: EntityAndRelation,
        subjects: Vec<Subject>,
    },
    Node {
        exclusion: bool,
        operation: RewriteOperation,
        children: Vec<ExpandTree>,
    },
}

impl ExpandTree {
    pub fn leaf(target: EntityAndRelation, subjects: Vec<Subject>) -> Self {
        ExpandTree::Leaf {
            exclusion: false,
            target,
            subjects,
        }
    }

    pub fn union(children: Vec<ExpandTree>) -> Self {
        ExpandTree::Node {
            exclusion: false,
            operation: RewriteOperation::Union,
            children,
        }
    }

    pub fn intersection(children: Vec<ExpandTree>) -> Self {
        ExpandTree::Node {
            exclusion: false,
            operation: RewriteOperation::Intersection,
            children,
        }
    }
}

/// A request to enumerate entities a subject can act on.
#[derive(Debug, Clone)]
pub struct LookupEntityRequest {
    pub tenant_id: String,
    pub entity_type: String,
    pub permission: String,
    pub subject: Subject,
    pub snap_token: Option<String>,
    pub schema_version: Option<String>,
    pub depth: u32,
}

impl LookupEntityRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        entity_type: impl Into<String>,
        permission: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity_type: entity_type.into(),
            permission: permission.into(),
            subject,
            snap_token: None,
            schema_version: None,
            depth: DEFAULT_CHECK_DEPTH,
        }
    }

    pub fn with_snap_token(mut self, snap_token: impl Into<String>) -> Self {
        self.snap_token = Some(snap_token.into());
        self
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = Some(schema_version.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEntityResponse {
    /// Ids whose check allowed; order is unspecified.
    pub entity_ids: Vec<String>,
}

/// A request to evaluate which actions a set of assumed relations
/// satisfies, without touching storage tuples.
#[derive(Debug, Clone)]
pub struct LookupSchemaRequest {
    pub tenant_id: String,
    pub entity_type: String,
    pub relation_names: Vec<String>,
    pub schema_version: Option<String>,
}

impl LookupSchemaRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        entity_type: impl Into<String>,
        relation_names: Vec<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity_type: entity_type.into(),
            relation_names,
            schema_version: None,
        }
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = Some(schema_version.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSchemaResponse {
    /// Satisfied action names, sorted.
    pub action_names: Vec<String>,
}

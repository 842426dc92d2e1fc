//! Schema model and the DSL pipeline (lexer, parser, compiler).
//!
//! A compiled [`SchemaDefinition`] maps entity names to
//! [`EntityDefinition`]s: relations with their allowed references, actions
//! with their lowered [`Child`] expression trees, and a reference index
//! telling relation and action names apart.

pub mod compiler;
pub mod lexer;
pub mod parser;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use compiler::compile;
pub use parser::parse;

/// Compiles DSL source straight to a [`SchemaDefinition`].
pub fn compile_source(source: &str) -> Result<SchemaDefinition> {
    compile(&parse(source)?)
}

/// A compiled schema: entity name to definition.
///
/// Maps are `BTreeMap`s so a compiled schema serializes byte-identically
/// across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub entities: BTreeMap<String, EntityDefinition>,
}

impl SchemaDefinition {
    /// Looks up an entity definition by name.
    pub fn entity(&self, name: &str) -> Result<&EntityDefinition> {
        self.entities.get(name).ok_or_else(|| Error::NotFound {
            what: format!("entity '{}'", name),
        })
    }
}

/// Whether a name on an entity refers to a relation or an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationalReferenceKind {
    Relation,
    Action,
}

/// One entity of the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub relations: BTreeMap<String, RelationDefinition>,
    pub actions: BTreeMap<String, ActionDefinition>,
    pub references: BTreeMap<String, RelationalReferenceKind>,
}

impl EntityDefinition {
    /// Returns whether `name` is a relation or an action of this entity.
    pub fn reference_kind(&self, name: &str) -> Option<RelationalReferenceKind> {
        self.references.get(name).copied()
    }

    pub fn relation(&self, name: &str) -> Result<&RelationDefinition> {
        self.relations.get(name).ok_or_else(|| Error::NotFound {
            what: format!("relation '{}' on entity '{}'", name, self.name),
        })
    }

    pub fn action(&self, name: &str) -> Result<&ActionDefinition> {
        self.actions.get(name).ok_or_else(|| Error::NotFound {
            what: format!("action '{}' on entity '{}'", name, self.name),
        })
    }
}

/// A relation and the subject shapes tuples may assign to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    pub references: Vec<RelationReference>,
}

/// One allowed subject shape: a bare entity type, or `entity#relation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationReference {
    pub entity_type: String,
    pub relation: Option<String>,
}

impl RelationReference {
    pub fn entity(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            relation: None,
        }
    }

    pub fn userset(entity_type: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            relation: Some(relation.into()),
        }
    }
}

/// An action and its lowered expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    pub child: Child,
}

/// A node of the lowered action expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Child {
    Leaf(Leaf),
    Rewrite(Rewrite),
}

impl Child {
    pub fn computed(relation: impl Into<String>) -> Self {
        Child::Leaf(Leaf {
            exclusion: false,
            kind: LeafKind::ComputedUserset {
                relation: relation.into(),
            },
        })
    }

    pub fn tuple_to(tupleset: impl Into<String>, computed: impl Into<String>) -> Self {
        Child::Leaf(Leaf {
            exclusion: false,
            kind: LeafKind::TupleToUserset {
                tupleset: tupleset.into(),
                computed: computed.into(),
            },
        })
    }

    /// Returns the same leaf with the exclusion flag set.
    pub fn negated(self) -> Self {
        match self {
            Child::Leaf(mut leaf) => {
                leaf.exclusion = true;
                Child::Leaf(leaf)
            }
            rewrite => rewrite,
        }
    }

    pub fn union(children: Vec<Child>) -> Self {
        Child::Rewrite(Rewrite {
            operation: RewriteOperation::Union,
            children,
        })
    }

    pub fn intersection(children: Vec<Child>) -> Self {
        Child::Rewrite(Rewrite {
            operation: RewriteOperation::Intersection,
            children,
        })
    }
}

/// A leaf delegating to another relation or action, optionally excluded
/// (`not`). Exclusion binds to leaves only; the flag flips the leaf's own
/// result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    pub exclusion: bool,
    pub kind: LeafKind,
}

/// The two leaf bodies of an action expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafKind {
    /// Delegate to another relation or action of the same entity.
    ComputedUserset { relation: String },
    /// Walk `tupleset` one hop, then evaluate `computed` on each linked
    /// entity.
    TupleToUserset { tupleset: String, computed: String },
}

/// A set-algebra combination of child expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewrite {
    pub operation: RewriteOperation,
    pub children: Vec<Child>,
}

/// Set operation of a [`Rewrite`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewriteOperation {
    Union,
    Intersection,
    Exclusion,
}

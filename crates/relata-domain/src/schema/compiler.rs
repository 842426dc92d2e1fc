//! DSL compiler: resolves names, checks schema invariants, and lowers
//! action expressions into [`Child`] trees.
//!
//! Lowering rules:
//! - `x or y [or z]` becomes one `Rewrite(Union, ..)`; chains at the same
//!   precedence flatten, parenthesized sub-expressions stay nested.
//! - `x and y` becomes `Rewrite(Intersection, ..)` the same way.
//! - A single-atom body compiles to a bare `Leaf`, not a one-child
//!   rewrite.
//! - `not` sets the exclusion flag on the leaf it precedes; it never
//!   distributes over a composite (the parser rejects `not (...)`).
//! - `a.b` compiles to `TupleToUserset { tupleset: a, computed: b }`
//!   after resolving `a` as a relation of the current entity whose single
//!   bare entity reference owns `b`. Longer walks are rejected.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::parser::{ExprAst, SchemaAst, SetOperator};
use super::{
    ActionDefinition, Child, EntityDefinition, Leaf, LeafKind, RelationDefinition,
    RelationReference, RelationalReferenceKind, Rewrite, RewriteOperation, SchemaDefinition,
};

/// Compiles a parsed schema into a [`SchemaDefinition`], or reports the
/// first offense as a typed error.
pub fn compile(ast: &SchemaAst) -> Result<SchemaDefinition> {
    let mut entities: BTreeMap<String, EntityDefinition> = BTreeMap::new();

    // Register every entity with its relations and reference index before
    // resolving anything, so forward references compile.
    for entity in &ast.entities {
        if entities.contains_key(&entity.name) {
            return Err(Error::DuplicateName {
                scope: "schema".to_string(),
                name: entity.name.clone(),
            });
        }

        let mut definition = EntityDefinition {
            name: entity.name.clone(),
            ..EntityDefinition::default()
        };

        for relation in &entity.relations {
            if definition.references.contains_key(&relation.name) {
                return Err(Error::DuplicateName {
                    scope: entity.name.clone(),
                    name: relation.name.clone(),
                });
            }
            definition.references.insert(
                relation.name.clone(),
                RelationalReferenceKind::Relation,
            );
            definition.relations.insert(
                relation.name.clone(),
                RelationDefinition {
                    name: relation.name.clone(),
                    references: relation
                        .references
                        .iter()
                        .map(|reference| RelationReference {
                            entity_type: reference.entity_type.clone(),
                            relation: reference.relation.clone(),
                        })
                        .collect(),
                },
            );
        }

        for action in &entity.actions {
            if definition.references.contains_key(&action.name) {
                return Err(Error::DuplicateName {
                    scope: entity.name.clone(),
                    name: action.name.clone(),
                });
            }
            definition
                .references
                .insert(action.name.clone(), RelationalReferenceKind::Action);
        }

        entities.insert(entity.name.clone(), definition);
    }

    // Relation references are validated before action bodies so a broken
    // reference is reported ahead of the expressions depending on it.
    for entity in &ast.entities {
        for relation in &entity.relations {
            validate_relation_references(&entities, &entity.name, &relation.name)?;
        }
    }

    for entity in &ast.entities {
        for action in &entity.actions {
            let child = lower_expr(&entities, &entity.name, &action.expr)?;
            let definition = entities.get_mut(&entity.name).expect("entity registered");
            definition.actions.insert(
                action.name.clone(),
                ActionDefinition {
                    name: action.name.clone(),
                    child,
                },
            );
        }
    }

    Ok(SchemaDefinition { entities })
}

fn validate_relation_references(
    entities: &BTreeMap<String, EntityDefinition>,
    entity_name: &str,
    relation_name: &str,
) -> Result<()> {
    let relation = &entities[entity_name].relations[relation_name];

    let bare_references = relation
        .references
        .iter()
        .filter(|reference| reference.relation.is_none())
        .count();
    if bare_references > 1 {
        return Err(Error::RelationReferenceMustHaveOneEntityReference {
            relation: format!("{}#{}", entity_name, relation_name),
        });
    }

    for reference in &relation.references {
        let target = entities.get(&reference.entity_type).ok_or_else(|| {
            Error::UndefinedRelationReference {
                reference: reference.entity_type.clone(),
            }
        })?;
        if let Some(target_relation) = &reference.relation {
            // The target must be a relation; naming an action is rejected.
            match target.reference_kind(target_relation) {
                Some(RelationalReferenceKind::Relation) => {}
                _ => {
                    return Err(Error::RelationReferenceNotFoundInEntityReferences {
                        entity: reference.entity_type.clone(),
                        reference: format!("{}#{}", reference.entity_type, target_relation),
                    })
                }
            }
        }
    }

    Ok(())
}

fn lower_expr(
    entities: &BTreeMap<String, EntityDefinition>,
    entity_name: &str,
    expr: &ExprAst,
) -> Result<Child> {
    match expr {
        ExprAst::Reference {
            segments,
            exclusion,
            ..
        } => lower_reference(entities, entity_name, segments, *exclusion),
        ExprAst::Operation { operator, children } => {
            let children = children
                .iter()
                .map(|child| lower_expr(entities, entity_name, child))
                .collect::<Result<Vec<_>>>()?;
            let operation = match operator {
                SetOperator::Or => RewriteOperation::Union,
                SetOperator::And => RewriteOperation::Intersection,
            };
            Ok(Child::Rewrite(Rewrite {
                operation,
                children,
            }))
        }
    }
}

fn lower_reference(
    entities: &BTreeMap<String, EntityDefinition>,
    entity_name: &str,
    segments: &[String],
    exclusion: bool,
) -> Result<Child> {
    let entity = &entities[entity_name];
    match segments {
        [name] => {
            if entity.reference_kind(name).is_none() {
                return Err(Error::UndefinedRelationReference {
                    reference: format!("{}#{}", entity_name, name),
                });
            }
            Ok(Child::Leaf(Leaf {
                exclusion,
                kind: LeafKind::ComputedUserset {
                    relation: name.clone(),
                },
            }))
        }
        [tupleset, computed] => {
            let relation = match entity.reference_kind(tupleset) {
                Some(RelationalReferenceKind::Relation) => &entity.relations[tupleset],
                _ => {
                    return Err(Error::UndefinedRelationReference {
                        reference: format!("{}#{}", entity_name, tupleset),
                    })
                }
            };
            // Walking needs a single unambiguous target entity type.
            let mut bare = relation
                .references
                .iter()
                .filter(|reference| reference.relation.is_none());
            let target_type = match (bare.next(), bare.next()) {
                (Some(reference), None) => &reference.entity_type,
                _ => {
                    return Err(Error::RelationReferenceMustHaveOneEntityReference {
                        relation: format!("{}#{}", entity_name, tupleset),
                    })
                }
            };
            let target = entities
                .get(target_type)
                .ok_or_else(|| Error::UndefinedRelationReference {
                    reference: target_type.clone(),
                })?;
            if target.reference_kind(computed).is_none() {
                return Err(Error::UndefinedRelationReference {
                    reference: format!("{}#{}", target_type, computed),
                });
            }
            Ok(Child::Leaf(Leaf {
                exclusion,
                kind: LeafKind::TupleToUserset {
                    tupleset: tupleset.clone(),
                    computed: computed.clone(),
                },
            }))
        }
        _ => Err(Error::NotSupportedRelationWalk {
            walk: segments.join("."),
        }),
    }
}

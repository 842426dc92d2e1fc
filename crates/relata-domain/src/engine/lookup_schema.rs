//! Lookup-schema engine: symbolic evaluation of action expressions
//! against an assumed set of relations.
//!
//! No tuples are read. A computed-userset leaf is satisfied when its
//! target is among the assumed relation names, or is an action whose own
//! expression evaluates satisfied; tuple-to-userset walks are unknown and
//! count as denied.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::instrument;

use crate::error::{Error, Result};
use crate::schema::{Child, EntityDefinition, LeafKind, RelationalReferenceKind, RewriteOperation};
use crate::storage::SchemaReader;

use super::types::{LookupSchemaRequest, LookupSchemaResponse, DEFAULT_CHECK_DEPTH};

/// Evaluates which actions an assumed relation set satisfies.
pub struct LookupSchemaEngine<S> {
    schema_reader: Arc<S>,
}

impl<S> LookupSchemaEngine<S>
where
    S: SchemaReader + 'static,
{
    pub fn new(schema_reader: Arc<S>) -> Self {
        Self { schema_reader }
    }

    #[instrument(skip_all, fields(
        tenant_id = %request.tenant_id,
        entity_type = %request.entity_type,
    ))]
    pub async fn execute(&self, request: &LookupSchemaRequest) -> Result<LookupSchemaResponse> {
        let version = match &request.schema_version {
            Some(version) => version.clone(),
            None => self.schema_reader.head_version(&request.tenant_id).await?,
        };
        let (definition, _) = self
            .schema_reader
            .read_schema_definition(&request.tenant_id, &request.entity_type, &version)
            .await?;

        let assumed: HashSet<&str> = request
            .relation_names
            .iter()
            .map(String::as_str)
            .collect();

        let mut action_names = Vec::new();
        for (name, action) in &definition.actions {
            if evaluate(&definition, &assumed, &action.child, DEFAULT_CHECK_DEPTH)? {
                action_names.push(name.clone());
            }
        }
        Ok(LookupSchemaResponse { action_names })
    }
}

fn evaluate(
    definition: &EntityDefinition,
    assumed: &HashSet<&str>,
    child: &Child,
    depth: u32,
) -> Result<bool> {
    if depth == 0 {
        return Err(Error::DepthExceeded);
    }
    match child {
        Child::Leaf(leaf) => {
            let satisfied = match &leaf.kind {
                LeafKind::ComputedUserset { relation } => {
                    match definition.reference_kind(relation) {
                        Some(RelationalReferenceKind::Action) => evaluate(
                            definition,
                            assumed,
                            &definition.action(relation)?.child,
                            depth - 1,
                        )?,
                        _ => assumed.contains(relation.as_str()),
                    }
                }
                // The walk would need tuples; unknown counts as denied.
                LeafKind::TupleToUserset { .. } => false,
            };
            Ok(if leaf.exclusion { !satisfied } else { satisfied })
        }
        Child::Rewrite(rewrite) => match rewrite.operation {
            RewriteOperation::Union => {
                for child in &rewrite.children {
                    if evaluate(definition, assumed, child, depth)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            RewriteOperation::Intersection => {
                for child in &rewrite.children {
                    if !evaluate(definition, assumed, child, depth)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            RewriteOperation::Exclusion => match rewrite.children.as_slice() {
                [base, subtract] => Ok(evaluate(definition, assumed, base, depth)?
                    && !evaluate(definition, assumed, subtract, depth)?),
                children => Err(Error::Internal {
                    message: format!(
                        "exclusion rewrite expects two children, found {}",
                        children.len()
                    ),
                }),
            },
        },
    }
}

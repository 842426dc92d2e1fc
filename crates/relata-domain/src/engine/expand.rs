//! Expand engine: the check walk materialized as a contribution tree.
//!
//! Children of a rewrite expand concurrently but keep their declaration
//! order, so the produced tree is deterministic for a given snapshot.
//! There is no depth budget here; cyclic schemas are the caller's
//! concern and storage errors propagate as errors.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::schema::{Child, LeafKind, RelationalReferenceKind, RewriteOperation};
use crate::storage::{RelationshipReader, SchemaReader};
use crate::tuple::{Entity, EntityAndRelation, Subject, TupleFilter};

use super::check::BoxFuture;
use super::types::{ExpandRequest, ExpandResponse, ExpandTree};

/// Materializes permission evaluation trees.
pub struct ExpandEngine<R, S> {
    relationship_reader: Arc<R>,
    schema_reader: Arc<S>,
}

#[derive(Clone)]
struct ExpandContext {
    tenant_id: String,
    snap_token: String,
    schema_version: String,
}

impl<R, S> ExpandEngine<R, S>
where
    R: RelationshipReader + 'static,
    S: SchemaReader + 'static,
{
    pub fn new(relationship_reader: Arc<R>, schema_reader: Arc<S>) -> Self {
        Self {
            relationship_reader,
            schema_reader,
        }
    }

    /// Expands a permission into its contribution tree, resolving
    /// snapshot and schema version defaults from the tenant's head.
    #[instrument(skip_all, fields(
        tenant_id = %request.tenant_id,
        entity = %request.entity,
        permission = %request.permission,
    ))]
    pub async fn expand(&self, request: &ExpandRequest) -> Result<ExpandResponse> {
        let snap_token = match &request.snap_token {
            Some(token) => token.clone(),
            None => {
                self.relationship_reader
                    .head_snapshot(&request.tenant_id)
                    .await?
            }
        };
        let schema_version = match &request.schema_version {
            Some(version) => version.clone(),
            None => self.schema_reader.head_version(&request.tenant_id).await?,
        };

        let ctx = ExpandContext {
            tenant_id: request.tenant_id.clone(),
            snap_token,
            schema_version,
        };
        let tree = self
            .expand_target(ctx, request.entity.clone(), request.permission.clone(), false)
            .await?;
        Ok(ExpandResponse { tree })
    }

    /// Expands a relation or action of `entity`, recording `exclusion` on
    /// the produced node.
    fn expand_target(
        &self,
        ctx: ExpandContext,
        entity: Entity,
        permission: String,
        exclusion: bool,
    ) -> BoxFuture<'_, Result<ExpandTree>> {
        Box::pin(async move {
            let (definition, _) = self
                .schema_reader
                .read_schema_definition(&ctx.tenant_id, &entity.entity_type, &ctx.schema_version)
                .await?;

            match definition.reference_kind(&permission) {
                Some(RelationalReferenceKind::Relation) => {
                    self.expand_direct(&ctx, &entity, &permission, exclusion)
                        .await
                }
                Some(RelationalReferenceKind::Action) => {
                    let child = definition.action(&permission)?.child.clone();
                    self.expand_rewrite(ctx.clone(), entity.clone(), child, exclusion)
                        .await
                }
                None => Err(Error::UndefinedRelationReference {
                    reference: format!("{}#{}", entity.entity_type, permission),
                }),
            }
        })
    }

    fn expand_rewrite(
        &self,
        ctx: ExpandContext,
        entity: Entity,
        child: Child,
        exclusion: bool,
    ) -> BoxFuture<'_, Result<ExpandTree>> {
        Box::pin(async move {
            match child {
                Child::Leaf(leaf) => {
                    // A doubly-negated leaf cancels out, hence xor.
                    let flagged = exclusion ^ leaf.exclusion;
                    match leaf.kind {
                        LeafKind::ComputedUserset { relation } => {
                            self.expand_target(ctx, entity, relation, flagged).await
                        }
                        LeafKind::TupleToUserset { tupleset, computed } => {
                            self.expand_tuple_to_userset(&ctx, &entity, &tupleset, &computed, flagged)
                                .await
                        }
                    }
                }
                Child::Rewrite(rewrite) => {
                    let children = try_join_all(rewrite.children.into_iter().map(|child| {
                        self.expand_rewrite(ctx.clone(), entity.clone(), child, false)
                    }))
                    .await?;
                    Ok(ExpandTree::Node {
                        exclusion,
                        operation: rewrite.operation,
                        children,
                    })
                }
            }
        })
    }

    /// Expands a relation's tuples: concrete subjects collect into a
    /// leaf, userset subjects expand recursively under a union.
    async fn expand_direct(
        &self,
        ctx: &ExpandContext,
        entity: &Entity,
        relation: &str,
        exclusion: bool,
    ) -> Result<ExpandTree> {
        let filter = TupleFilter::entity_relation(entity, relation);
        let tuples = self
            .relationship_reader
            .query_relationships(&ctx.tenant_id, &filter, &ctx.snap_token)
            .await?;

        let target = EntityAndRelation::new(entity.clone(), relation);
        let mut subjects = Vec::new();
        let mut expansions: Vec<BoxFuture<'_, Result<ExpandTree>>> = Vec::new();
        for tuple in tuples {
            match tuple.subject {
                Subject::Userset {
                    subject_type,
                    id,
                    relation,
                } => expansions.push(self.expand_target(
                    ctx.clone(),
                    Entity::new(subject_type, id),
                    relation,
                    false,
                )),
                concrete => subjects.push(concrete),
            }
        }

        if expansions.is_empty() {
            return Ok(ExpandTree::Leaf {
                exclusion,
                target,
                subjects,
            });
        }

        let mut children = vec![ExpandTree::Leaf {
            exclusion: false,
            target,
            subjects,
        }];
        children.extend(try_join_all(expansions).await?);
        Ok(ExpandTree::Node {
            exclusion,
            operation: RewriteOperation::Union,
            children,
        })
    }

    /// Expands a tuple-to-userset leaf: one child per linked entity,
    /// combined under a union.
    async fn expand_tuple_to_userset(
        &self,
        ctx: &ExpandContext,
        entity: &Entity,
        tupleset: &str,
        computed: &str,
        exclusion: bool,
    ) -> Result<ExpandTree> {
        let filter = TupleFilter::entity_relation(entity, tupleset);
        let tuples = self
            .relationship_reader
            .query_relationships(&ctx.tenant_id, &filter, &ctx.snap_token)
            .await?;

        let children = try_join_all(tuples.map(|tuple| {
            self.expand_target(
                ctx.clone(),
                tuple.subject.entity(),
                computed.to_string(),
                false,
            )
        }))
        .await?;

        Ok(ExpandTree::Node {
            exclusion,
            operation: RewriteOperation::Union,
            children,
        })
    }
}

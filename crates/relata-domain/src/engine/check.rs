//! Check engine: concurrent evaluation of action expressions under a
//! snapshot.
//!
//! Union and intersection rewrites fan their children out over
//! `FuturesUnordered` and short-circuit on the first decisive result;
//! dropping the remaining futures is the sibling cancellation. Exclusion
//! settles both arms and only propagates an arm's error when its value
//! would have been needed. Storage errors abort the whole check
//! unchanged. The depth budget decrements on every recursive check;
//! exhaustion surfaces as `Denied` at the public boundary and is tagged
//! in traces.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, instrument, warn};

use crate::cache::{CheckResultCache, NoopCheckCache};
use crate::error::{Error, Result};
use crate::schema::{Child, LeafKind, RelationalReferenceKind, RewriteOperation};
use crate::storage::{RelationshipReader, SchemaReader};
use crate::tuple::{Entity, Subject, TupleFilter};

use super::types::{CheckRequest, CheckResponse, Decision};

/// Boxed future for async recursion.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Evaluates permission checks against a snapshot of the tuple store.
pub struct CheckEngine<R, S> {
    relationship_reader: Arc<R>,
    schema_reader: Arc<S>,
    cache: Arc<dyn CheckResultCache>,
}

/// Per-request state threaded through the recursion. The depth budget is
/// per path; `min_remaining` records the tightest budget any path saw so
/// the response can report it.
#[derive(Clone)]
struct CheckContext {
    tenant_id: String,
    snap_token: String,
    schema_version: String,
    subject: Subject,
    min_remaining: Arc<AtomicU32>,
}

impl<R, S> CheckEngine<R, S>
where
    R: RelationshipReader + 'static,
    S: SchemaReader + 'static,
{
    /// Creates a check engine with caching disabled.
    pub fn new(relationship_reader: Arc<R>, schema_reader: Arc<S>) -> Self {
        Self::with_cache(relationship_reader, schema_reader, Arc::new(NoopCheckCache))
    }

    /// Creates a check engine with the given decision cache.
    pub fn with_cache(
        relationship_reader: Arc<R>,
        schema_reader: Arc<S>,
        cache: Arc<dyn CheckResultCache>,
    ) -> Self {
        Self {
            relationship_reader,
            schema_reader,
            cache,
        }
    }

    /// Answers a permission check, resolving snapshot and schema version
    /// defaults from the tenant's head.
    #[instrument(skip_all, fields(
        tenant_id = %request.tenant_id,
        entity = %request.entity,
        permission = %request.permission,
        subject = %request.subject,
    ))]
    pub async fn check(&self, request: &CheckRequest) -> Result<CheckResponse> {
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

        let ctx = CheckContext {
            tenant_id: request.tenant_id.clone(),
            snap_token,
            schema_version,
            subject: request.subject.clone(),
            min_remaining: Arc::new(AtomicU32::new(request.depth)),
        };

        let walk = self.check_internal(
            ctx.clone(),
            request.entity.clone(),
            request.permission.clone(),
            request.depth,
        );
        match walk.await {
            Ok(decision) => Ok(CheckResponse {
                decision,
                remaining_depth: ctx.min_remaining.load(Ordering::Relaxed),
            }),
            Err(Error::DepthExceeded) => {
                warn!(code = "DEPTH_EXCEEDED", "check denied: depth budget exhausted");
                Ok(CheckResponse {
                    decision: Decision::Denied,
                    remaining_depth: 0,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// One recursive check node: consult the cache, dispatch on whether
    /// the permission is a relation or an action, store the decision.
    fn check_internal(
        &self,
        ctx: CheckContext,
        entity: Entity,
        permission: String,
        depth: u32,
    ) -> BoxFuture<'_, Result<Decision>> {
        Box::pin(async move {
            if depth == 0 {
                return Err(Error::DepthExceeded);
            }
            let remaining = depth - 1;
            ctx.min_remaining.fetch_min(remaining, Ordering::Relaxed);

            let probe = cache_request(&ctx, &entity, &permission);
            if let Some(decision) = self.cache.get(&probe).await {
                debug!(entity = %entity, permission = %permission, "check cache hit");
                return Ok(decision);
            }

            let (definition, _) = self
                .schema_reader
                .read_schema_definition(&ctx.tenant_id, &entity.entity_type, &ctx.schema_version)
                .await?;

            let decision = match definition.reference_kind(&permission) {
                Some(RelationalReferenceKind::Relation) => {
                    self.check_direct(&ctx, &entity, &permission, remaining)
                        .await?
                }
                Some(RelationalReferenceKind::Action) => {
                    let child = definition.action(&permission)?.child.clone();
                    self.check_rewrite(ctx.clone(), entity.clone(), child, remaining)
                        .await?
                }
                None => {
                    return Err(Error::UndefinedRelationReference {
                        reference: format!("{}#{}", entity.entity_type, permission),
                    })
                }
            };

            self.cache.set(&probe, decision).await;
            Ok(decision)
        })
    }

    /// Direct relation check: a tuple whose subject equals the query
    /// subject decides immediately; userset subjects recurse, combined
    /// with union.
    async fn check_direct(
        &self,
        ctx: &CheckContext,
        entity: &Entity,
        relation: &str,
        depth: u32,
    ) -> Result<Decision> {
        let filter = TupleFilter::entity_relation(entity, relation);
        let tuples = self
            .relationship_reader
            .query_relationships(&ctx.tenant_id, &filter, &ctx.snap_token)
            .await?;

        let mut sub_checks: Vec<BoxFuture<'_, Result<Decision>>> = Vec::new();
        for tuple in tuples {
            if tuple.subject == ctx.subject {
                return Ok(Decision::Allowed);
            }
            if let Subject::Userset { relation, .. } = &tuple.subject {
                sub_checks.push(self.check_internal(
                    ctx.clone(),
                    tuple.subject.entity(),
                    relation.clone(),
                    depth,
                ));
            }
        }

        if sub_checks.is_empty() {
            return Ok(Decision::Denied);
        }
        union(sub_checks).await
    }

    /// Walk `tupleset` one hop and evaluate `computed` on every linked
    /// entity, combined with union.
    async fn check_tuple_to_userset(
        &self,
        ctx: &CheckContext,
        entity: &Entity,
        tupleset: &str,
        computed: &str,
        depth: u32,
    ) -> Result<Decision> {
        let filter = TupleFilter::entity_relation(entity, tupleset);
        let tuples = self
            .relationship_reader
            .query_relationships(&ctx.tenant_id, &filter, &ctx.snap_token)
            .await?;

        let sub_checks: Vec<BoxFuture<'_, Result<Decision>>> = tuples
            .map(|tuple| {
                self.check_internal(
                    ctx.clone(),
                    tuple.subject.entity(),
                    computed.to_string(),
                    depth,
                )
            })
            .collect();

        if sub_checks.is_empty() {
            return Ok(Decision::Denied);
        }
        union(sub_checks).await
    }

    fn check_rewrite(
        &self,
        ctx: CheckContext,
        entity: Entity,
        child: Child,
        depth: u32,
    ) -> BoxFuture<'_, Result<Decision>> {
        Box::pin(async move {
            match child {
                Child::Leaf(leaf) => {
                    let decision = match &leaf.kind {
                        LeafKind::ComputedUserset { relation } => {
                            self.check_internal(
                                ctx.clone(),
                                entity.clone(),
                                relation.clone(),
                                depth,
                            )
                            .await?
                        }
                        LeafKind::TupleToUserset { tupleset, computed } => {
                            self.check_tuple_to_userset(&ctx, &entity, tupleset, computed, depth)
                                .await?
                        }
                    };
                    Ok(if leaf.exclusion {
                        decision.inverted()
                    } else {
                        decision
                    })
                }
                Child::Rewrite(rewrite) => {
                    let children: Vec<BoxFuture<'_, Result<Decision>>> = rewrite
                        .children
                        .into_iter()
                        .map(|child| {
                            self.check_rewrite(ctx.clone(), entity.clone(), child, depth)
                        })
                        .collect();
                    match rewrite.operation {
                        RewriteOperation::Union => union(children).await,
                        RewriteOperation::Intersection => intersection(children).await,
                        RewriteOperation::Exclusion => exclusion(children).await,
                    }
                }
            }
        })
    }
}

fn cache_request(ctx: &CheckContext, entity: &Entity, permission: &str) -> CheckRequest {
    CheckRequest::new(
        ctx.tenant_id.clone(),
        entity.clone(),
        permission,
        ctx.subject.clone(),
    )
    .with_snap_token(ctx.snap_token.clone())
    .with_schema_version(ctx.schema_version.clone())
}

/// Any allowed child decides; siblings are cancelled by dropping their
/// futures. Errors propagate immediately.
async fn union(children: Vec<BoxFuture<'_, Result<Decision>>>) -> Result<Decision> {
    let mut pending: FuturesUnordered<_> = children.into_iter().collect();
    while let Some(result) = pending.next().await {
        if result?.is_allowed() {
            return Ok(Decision::Allowed);
        }
    }
    Ok(Decision::Denied)
}

/// Any denied child decides; siblings are cancelled by dropping their
/// futures. Errors propagate immediately.
async fn intersection(children: Vec<BoxFuture<'_, Result<Decision>>>) -> Result<Decision> {
    let mut pending: FuturesUnordered<_> = children.into_iter().collect();
    while let Some(result) = pending.next().await {
        if !result?.is_allowed() {
            return Ok(Decision::Denied);
        }
    }
    Ok(Decision::Allowed)
}

/// Binary set difference: allowed iff the base allows and the subtraction
/// denies. An errored arm only propagates when its value is needed.
async fn exclusion(mut children: Vec<BoxFuture<'_, Result<Decision>>>) -> Result<Decision> {
    if children.len() != 2 {
        return Err(Error::Internal {
            message: format!(
                "exclusion rewrite expects two children, found {}",
                children.len()
            ),
        });
    }
    let subtract = children.pop().expect("two children");
    let base = children.pop().expect("two children");
    match future::join(base, subtract).await {
        (Ok(Decision::Denied), _) => Ok(Decision::Denied),
        (_, Ok(Decision::Allowed)) => Ok(Decision::Denied),
        (Ok(Decision::Allowed), Ok(Decision::Denied)) => Ok(Decision::Allowed),
        (Ok(Decision::Allowed), Err(err)) => Err(err),
        (Err(err), _) => Err(err),
    }
}

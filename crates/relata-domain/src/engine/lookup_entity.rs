//! Lookup-entity engine: bounded parallel checks across candidate
//! entities.
//!
//! Candidates come from the distinct entity ids the store has seen for
//! the type; each candidate runs through the check engine inside a
//! `buffer_unordered` worker pool. The streaming mode feeds a bounded
//! channel, so a slow consumer backpressures the pool; dropping the
//! receiver cancels outstanding work.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::error::Result;
use crate::storage::{RelationshipReader, SchemaReader};
use crate::tuple::Entity;

use super::check::CheckEngine;
use super::types::{CheckRequest, LookupEntityRequest, LookupEntityResponse};

/// Fan-out limits for lookup-entity.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Maximum checks in flight at once.
    pub concurrency_limit: usize,
    /// Capacity of the streaming result channel.
    pub channel_capacity: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 100,
            channel_capacity: 100,
        }
    }
}

impl LookupConfig {
    pub fn with_concurrency_limit(mut self, concurrency_limit: usize) -> Self {
        self.concurrency_limit = concurrency_limit.max(1);
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity.max(1);
        self
    }
}

/// Enumerates entities of a type on which a subject holds a permission.
pub struct LookupEntityEngine<R, S> {
    check_engine: Arc<CheckEngine<R, S>>,
    relationship_reader: Arc<R>,
    schema_reader: Arc<S>,
    config: LookupConfig,
}

impl<R, S> LookupEntityEngine<R, S>
where
    R: RelationshipReader + 'static,
    S: SchemaReader + 'static,
{
    pub fn new(
        check_engine: Arc<CheckEngine<R, S>>,
        relationship_reader: Arc<R>,
        schema_reader: Arc<S>,
    ) -> Self {
        Self::with_config(
            check_engine,
            relationship_reader,
            schema_reader,
            LookupConfig::default(),
        )
    }

    pub fn with_config(
        check_engine: Arc<CheckEngine<R, S>>,
        relationship_reader: Arc<R>,
        schema_reader: Arc<S>,
        config: LookupConfig,
    ) -> Self {
        Self {
            check_engine,
            relationship_reader,
            schema_reader,
            config,
        }
    }

    /// Batched lookup: collects every allowed id. Order is unspecified.
    #[instrument(skip_all, fields(
        tenant_id = %request.tenant_id,
        entity_type = %request.entity_type,
        permission = %request.permission,
        subject = %request.subject,
    ))]
    pub async fn execute(&self, request: &LookupEntityRequest) -> Result<LookupEntityResponse> {
        let request = self.resolve_defaults(request).await?;
        let ids = self
            .relationship_reader
            .get_unique_entity_ids_by_entity_type(
                &request.tenant_id,
                &request.entity_type,
                request.snap_token.as_deref().unwrap_or_default(),
            )
            .await?;

        let mut checks = stream::iter(ids.into_iter().map(|id| {
            let check = check_request(&request, &id);
            let engine = &self.check_engine;
            async move {
                let response = engine.check(&check).await?;
                Ok::<_, crate::error::Error>((id, response.decision))
            }
        }))
        .buffer_unordered(self.config.concurrency_limit);

        let mut entity_ids = Vec::new();
        while let Some(result) = checks.next().await {
            let (id, decision) = result?;
            if decision.is_allowed() {
                entity_ids.push(id);
            }
        }
        Ok(LookupEntityResponse { entity_ids })
    }

    /// Streaming lookup: allowed ids are sent as their checks resolve.
    /// The first error is delivered on the channel and ends the stream;
    /// the channel closes when the worker pool drains.
    #[instrument(skip_all, fields(
        tenant_id = %request.tenant_id,
        entity_type = %request.entity_type,
        permission = %request.permission,
    ))]
    pub async fn stream(
        &self,
        request: &LookupEntityRequest,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let request = self.resolve_defaults(request).await?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let engine = Arc::clone(&self.check_engine);
        let reader = Arc::clone(&self.relationship_reader);
        let concurrency_limit = self.config.concurrency_limit;

        tokio::spawn(async move {
            let ids = match reader
                .get_unique_entity_ids_by_entity_type(
                    &request.tenant_id,
                    &request.entity_type,
                    request.snap_token.as_deref().unwrap_or_default(),
                )
                .await
            {
                Ok(ids) => ids,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };

            let mut checks = stream::iter(ids.into_iter().map(|id| {
                let check = check_request(&request, &id);
                let engine = Arc::clone(&engine);
                async move {
                    let response = engine.check(&check).await?;
                    Ok::<_, crate::error::Error>((id, response.decision))
                }
            }))
            .buffer_unordered(concurrency_limit);

            while let Some(result) = checks.next().await {
                match result {
                    Ok((id, decision)) => {
                        if decision.is_allowed() && tx.send(Ok(id)).await.is_err() {
                            // Receiver dropped: caller cancelled.
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn resolve_defaults(&self, request: &LookupEntityRequest) -> Result<LookupEntityRequest> {
        let mut request = request.clone();
        if request.snap_token.is_none() {
            request.snap_token = Some(
                self.relationship_reader
                    .head_snapshot(&request.tenant_id)
                    .await?,
            );
        }
        if request.schema_version.is_none() {
            request.schema_version =
                Some(self.schema_reader.head_version(&request.tenant_id).await?);
        }
        Ok(request)
    }
}

fn check_request(request: &LookupEntityRequest, id: &str) -> CheckRequest {
    let mut check = CheckRequest::new(
        request.tenant_id.clone(),
        Entity::new(request.entity_type.clone(), id),
        request.permission.clone(),
        request.subject.clone(),
    )
    .with_depth(request.depth);
    check.snap_token = request.snap_token.clone();
    check.schema_version = request.schema_version.clone();
    check
}

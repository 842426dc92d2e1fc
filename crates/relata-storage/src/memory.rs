//! In-memory back end with MVCC-style row visibility.
//!
//! Rows carry the commit instant that created them and, once deleted,
//! the instant that expired them; readers filter by their snapshot, so a
//! reader holding an old token never observes later writes or deletes.
//! The commit clock is wall-clock nanoseconds monotonized against the
//! last issued instant. Taking a head snapshot consumes a clock tick so
//! later commits order strictly after it.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::instrument;
use ulid::{Generator, Ulid};

use relata_domain::error::{Error, Result};
use relata_domain::schema::{EntityDefinition, SchemaDefinition};
use relata_domain::storage::{
    ContinuousToken, Pagination, RelationshipReader, RelationshipWriter, SchemaReader,
    SchemaWriter,
};
use relata_domain::tuple::{Tuple, TupleCollection, TupleFilter, TupleIterator};

use crate::token::{decode_continuous_token, encode_continuous_token, TimestampSnapshot};

#[derive(Debug, Clone)]
struct TupleRow {
    id: u64,
    tuple: Tuple,
    created_at: u64,
    /// Commit instant of the delete; zero while live.
    expired_at: u64,
}

#[derive(Debug, Default)]
struct TenantShard {
    /// Append-only, so rows stay in id order.
    tuples: Vec<TupleRow>,
    /// Version to compiled schema, oldest first; ULID versions sort in
    /// creation order.
    schemas: BTreeMap<String, SchemaDefinition>,
}

/// In-memory implementation of the storage contract.
pub struct MemoryStore {
    shards: DashMap<String, TenantShard>,
    clock: AtomicU64,
    row_counter: AtomicU64,
    versions: Mutex<Generator>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
            clock: AtomicU64::new(0),
            row_counter: AtomicU64::new(0),
            versions: Mutex::new(Generator::new()),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Issues the next commit instant: wall-clock nanoseconds, bumped
    /// past the previously issued instant when the clock stalls.
    fn next_commit_instant(&self) -> u64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        let previous = self
            .clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .expect("clock update always succeeds");
        now.max(previous + 1)
    }

    fn next_version(&self) -> String {
        let mut generator = self.versions.lock().expect("not poisoned");
        generator
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string()
    }
}

#[async_trait]
impl RelationshipReader for MemoryStore {
    async fn head_snapshot(&self, _tenant_id: &str) -> Result<String> {
        Ok(TimestampSnapshot::new(self.next_commit_instant()).encode())
    }

    #[instrument(skip(self, filter))]
    async fn query_relationships(
        &self,
        tenant_id: &str,
        filter: &TupleFilter,
        snap_token: &str,
    ) -> Result<TupleIterator> {
        let snapshot = TimestampSnapshot::decode(snap_token)?;
        let matching = match self.shards.get(tenant_id) {
            Some(shard) => shard
                .tuples
                .iter()
                .filter(|row| snapshot.visible(row.created_at, row.expired_at))
                .filter(|row| filter.matches(&row.tuple))
                .map(|row| row.tuple.clone())
                .collect(),
            None => Vec::new(),
        };
        Ok(TupleCollection::new(matching).into_iterator())
    }

    async fn read_relationships(
        &self,
        tenant_id: &str,
        filter: &TupleFilter,
        snap_token: &str,
        pagination: &Pagination,
    ) -> Result<(TupleCollection, ContinuousToken)> {
        let snapshot = TimestampSnapshot::decode(snap_token)?;
        let lower_bound = match &pagination.token {
            Some(token) => decode_continuous_token(token)?,
            None => 0,
        };
        let page_size = pagination.page_size as usize;

        let mut page: Vec<(u64, Tuple)> = Vec::with_capacity(page_size);
        if let Some(shard) = self.shards.get(tenant_id) {
            for row in shard
                .tuples
                .iter()
                .filter(|row| row.id >= lower_bound)
                .filter(|row| snapshot.visible(row.created_at, row.expired_at))
                .filter(|row| filter.matches(&row.tuple))
            {
                if page.len() == page_size {
                    return Ok((
                        TupleCollection::new(page.into_iter().map(|(_, tuple)| tuple).collect()),
                        ContinuousToken::new(encode_continuous_token(row.id)),
                    ));
                }
                page.push((row.id, row.tuple.clone()));
            }
        }
        Ok((
            TupleCollection::new(page.into_iter().map(|(_, tuple)| tuple).collect()),
            ContinuousToken::noop(),
        ))
    }

    async fn get_unique_entity_ids_by_entity_type(
        &self,
        tenant_id: &str,
        entity_type: &str,
        snap_token: &str,
    ) -> Result<Vec<String>> {
        let snapshot = TimestampSnapshot::decode(snap_token)?;
        let mut seen = HashSet::new();
        let ids = match self.shards.get(tenant_id) {
            Some(shard) => shard
                .tuples
                .iter()
                .filter(|row| snapshot.visible(row.created_at, row.expired_at))
                .filter(|row| row.tuple.entity.entity_type == entity_type)
                .filter_map(|row| {
                    seen.insert(row.tuple.entity.id.clone())
                        .then(|| row.tuple.entity.id.clone())
                })
                .collect(),
            None => Vec::new(),
        };
        Ok(ids)
    }
}

#[async_trait]
impl RelationshipWriter for MemoryStore {
    #[instrument(skip(self, tuples), fields(count = tuples.len()))]
    async fn write_relationships(
        &self,
        tenant_id: &str,
        tuples: Vec<Tuple>,
        _snap_token: &str,
    ) -> Result<String> {
        let instant = self.next_commit_instant();
        let mut shard = self.shards.entry(tenant_id.to_string()).or_default();
        for tuple in tuples {
            let id = self.row_counter.fetch_add(1, Ordering::SeqCst) + 1;
            shard.tuples.push(TupleRow {
                id,
                tuple,
                created_at: instant,
                expired_at: 0,
            });
        }
        Ok(TimestampSnapshot::new(instant).encode())
    }

    #[instrument(skip(self, filter))]
    async fn delete_relationships(&self, tenant_id: &str, filter: &TupleFilter) -> Result<String> {
        let instant = self.next_commit_instant();
        if let Some(mut shard) = self.shards.get_mut(tenant_id) {
            for row in shard
                .tuples
                .iter_mut()
                .filter(|row| row.expired_at == 0)
            {
                if filter.matches(&row.tuple) {
                    row.expired_at = instant;
                }
            }
        }
        Ok(TimestampSnapshot::new(instant).encode())
    }
}

#[async_trait]
impl SchemaReader for MemoryStore {
    async fn read_schema_definition(
        &self,
        tenant_id: &str,
        entity_type: &str,
        version: &str,
    ) -> Result<(EntityDefinition, String)> {
        let shard = self.shards.get(tenant_id).ok_or_else(|| Error::NotFound {
            what: format!("tenant '{}'", tenant_id),
        })?;
        let definition = shard.schemas.get(version).ok_or_else(|| Error::NotFound {
            what: format!("schema version '{}'", version),
        })?;
        Ok((definition.entity(entity_type)?.clone(), version.to_string()))
    }

    async fn head_version(&self, tenant_id: &str) -> Result<String> {
        self.shards
            .get(tenant_id)
            .and_then(|shard| shard.schemas.last_key_value().map(|(version, _)| version.clone()))
            .ok_or_else(|| Error::NotFound {
                what: format!("schema for tenant '{}'", tenant_id),
            })
    }
}

#[async_trait]
impl SchemaWriter for MemoryStore {
    #[instrument(skip(self, definition))]
    async fn write_schema(&self, tenant_id: &str, definition: SchemaDefinition) -> Result<String> {
        let version = self.next_version();
        let mut shard = self.shards.entry(tenant_id.to_string()).or_default();
        shard.schemas.insert(version.clone(), definition);
        Ok(version)
    }
}

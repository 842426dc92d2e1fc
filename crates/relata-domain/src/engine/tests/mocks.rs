//! Instrumented fixture store implementing the storage contract.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::schema::{compile_source, EntityDefinition, SchemaDefinition};
use crate::storage::{ContinuousToken, Pagination, RelationshipReader, SchemaReader};
use crate::tuple::{Tuple, TupleCollection, TupleFilter, TupleIterator};

pub const SNAP: &str = "snap-1";
pub const VERSION: &str = "v1";

/// Fixed-content store that counts and records tuple queries, with
/// optional per-relation delays and injected failures.
pub struct FixtureStore {
    schema: SchemaDefinition,
    tuples: Vec<Tuple>,
    query_count: AtomicUsize,
    queried_relations: Mutex<Vec<String>>,
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
}

impl FixtureStore {
    pub fn new(schema_source: &str, tuples: &[&str]) -> Self {
        Self {
            schema: compile_source(schema_source).expect("fixture schema compiles"),
            tuples: tuples
                .iter()
                .map(|tuple| Tuple::parse(tuple).expect("fixture tuple parses"))
                .collect(),
            query_count: AtomicUsize::new(0),
            queried_relations: Mutex::new(Vec::new()),
            delays: HashMap::new(),
            failures: HashSet::new(),
        }
    }

    /// Delays queries for `relation` before they are recorded, so a
    /// cancelled branch leaves no trace in the counters.
    pub fn with_delay(mut self, relation: &str, delay: Duration) -> Self {
        self.delays.insert(relation.to_string(), delay);
        self
    }

    /// Makes queries for `relation` fail with a storage error.
    pub fn with_failure(mut self, relation: &str) -> Self {
        self.failures.insert(relation.to_string());
        self
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    pub fn queried_relations(&self) -> Vec<String> {
        self.queried_relations.lock().expect("not poisoned").clone()
    }
}

#[async_trait]
impl RelationshipReader for FixtureStore {
    async fn head_snapshot(&self, _tenant_id: &str) -> Result<String> {
        Ok(SNAP.to_string())
    }

    async fn query_relationships(
        &self,
        _tenant_id: &str,
        filter: &TupleFilter,
        _snap_token: &str,
    ) -> Result<TupleIterator> {
        if let Some(delay) = self.delays.get(filter.relation.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(filter.relation.as_str()) {
            return Err(Error::Execution);
        }
        self.query_count.fetch_add(1, Ordering::SeqCst);
        self.queried_relations
            .lock()
            .expect("not poisoned")
            .push(filter.relation.clone());

        let matching: Vec<Tuple> = self
            .tuples
            .iter()
            .filter(|tuple| filter.matches(tuple))
            .cloned()
            .collect();
        Ok(TupleCollection::new(matching).into_iterator())
    }

    async fn read_relationships(
        &self,
        tenant_id: &str,
        filter: &TupleFilter,
        snap_token: &str,
        _pagination: &Pagination,
    ) -> Result<(TupleCollection, ContinuousToken)> {
        let tuples: Vec<Tuple> = self
            .query_relationships(tenant_id, filter, snap_token)
            .await?
            .collect();
        Ok((TupleCollection::new(tuples), ContinuousToken::noop()))
    }

    async fn get_unique_entity_ids_by_entity_type(
        &self,
        _tenant_id: &str,
        entity_type: &str,
        _snap_token: &str,
    ) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        Ok(self
            .tuples
            .iter()
            .filter(|tuple| tuple.entity.entity_type == entity_type)
            .filter_map(|tuple| {
                seen.insert(tuple.entity.id.clone())
                    .then(|| tuple.entity.id.clone())
            })
            .collect())
    }
}

#[async_trait]
impl SchemaReader for FixtureStore {
    async fn read_schema_definition(
        &self,
        _tenant_id: &str,
        entity_type: &str,
        version: &str,
    ) -> Result<(EntityDefinition, String)> {
        Ok((self.schema.entity(entity_type)?.clone(), version.to_string()))
    }

    async fn head_version(&self, _tenant_id: &str) -> Result<String> {
        Ok(VERSION.to_string())
    }
}

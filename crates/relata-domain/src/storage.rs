//! Storage contract consumed by the engines.
//!
//! Back ends implement these traits; the engines never branch on back-end
//! identity. Snapshot tokens and schema versions travel as opaque encoded
//! strings: ordering and visibility are the back end's concern, the
//! engines only thread them through.

use async_trait::async_trait;

use crate::error::Result;
use crate::schema::{EntityDefinition, SchemaDefinition};
use crate::tuple::{Tuple, TupleCollection, TupleFilter, TupleIterator};

/// Page request for [`RelationshipReader::read_relationships`].
#[derive(Debug, Clone)]
pub struct Pagination {
    pub page_size: u32,
    pub token: Option<String>,
}

impl Pagination {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Opaque continuation handle returned by paginated reads. Presence of a
/// value signals more results are available.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuousToken(Option<String>);

impl ContinuousToken {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(Some(encoded.into()))
    }

    /// A token signalling the end of the result set.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_noop(&self) -> bool {
        self.0.is_none()
    }
}

/// Read access to relation tuples under a consistent snapshot.
#[async_trait]
pub trait RelationshipReader: Send + Sync {
    /// Returns the encoded snapshot token for the tenant's current head.
    async fn head_snapshot(&self, tenant_id: &str) -> Result<String>;

    /// Streams tuples matching the filter as visible under `snap_token`.
    async fn query_relationships(
        &self,
        tenant_id: &str,
        filter: &TupleFilter,
        snap_token: &str,
    ) -> Result<TupleIterator>;

    /// Reads one page of tuples matching the filter, with a continuation
    /// token when more remain.
    async fn read_relationships(
        &self,
        tenant_id: &str,
        filter: &TupleFilter,
        snap_token: &str,
        pagination: &Pagination,
    ) -> Result<(TupleCollection, ContinuousToken)>;

    /// Returns the distinct entity ids of `entity_type` visible under
    /// `snap_token`.
    async fn get_unique_entity_ids_by_entity_type(
        &self,
        tenant_id: &str,
        entity_type: &str,
        snap_token: &str,
    ) -> Result<Vec<String>>;
}

/// Write access to relation tuples.
#[async_trait]
pub trait RelationshipWriter: Send + Sync {
    /// Inserts tuples, returning the snapshot token of the commit.
    async fn write_relationships(
        &self,
        tenant_id: &str,
        tuples: Vec<Tuple>,
        snap_token: &str,
    ) -> Result<String>;

    /// Deletes tuples matching the filter, returning the snapshot token
    /// of the commit.
    async fn delete_relationships(&self, tenant_id: &str, filter: &TupleFilter) -> Result<String>;
}

/// Read access to compiled schema definitions.
#[async_trait]
pub trait SchemaReader: Send + Sync {
    /// Reads one entity definition at a schema version; returns the
    /// definition and the version actually served.
    async fn read_schema_definition(
        &self,
        tenant_id: &str,
        entity_type: &str,
        version: &str,
    ) -> Result<(EntityDefinition, String)>;

    /// Returns the tenant's latest schema version.
    async fn head_version(&self, tenant_id: &str) -> Result<String>;
}

/// Write access to compiled schema definitions.
#[async_trait]
pub trait SchemaWriter: Send + Sync {
    /// Stores a compiled schema as a new version and returns it.
    async fn write_schema(&self, tenant_id: &str, definition: SchemaDefinition) -> Result<String>;
}

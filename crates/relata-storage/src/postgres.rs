//! PostgreSQL back end.
//!
//! Tuples are never updated in place: writes allocate a row in the
//! `transactions` table and stamp `created_tx_id`, deletes stamp
//! `expired_tx_id`. Reads run in `REPEATABLE READ` read-only
//! transactions and filter rows through the snapshot predicate, so a
//! holder of an old token keeps a consistent view. Compiled entity
//! definitions are stored as serialized JSON per (tenant, version,
//! entity).

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, error, instrument};
use ulid::Ulid;

use relata_domain::error::{Error, Result};
use relata_domain::schema::{EntityDefinition, SchemaDefinition};
use relata_domain::storage::{
    ContinuousToken, Pagination, RelationshipReader, RelationshipWriter, SchemaReader,
    SchemaWriter,
};
use relata_domain::tuple::{
    Entity, Subject, Tuple, TupleCollection, TupleFilter, TupleIterator, ELLIPSIS,
};

use crate::error::StorageError;
use crate::token::{decode_continuous_token, encode_continuous_token, TransactionSnapshot};

/// Connection options for [`PostgresStore`].
#[derive(Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/relata".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

/// PostgreSQL implementation of the storage contract.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_config(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(connection_failed)?;
        Ok(Self { pool })
    }

    pub async fn from_url(database_url: &str) -> Result<Self> {
        let config = PostgresConfig {
            database_url: database_url.to_string(),
            ..PostgresConfig::default()
        };
        Self::from_config(&config).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the tables and indexes the store relies on.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        debug!("running database migrations");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id BIGSERIAL PRIMARY KEY,
                tenant_id VARCHAR(128) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS relation_tuples (
                id BIGSERIAL PRIMARY KEY,
                tenant_id VARCHAR(128) NOT NULL,
                entity_type VARCHAR(255) NOT NULL,
                entity_id VARCHAR(255) NOT NULL,
                relation VARCHAR(255) NOT NULL,
                subject_type VARCHAR(255) NOT NULL,
                subject_id VARCHAR(255) NOT NULL,
                subject_relation VARCHAR(255) NOT NULL DEFAULT '',
                created_tx_id BIGINT NOT NULL,
                expired_tx_id BIGINT NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS schema_definitions (
                tenant_id VARCHAR(128) NOT NULL,
                version VARCHAR(64) NOT NULL,
                entity_name VARCHAR(255) NOT NULL,
                serialized TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                PRIMARY KEY (tenant_id, version, entity_name)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_transactions_tenant ON transactions (tenant_id, id)",
            "CREATE INDEX IF NOT EXISTS idx_tuples_entity ON relation_tuples (tenant_id, entity_type, entity_id, relation)",
            "CREATE INDEX IF NOT EXISTS idx_tuples_entity_type ON relation_tuples (tenant_id, entity_type)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(query_failed)?;
        }

        debug!("database migrations completed");
        Ok(())
    }

    /// Allocates a transaction row and returns its id.
    async fn begin_write_transaction(
        &self,
        tx: &mut sqlx::Transaction<'_, Postgres>,
        tenant_id: &str,
    ) -> Result<u64> {
        let txid: i64 =
            sqlx::query_scalar("INSERT INTO transactions (tenant_id) VALUES ($1) RETURNING id")
                .bind(tenant_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(query_failed)?;
        Ok(txid as u64)
    }
}

#[async_trait]
impl RelationshipReader for PostgresStore {
    async fn head_snapshot(&self, tenant_id: &str) -> Result<String> {
        let head: Option<i64> =
            sqlx::query_scalar("SELECT max(id) FROM transactions WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(query_failed)?;
        Ok(TransactionSnapshot::new(head.unwrap_or(0) as u64).encode())
    }

    #[instrument(skip(self, filter))]
    async fn query_relationships(
        &self,
        tenant_id: &str,
        filter: &TupleFilter,
        snap_token: &str,
    ) -> Result<TupleIterator> {
        let snapshot = TransactionSnapshot::decode(snap_token)?;

        let mut tx = self.pool.begin().await.map_err(query_failed)?;
        set_snapshot_isolation(&mut tx).await?;

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT entity_type, entity_id, relation, subject_type, subject_id, subject_relation \
             FROM relation_tuples WHERE tenant_id = ",
        );
        builder.push_bind(tenant_id);
        push_filter(&mut builder, filter);
        push_snapshot(&mut builder, &snapshot);

        let rows = builder
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(query_failed)?;
        tx.commit().await.map_err(query_failed)?;

        let mut collection = TupleCollection::default();
        for row in &rows {
            collection.add(row_to_tuple(row)?);
        }
        Ok(collection.into_iterator())
    }

    #[instrument(skip(self, filter, pagination))]
    async fn read_relationships(
        &self,
        tenant_id: &str,
        filter: &TupleFilter,
        snap_token: &str,
        pagination: &Pagination,
    ) -> Result<(TupleCollection, ContinuousToken)> {
        let snapshot = TransactionSnapshot::decode(snap_token)?;
        let page_size = pagination.page_size as usize;

        let mut tx = self.pool.begin().await.map_err(query_failed)?;
        set_snapshot_isolation(&mut tx).await?;

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT id, entity_type, entity_id, relation, subject_type, subject_id, subject_relation \
             FROM relation_tuples WHERE tenant_id = ",
        );
        builder.push_bind(tenant_id);
        push_filter(&mut builder, filter);
        push_snapshot(&mut builder, &snapshot);
        if let Some(token) = &pagination.token {
            let lower_bound = decode_continuous_token(token)?;
            builder.push(" AND id >= ").push_bind(lower_bound as i64);
        }
        builder.push(" ORDER BY id LIMIT ");
        builder.push_bind(page_size as i64 + 1);

        let rows = builder
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(query_failed)?;
        tx.commit().await.map_err(query_failed)?;

        let mut collection = TupleCollection::default();
        for row in rows.iter().take(page_size) {
            collection.add(row_to_tuple(row)?);
        }
        let token = if rows.len() > page_size {
            let next_id: i64 = rows[page_size].try_get("id").map_err(decode_failed)?;
            ContinuousToken::new(encode_continuous_token(next_id as u64))
        } else {
            ContinuousToken::noop()
        };
        Ok((collection, token))
    }

    #[instrument(skip(self))]
    async fn get_unique_entity_ids_by_entity_type(
        &self,
        tenant_id: &str,
        entity_type: &str,
        snap_token: &str,
    ) -> Result<Vec<String>> {
        let snapshot = TransactionSnapshot::decode(snap_token)?;

        let mut tx = self.pool.begin().await.map_err(query_failed)?;
        set_snapshot_isolation(&mut tx).await?;

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT DISTINCT entity_id FROM relation_tuples WHERE tenant_id = ",
        );
        builder.push_bind(tenant_id);
        builder.push(" AND entity_type = ").push_bind(entity_type);
        push_snapshot(&mut builder, &snapshot);

        let rows = builder
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(query_failed)?;
        tx.commit().await.map_err(query_failed)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("entity_id").map_err(decode_failed))
            .collect()
    }
}

#[async_trait]
impl RelationshipWriter for PostgresStore {
    #[instrument(skip(self, tuples), fields(count = tuples.len()))]
    async fn write_relationships(
        &self,
        tenant_id: &str,
        tuples: Vec<Tuple>,
        _snap_token: &str,
    ) -> Result<String> {
        let mut tx = self.pool.begin().await.map_err(query_failed)?;
        let txid = self.begin_write_transaction(&mut tx, tenant_id).await?;

        if !tuples.is_empty() {
            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO relation_tuples (tenant_id, entity_type, entity_id, relation, \
                 subject_type, subject_id, subject_relation, created_tx_id) ",
            );
            builder.push_values(tuples.iter(), |mut values, tuple| {
                values
                    .push_bind(tenant_id)
                    .push_bind(tuple.entity.entity_type.clone())
                    .push_bind(tuple.entity.id.clone())
                    .push_bind(tuple.relation.clone())
                    .push_bind(tuple.subject.subject_type().to_string())
                    .push_bind(tuple.subject.id().to_string())
                    .push_bind(tuple.subject.relation().unwrap_or_default().to_string())
                    .push_bind(txid as i64);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(query_failed)?;
        }

        tx.commit().await.map_err(query_failed)?;
        Ok(TransactionSnapshot::new(txid).encode())
    }

    #[instrument(skip(self, filter))]
    async fn delete_relationships(&self, tenant_id: &str, filter: &TupleFilter) -> Result<String> {
        let mut tx = self.pool.begin().await.map_err(query_failed)?;
        let txid = self.begin_write_transaction(&mut tx, tenant_id).await?;

        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("UPDATE relation_tuples SET expired_tx_id = ");
        builder.push_bind(txid as i64);
        builder.push(" WHERE tenant_id = ").push_bind(tenant_id);
        builder.push(" AND expired_tx_id = 0");
        push_filter(&mut builder, filter);

        builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(query_failed)?;
        tx.commit().await.map_err(query_failed)?;
        Ok(TransactionSnapshot::new(txid).encode())
    }
}

#[async_trait]
impl SchemaReader for PostgresStore {
    async fn read_schema_definition(
        &self,
        tenant_id: &str,
        entity_type: &str,
        version: &str,
    ) -> Result<(EntityDefinition, String)> {
        let serialized: Option<String> = sqlx::query_scalar(
            "SELECT serialized FROM schema_definitions \
             WHERE tenant_id = $1 AND version = $2 AND entity_name = $3",
        )
        .bind(tenant_id)
        .bind(version)
        .bind(entity_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        let serialized = serialized.ok_or_else(|| Error::NotFound {
            what: format!("entity '{}' at schema version '{}'", entity_type, version),
        })?;
        let definition: EntityDefinition = serde_json::from_str(&serialized).map_err(|err| {
            error!(error = %err, "stored entity definition failed to deserialize");
            Error::from(StorageError::Serialization {
                message: err.to_string(),
            })
        })?;
        Ok((definition, version.to_string()))
    }

    async fn head_version(&self, tenant_id: &str) -> Result<String> {
        let version: Option<String> = sqlx::query_scalar(
            "SELECT version FROM schema_definitions WHERE tenant_id = $1 \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;
        version.ok_or_else(|| Error::NotFound {
            what: format!("schema for tenant '{}'", tenant_id),
        })
    }
}

#[async_trait]
impl SchemaWriter for PostgresStore {
    #[instrument(skip(self, definition))]
    async fn write_schema(&self, tenant_id: &str, definition: SchemaDefinition) -> Result<String> {
        let version = Ulid::new().to_string();
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        for (name, entity) in &definition.entities {
            let serialized = serde_json::to_string(entity).map_err(|err| {
                Error::from(StorageError::Serialization {
                    message: err.to_string(),
                })
            })?;
            sqlx::query(
                "INSERT INTO schema_definitions (tenant_id, version, entity_name, serialized) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(tenant_id)
            .bind(&version)
            .bind(name)
            .bind(serialized)
            .execute(&mut *tx)
            .await
            .map_err(query_failed)?;
        }

        tx.commit().await.map_err(query_failed)?;
        Ok(version)
    }
}

async fn set_snapshot_isolation(tx: &mut sqlx::Transaction<'_, Postgres>) -> Result<()> {
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut **tx)
        .await
        .map_err(query_failed)?;
    Ok(())
}

/// Appends the tuple filter as `AND` clauses; empty fields stay
/// unconstrained.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &TupleFilter) {
    if !filter.entity.entity_type.is_empty() {
        builder
            .push(" AND entity_type = ")
            .push_bind(filter.entity.entity_type.clone());
    }
    if !filter.entity.ids.is_empty() {
        builder
            .push(" AND entity_id = ANY(")
            .push_bind(filter.entity.ids.clone())
            .push(")");
    }
    if !filter.relation.is_empty() {
        builder
            .push(" AND relation = ")
            .push_bind(filter.relation.clone());
    }
    if !filter.subject.subject_type.is_empty() {
        builder
            .push(" AND subject_type = ")
            .push_bind(filter.subject.subject_type.clone());
    }
    if !filter.subject.ids.is_empty() {
        builder
            .push(" AND subject_id = ANY(")
            .push_bind(filter.subject.ids.clone())
            .push(")");
    }
    if !filter.subject.relation.is_empty() {
        if filter.subject.relation == ELLIPSIS {
            builder.push(" AND subject_relation = ''");
        } else {
            builder
                .push(" AND subject_relation = ")
                .push_bind(filter.subject.relation.clone());
        }
    }
}

/// Appends the snapshot visibility predicate.
fn push_snapshot(builder: &mut QueryBuilder<'_, Postgres>, snapshot: &TransactionSnapshot) {
    builder
        .push(" AND created_tx_id <= ")
        .push_bind(snapshot.txid as i64);
    if !snapshot.in_flight.is_empty() {
        let in_flight: Vec<i64> = snapshot.in_flight.iter().map(|txid| *txid as i64).collect();
        builder
            .push(" AND NOT (created_tx_id = ANY(")
            .push_bind(in_flight)
            .push("))");
    }
    builder
        .push(" AND (expired_tx_id = 0 OR expired_tx_id > ")
        .push_bind(snapshot.txid as i64)
        .push(")");
}

fn row_to_tuple(row: &PgRow) -> Result<Tuple> {
    let entity_type: String = row.try_get("entity_type").map_err(decode_failed)?;
    let entity_id: String = row.try_get("entity_id").map_err(decode_failed)?;
    let relation: String = row.try_get("relation").map_err(decode_failed)?;
    let subject_type: String = row.try_get("subject_type").map_err(decode_failed)?;
    let subject_id: String = row.try_get("subject_id").map_err(decode_failed)?;
    let subject_relation: String = row.try_get("subject_relation").map_err(decode_failed)?;

    let subject = if subject_relation.is_empty() || subject_relation == ELLIPSIS {
        Subject::concrete(subject_type, subject_id)
    } else {
        Subject::userset(subject_type, subject_id, subject_relation)
    };
    Ok(Tuple::new(Entity::new(entity_type, entity_id), relation, subject))
}

fn connection_failed(err: sqlx::Error) -> Error {
    error!(error = %err, "database connection failed");
    StorageError::Connection {
        message: err.to_string(),
    }
    .into()
}

fn query_failed(err: sqlx::Error) -> Error {
    error!(error = %err, "database query failed");
    StorageError::Query {
        message: err.to_string(),
    }
    .into()
}

fn decode_failed(err: sqlx::Error) -> Error {
    error!(error = %err, "row decode failed");
    StorageError::Decode {
        message: err.to_string(),
    }
    .into()
}

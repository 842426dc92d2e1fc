//! relata-storage: back ends for the relata authorization engine.
//!
//! Two implementations of the `relata-domain` storage contract:
//!
//! - [`MemoryStore`]: an in-memory index with MVCC row visibility, for
//!   tests and embedded use.
//! - [`PostgresStore`]: a relational store with transaction-id
//!   snapshots and `REPEATABLE READ` read transactions.
//!
//! The engines see both through the same traits and never branch on
//! back-end identity.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod token;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};

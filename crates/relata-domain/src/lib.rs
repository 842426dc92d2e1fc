//! relata-domain: core authorization domain logic.
//!
//! This crate contains the schema DSL pipeline, the tuple model, the
//! storage contract, and the evaluation engines:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                relata-domain                  │
//! ├───────────────────────────────────────────────┤
//! │  schema/   - DSL lexer, parser, compiler      │
//! │  tuple     - tuples, subjects, filters        │
//! │  storage   - reader/writer contract traits    │
//! │  engine/   - check, expand, lookup engines    │
//! │  cache     - check decision cache             │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Storage back ends implementing the contract live in `relata-storage`.

pub mod cache;
pub mod engine;
pub mod error;
pub mod schema;
pub mod storage;
pub mod tuple;

pub use engine::{
    CheckEngine, CheckRequest, CheckResponse, Decision, ExpandEngine, ExpandRequest,
    ExpandResponse, ExpandTree, LookupConfig, LookupEntityEngine, LookupEntityRequest,
    LookupEntityResponse, LookupSchemaEngine, LookupSchemaRequest, LookupSchemaResponse,
};
pub use error::{Error, ErrorCode, Result};
pub use schema::SchemaDefinition;
pub use tuple::{Entity, Subject, Tuple, TupleFilter};

//! The four engines: check, expand, lookup-entity, and lookup-schema.

pub mod check;
pub mod expand;
pub mod lookup_entity;
pub mod lookup_schema;
mod types;

#[cfg(test)]
mod tests;

pub use check::CheckEngine;
pub use expand::ExpandEngine;
pub use lookup_entity::{LookupConfig, LookupEntityEngine};
pub use lookup_schema::LookupSchemaEngine;
pub use types::{
    CheckRequest, CheckResponse, Decision, ExpandRequest, ExpandResponse, ExpandTree,
    LookupEntityRequest, LookupEntityResponse, LookupSchemaRequest, LookupSchemaResponse,
    DEFAULT_CHECK_DEPTH,
};

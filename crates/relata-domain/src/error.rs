//! Domain error types and the stable error-code enumeration.

use thiserror::Error;

/// Stable error codes surfaced to clients.
///
/// Storage back ends map their internal failures onto these codes; the
/// underlying driver text is logged, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UndefinedRelationReference,
    NotSupportedRelationWalk,
    RelationReferenceMustHaveOneEntityReference,
    RelationReferenceNotFoundInEntityReferences,
    DuplicateName,
    SchemaParse,
    DepthExceeded,
    Execution,
    InvalidContinuousToken,
    TypeConversion,
    SqlBuilder,
    NotFound,
    Cancelled,
    Internal,
}

impl ErrorCode {
    /// Returns the wire form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UndefinedRelationReference => "UNDEFINED_RELATION_REFERENCE",
            ErrorCode::NotSupportedRelationWalk => "NOT_SUPPORTED_RELATION_WALK",
            ErrorCode::RelationReferenceMustHaveOneEntityReference => {
                "RELATION_REFERENCE_MUST_HAVE_ONE_ENTITY_REFERENCE"
            }
            ErrorCode::RelationReferenceNotFoundInEntityReferences => {
                "RELATION_REFERENCE_NOT_FOUND_IN_ENTITY_REFERENCES"
            }
            ErrorCode::DuplicateName => "DUPLICATE_NAME",
            ErrorCode::SchemaParse => "SCHEMA_PARSE",
            ErrorCode::DepthExceeded => "DEPTH_EXCEEDED",
            ErrorCode::Execution => "EXECUTION",
            ErrorCode::InvalidContinuousToken => "INVALID_CONTINUOUS_TOKEN",
            ErrorCode::TypeConversion => "TYPE_CONVERSION",
            ErrorCode::SqlBuilder => "SQL_BUILDER",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the schema pipeline, the engines, and the storage
/// contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// An action expression or relation reference names something that
    /// does not exist.
    #[error("undefined relation reference: {reference}")]
    UndefinedRelationReference { reference: String },

    /// A tuple-to-userset walk of more than one hop (`a.b.c`).
    #[error("relation walk is limited to one hop: {walk}")]
    NotSupportedRelationWalk { walk: String },

    /// A relation carries more than one bare entity reference.
    #[error("relation '{relation}' must have exactly one bare entity reference")]
    RelationReferenceMustHaveOneEntityReference { relation: String },

    /// A reference of the form `entity#relation` where the target is not a
    /// relation of that entity.
    #[error("'{reference}' does not name a relation of entity '{entity}'")]
    RelationReferenceNotFoundInEntityReferences { entity: String, reference: String },

    /// Two members of the same scope share a name.
    #[error("duplicate name '{name}' in '{scope}'")]
    DuplicateName { scope: String, name: String },

    /// Lexer or parser rejection, with the byte offset of the offense.
    #[error("schema parse error at byte {position}: {message}")]
    SchemaParse { position: usize, message: String },

    /// Check recursion exhausted its depth budget.
    #[error("check depth exceeded")]
    DepthExceeded,

    /// A storage operation failed; detail is logged, not surfaced.
    #[error("storage execution failed")]
    Execution,

    /// A continuation token could not be decoded.
    #[error("invalid continuous token")]
    InvalidContinuousToken,

    /// A stored value could not be converted to its domain form.
    #[error("type conversion failed")]
    TypeConversion,

    /// Query construction failed before reaching the database.
    #[error("sql builder failed")]
    SqlBuilder,

    /// A requested tenant, schema, or entity definition does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// An internal invariant was violated; this is a bug.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns the stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::UndefinedRelationReference { .. } => ErrorCode::UndefinedRelationReference,
            Error::NotSupportedRelationWalk { .. } => ErrorCode::NotSupportedRelationWalk,
            Error::RelationReferenceMustHaveOneEntityReference { .. } => {
                ErrorCode::RelationReferenceMustHaveOneEntityReference
            }
            Error::RelationReferenceNotFoundInEntityReferences { .. } => {
                ErrorCode::RelationReferenceNotFoundInEntityReferences
            }
            Error::DuplicateName { .. } => ErrorCode::DuplicateName,
            Error::SchemaParse { .. } => ErrorCode::SchemaParse,
            Error::DepthExceeded => ErrorCode::DepthExceeded,
            Error::Execution => ErrorCode::Execution,
            Error::InvalidContinuousToken => ErrorCode::InvalidContinuousToken,
            Error::TypeConversion => ErrorCode::TypeConversion,
            Error::SqlBuilder => ErrorCode::SqlBuilder,
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::Cancelled => ErrorCode::Cancelled,
            Error::Internal { .. } => ErrorCode::Internal,
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types shared by the cache layer and the query builders.

use thiserror::Error;

use crate::parameters::{SearchModifier, SearchPrefix};

/// Failure reported by an [`IdentityDao`](crate::cache::IdentityDao).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataAccessError {
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Identity lookup failed: {0}")]
    Query(String),

    #[error("Unexpected schema: {0}")]
    SchemaMismatch(String),
}

/// Errors raised while translating search parameters into SQL.
#[derive(Debug, Error)]
pub enum QueryBuilderError {
    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Data access failed: {0}")]
    DataAccess(#[from] DataAccessError),

    #[error("Invalid modifier '{modifier}' for parameter '{code}'")]
    InvalidModifier { code: String, modifier: String },

    #[error("Invalid prefix '{prefix}' for parameter '{code}'")]
    InvalidPrefix { code: String, prefix: SearchPrefix },

    #[error("Malformed parameter '{code}': {message}")]
    MalformedParameter { code: String, message: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Query too complex: {0}")]
    QueryTooComplex(String),

    #[error("Internal query construction error: {0}")]
    InvariantViolation(String),
}

impl QueryBuilderError {
    /// True when the request was well formed but asks for something this
    /// builder does not do. Callers usually translate this into a
    /// "not supported" outcome rather than a client error.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    pub(crate) fn malformed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedParameter {
            code: code.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_modifier(code: impl Into<String>, modifier: &SearchModifier) -> Self {
        Self::InvalidModifier {
            code: code.into(),
            modifier: modifier.to_string(),
        }
    }

    pub(crate) fn invalid_prefix(code: impl Into<String>, prefix: SearchPrefix) -> Self {
        Self::InvalidPrefix {
            code: code.into(),
            prefix,
        }
    }
}

//! Error types for sharq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An expression shape has no registered translation. Raised during
    /// compilation, before any SQL is produced.
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// A bulk update/delete was finalized without a filter or key predicate.
    #[error("Missing predicate: {0}")]
    MissingPredicate(String),

    /// A bulk operation was invoked with zero rows.
    #[error("Empty batch: {0}")]
    EmptyBatch(String),

    /// A required entity or member is not registered.
    #[error("Unknown member '{member}' on entity '{entity}'")]
    UnknownMember { entity: String, member: String },

    /// The active dialect cannot express the requested clause.
    #[error("Dialect '{dialect}' does not support {feature}")]
    DialectUnsupported {
        dialect: &'static str,
        feature: &'static str,
    },

    /// Driver-level failure during open/execute/bulk-transfer.
    #[error("Execution error: {0}")]
    Execution(String),
}

impl Error {
    /// Create an unsupported-expression error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedExpression(message.into())
    }

    /// Create a missing-predicate error.
    pub fn missing_predicate(message: impl Into<String>) -> Self {
        Self::MissingPredicate(message.into())
    }
}

/// Result type alias for sharq operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unsupported("no formatter for (Str, shuffle, 0)");
        assert_eq!(
            err.to_string(),
            "Unsupported expression: no formatter for (Str, shuffle, 0)"
        );
    }
}

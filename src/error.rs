use serde_json::Value;
use thiserror::Error;

use crate::parser::ParseError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("StoreError: {message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// Unrecognised construct, bad clause order, unresolvable name or placeholder.
    #[error("DecodeError: {0}")]
    Decode(String),
    /// Recognised SQL this compiler has no lowering for.
    #[error("NotSupportedError: {0}")]
    NotSupported(String),
    /// Missing column or collection while schema enforcement is on.
    #[error("MigrationError: {0}")]
    Migration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorKind {
    pub fn decode(message: impl Into<String>) -> Self {
        ErrorKind::Decode(message.into())
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        ErrorKind::NotSupported(message.into())
    }

    pub fn migration(message: impl Into<String>) -> Self {
        ErrorKind::Migration(message.into())
    }

    pub fn err<T>(self) -> Result<T, ErrorKind> {
        Err(self)
    }
}

impl From<ParseError> for ErrorKind {
    fn from(err: ParseError) -> Self {
        ErrorKind::Decode(err.to_string())
    }
}

pub type CompileResult<T> = Result<T, ErrorKind>;

/// Failure surfaced to callers, with enough context to reproduce it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}\n  sql: {sql}\n  params: {params:?}\n  version: {version}")]
pub struct QueryError {
    pub kind: ErrorKind,
    pub sql: String,
    pub params: Vec<Value>,
    pub version: &'static str,
}

impl QueryError {
    pub fn new(kind: ErrorKind, sql: &str, params: &[Value]) -> Self {
        Self {
            kind,
            sql: sql.to_string(),
            params: params.to_vec(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{ErrorKind, QueryError, StoreError};

    #[test]
    pub fn test_query_error_carries_context() {
        let err = QueryError::new(
            ErrorKind::from(StoreError::new("connection reset")),
            "SELECT 1",
            &[json!(1)],
        );
        let text = err.to_string();
        assert!(text.contains("connection reset"));
        assert!(text.contains("SELECT 1"));
        assert_eq!(err.version, env!("CARGO_PKG_VERSION"));
    }
}

//! Error types for featurelag.

use thiserror::Error;

/// Boxed lower-layer error kept as the source of a query failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A query skeleton that failed to compile or render.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Template error at position {position}: {message}")]
pub struct TemplateError {
    pub position: usize,
    pub message: String,
}

impl TemplateError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Returned as the source of a [`LagError::QueryExecution`] when the caller
/// cancels a request before the page is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("query cancelled")]
pub struct Cancelled;

/// The main error type for featurelag operations.
#[derive(Debug, Error)]
pub enum LagError {
    /// The query skeleton is malformed. Fatal at startup.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Request arguments rejected before any store access.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A page token that could not be decoded.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// The backing store failed, or the request was cancelled.
    #[error("Query execution failed: {source}")]
    QueryExecution {
        #[source]
        source: BoxError,
    },

    /// A returned row did not match the record shape.
    #[error("Row mapping failed for column '{column}': {message}")]
    RowMapping { column: String, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LagError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create an invalid cursor error.
    pub fn invalid_cursor(message: impl Into<String>) -> Self {
        Self::InvalidCursor(message.into())
    }

    /// Wrap a lower-layer error, keeping it as the source.
    pub fn execution(source: impl Into<BoxError>) -> Self {
        Self::QueryExecution {
            source: source.into(),
        }
    }

    /// Create a row mapping error.
    pub fn row_mapping(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RowMapping {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Errors caused by the request itself. Retrying them will not help.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::InvalidCursor(_))
    }

    /// True when the failure was a caller cancellation or a timeout.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::QueryExecution { source } => {
                source.is::<Cancelled>() || source.is::<tokio::time::error::Elapsed>()
            }
            _ => false,
        }
    }
}

/// Result type alias for featurelag operations.
pub type LagResult<T> = Result<T, LagError>;

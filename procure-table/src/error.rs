//! Error types for the table engine

use procure_fields::{FieldsError, RemoteError};
use procure_forms::FormError;
use thiserror::Error;

/// Result type for table operations
pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Debug, Error)]
pub enum TableError {
    /// The loader failed; cached rows, if any, stay visible
    #[error("loading '{source_key}' failed: {message}")]
    Load {
        source_key: String,
        message: String,
        error: RemoteError,
    },

    #[error(transparent)]
    Fields(#[from] FieldsError),

    #[error(transparent)]
    Form(#[from] FormError),

    #[error("table spec YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    #[error("column '{column}' is not sortable")]
    NotSortable { column: String },

    /// An action names a row predicate nobody registered
    #[error("no row predicate bound under the name '{name}' (used by action '{action}')")]
    MissingPredicate { name: String, action: String },

    #[error("table '{source_key}' has no loader")]
    MissingLoader { source_key: String },
}

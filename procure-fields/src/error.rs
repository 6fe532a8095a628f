//! Error types for field specifications

use thiserror::Error;

/// Result type for field operations
pub type Result<T> = std::result::Result<T, FieldsError>;

/// Errors raised while interpreting field specifications
#[derive(Debug, Error)]
pub enum FieldsError {
    /// No field in the tree matches the path
    #[error("field not found: {path}")]
    FieldNotFound { path: String },

    /// A spec references a resolver, guard, derivation or uploader nobody bound
    #[error("no {kind} bound under the name '{name}' (used by field '{field}')")]
    MissingBinding {
        kind: &'static str,
        name: String,
        field: String,
    },

    /// Two fields share a name within the same array item scope
    #[error("duplicate field name '{name}' in {scope}")]
    DuplicateFieldName { name: String, scope: String },

    /// Writing a path would overwrite a scalar with a container
    #[error("cannot write {path}: '{segment}' is not an object or array")]
    PathConflict { path: String, segment: String },

    /// Writes never grow an array; only add/remove change its length
    #[error("index {index} out of range for '{path}' (length {len})")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    /// A validation pattern rule holds an invalid regex
    #[error("invalid pattern rule on '{path}': {message}")]
    InvalidPattern { path: String, message: String },

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

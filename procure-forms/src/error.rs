//! Error types for the form engine

use procure_fields::FieldsError;
use thiserror::Error;

/// Result type for form operations
pub type Result<T> = std::result::Result<T, FormError>;

/// Errors from form operations. Validation failures are not errors; they are
/// reported through field state and `SubmitOutcome::Invalid`.
#[derive(Debug, Error)]
pub enum FormError {
    /// Spec, binding or path problem
    #[error(transparent)]
    Fields(#[from] FieldsError),

    #[error("form spec YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("'{path}' is not an array field")]
    NotAnArray { path: String },

    #[error("'{path}' is not a select field")]
    NotSelectField { path: String },

    #[error("'{path}' is not an upload field")]
    NotUploadField { path: String },

    /// `canAdd`/`canRemove` or the item limits refused the change
    #[error("cannot {op} an item at '{path}'")]
    GuardRejected { path: String, op: &'static str },

    #[error("index {index} out of range for '{path}' (length {len})")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    /// `search` on a field whose option list is not mounted
    #[error("no option session mounted at '{path}'")]
    NoSession { path: String },

    #[error("upload to '{path}' failed: {message}")]
    Upload { path: String, message: String },

    /// The target moved or was replaced while the upload ran
    #[error("upload to '{path}' was discarded")]
    UploadDiscarded { path: String },

    /// The form was destroyed; no further state changes are accepted
    #[error("form has been destroyed")]
    Destroyed,
}

impl FormError {
    pub fn field_not_found(path: impl ToString) -> Self {
        FormError::Fields(FieldsError::FieldNotFound {
            path: path.to_string(),
        })
    }
}

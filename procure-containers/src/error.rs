//! Error types for containers

use procure_forms::FormError;
use thiserror::Error;

/// Result type for container operations
pub type Result<T> = std::result::Result<T, ContainerError>;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Form(#[from] FormError),

    /// The operation needs an open container
    #[error("container '{title}' is not open")]
    NotOpen { title: String },

    /// A confirm action was driven out of order
    #[error("cannot {op} while {state}")]
    InvalidTransition { op: &'static str, state: String },
}

//! Field specifications for the procure engines
//!
//! `procure-fields` holds everything the form, table and display engines
//! share: the declarative field tree, dotted value paths, the validation
//! schema and the injected async seams.
//!
//! # Architecture
//!
//! - **Data describes UI**: `FieldSpec` is plain serde data; behaviour is
//!   referenced by name and supplied through [`Bindings`]
//! - **No backend**: option lookups, loads, submits and uploads are traits
//!   implemented by the host
//! - **Stale-response guard**: [`LatestGuard`] decides whether an async
//!   result may still be applied

pub mod context;
pub mod error;
pub mod guard;
pub mod path;
pub mod remote;
pub mod types;
pub mod validation;

pub use context::Bindings;
pub use error::{FieldsError, Result};
pub use guard::{LatestGuard, Ticket};
pub use path::{FieldPath, Segment};
pub use remote::{
    loader_fn, resolver_fn, submit_fn, uploader_fn, ArrayGuard, Derivation, Loader, Progress,
    RemoteError, RemoteResult, ResolveInput, ResolveRequest, Resolver, StaticResolver,
    SubmitAction, UploadFile, Uploader, ValueSink,
};
pub use types::{
    expand_paths, find_field, parse_fields_yaml, ArraySpec, FieldKind, FieldSpec, SelectOption,
};
pub use validation::{
    submit_payload, validate_all, FieldErrors, Rule, RuleValidator, ValidationSchema, Validator,
};

// Re-export for implementors of the async seams
pub use async_trait::async_trait;
pub use serde_json::Value;

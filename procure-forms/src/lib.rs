//! # Procure Forms
//!
//! The declarative form engine. A [`FormSpec`] (field tree, default values,
//! validation schema) plus [`procure_fields::Bindings`] and a submit action
//! becomes a live [`Form`]:
//!
//! - field commits with validation and `on_change` derivations
//! - array subforms with guarded add/remove and re-indexing
//! - option sessions for select fields, with debounced search and a
//!   stale-response guard
//! - uploads with progress
//! - a single submit pipeline that validates everything first
//!
//! ```ignore
//! let form = Form::builder(spec)
//!     .bindings(bindings)
//!     .action(create_material_category)
//!     .build()?;
//! form.set_value("name", json!("Steel"))?;
//! match form.submit().await {
//!     SubmitOutcome::Succeeded(created) => { /* close the container */ }
//!     SubmitOutcome::Failed { message, .. } => { /* show message */ }
//!     _ => {}
//! }
//! ```

mod error;
mod form;
mod options;
mod state;
mod submit;

pub use error::{FormError, Result};
pub use form::{ErrorCallback, Form, FormBuilder, FormSpec, SuccessCallback};
pub use state::{FieldPhase, FieldState, OptionsState, SubmitOutcome};

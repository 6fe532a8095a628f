//! # Procure Containers
//!
//! Interactive wrappers with an explicit open/closed lifecycle:
//!
//! - [`FormContainer`] is a modal or drawer hosting one [`procure_forms::Form`]
//!   per open; a successful submit invalidates the lists it feeds
//! - [`ConfirmAction`] runs an action only after the user confirms
//!
//! Both report to a [`procure_common::Notifier`] instead of returning raw
//! errors to the host.

mod container;
mod cta;
mod error;

pub use container::{CloseReason, ContainerKind, ContainerState, FormContainer};
pub use cta::{ConfirmAction, CtaState};
pub use error::{ContainerError, Result};

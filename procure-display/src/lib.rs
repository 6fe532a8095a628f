//! # Procure Display
//!
//! Turns a raw value plus its field kind into a [`DisplayNode`].
//!
//! - [`format_value`] is pure and total for the synchronous kinds
//! - [`render`] resolves an async kind once
//! - [`DisplayCell`] keeps a cell current while its value changes, applying
//!   resolver results only for the value still shown

mod cell;
mod node;

pub use cell::{render, DisplayCell};
pub use node::{format_value, resolved_node, DisplayNode};

//! # Procure Table
//!
//! The declarative list engine:
//!
//! - [`QueryCache`] holds loaded rows per source key and is the only state
//!   shared between a list and the forms that change its data
//! - [`Table`] narrows, sorts and pages cached rows on the client, renders
//!   cells through [`procure_display::DisplayCell`] and offers the actions
//!   the session permits
//!
//! Filtering and paging never call the loader. A successful mutation calls
//! [`QueryCache::invalidate`] and the next [`Table::load`] refetches.

mod cache;
mod error;
mod filter;
mod spec;
mod table;

pub use cache::{QueryCache, Rows};
pub use error::{Result, TableError};
pub use filter::{apply_filters, compare, matches, sort_rows};
pub use spec::{ActionSpec, ColumnSpec, Comparator, FilterSpec, SortDirection, TableSpec};
pub use table::{Pagination, RowPredicate, Table, TableBuilder};

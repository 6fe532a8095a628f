//! # Procure Common
//!
//! Small pieces every engine crate needs but none of them owns:
//!
//! - [`session`] - read-only permission flags from the signed-in session
//! - [`notify`] - the toast/notification sink containers report to
//! - [`logging`] - tracing initialisation and the `Pretty` log wrapper
//!
//! Engines receive these explicitly as constructor arguments; there is no
//! global session or store.

pub mod logging;
pub mod notify;
pub mod session;

pub use logging::{init_tracing, Pretty};
pub use notify::{CollectingNotifier, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use session::Permissions;

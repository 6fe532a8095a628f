//! Permission flags from the signed-in session

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Boolean role flags (e.g. `is_admin`, `is_manager`).
///
/// Engines only read these to decide whether a row action or extra button
/// is offered. Unknown flags are denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions {
    flags: BTreeMap<String, bool>,
}

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(flag, granted)` pairs
    pub fn from_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Grant a flag
    pub fn grant(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into(), true);
        self
    }

    /// Whether the flag is present and granted
    pub fn allows(&self, flag: &str) -> bool {
        self.flags.get(flag).copied().unwrap_or(false)
    }

    /// `None` means no permission is needed
    pub fn allows_opt(&self, flag: Option<&str>) -> bool {
        flag.map_or(true, |f| self.allows(f))
    }
}

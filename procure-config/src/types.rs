//! Engine configuration values

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by the form engine, the table engine and field display.
///
/// Every field has a default, so an empty configuration source is valid.
/// Engines receive this explicitly; nothing reads it from a global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Debounce applied to search-driven option loading, in milliseconds
    pub search_debounce_ms: u64,
    /// Rows per page when a table does not set its own page size
    pub page_size: usize,
    /// Page sizes a pager offers
    pub page_size_options: Vec<usize>,
    /// Neutral placeholder for missing values
    pub placeholder: String,
    /// Shown while an asynchronous cell or option list is resolving
    pub loading_text: String,
    /// Shown when a resolver fails
    pub unavailable_text: String,
    /// Message used when a failed submit carries no readable message
    pub submit_error_fallback: String,
    /// chrono format string for DATE fields
    pub date_format: String,
    pub true_label: String,
    pub false_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_debounce_ms: 300,
            page_size: 10,
            page_size_options: vec![10, 20, 50, 100],
            placeholder: "N/A".to_string(),
            loading_text: "Loading...".to_string(),
            unavailable_text: "Unavailable".to_string(),
            submit_error_fallback: "Something went wrong, please try again".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            true_label: "Yes".to_string(),
            false_label: "No".to_string(),
        }
    }
}

impl EngineConfig {
    /// The search debounce as a `Duration`
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    /// Reject values the engines cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::invalid_value(
                "page_size",
                "must be greater than zero",
            ));
        }
        if self.page_size_options.contains(&0) {
            return Err(ConfigError::invalid_value(
                "page_size_options",
                "page sizes must be greater than zero",
            ));
        }
        if self.date_format.trim().is_empty() {
            return Err(ConfigError::invalid_value("date_format", "cannot be empty"));
        }
        Ok(())
    }
}

//! Per-field state and operation outcomes.

use procure_fields::{FieldErrors, RemoteError, SelectOption, Value};
use serde::Serialize;

/// Lifecycle of one field:
/// `Pristine → Dirty → {Valid, Invalid} → Submitting → {Settled, Failed}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldPhase {
    #[default]
    Pristine,
    Dirty,
    Valid,
    Invalid,
    /// A submit or an upload is in flight
    Submitting,
    Settled,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldState {
    pub phase: FieldPhase,
    /// First failing rule's message, or the upload failure
    pub error: Option<String>,
    pub touched: bool,
    /// Upload progress in percent while an upload runs
    pub progress: Option<u8>,
}

impl FieldState {
    pub(crate) fn validated(&mut self, error: Option<String>) {
        self.phase = if error.is_some() {
            FieldPhase::Invalid
        } else {
            FieldPhase::Valid
        };
        self.error = error;
    }
}

/// What an option dropdown currently shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptionsState {
    pub options: Vec<SelectOption>,
    pub loading: bool,
    /// Set when the last applied resolver call failed
    pub error: Option<String>,
    /// Search text of the last search, `None` for the initial load
    pub term: Option<String>,
}

/// Result of [`crate::Form::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Validation failed; the submit action was not called
    Invalid(FieldErrors),
    /// An upload or another submit is in flight
    Blocked,
    Succeeded(Value),
    /// The action rejected; `message` is what the user should see
    Failed { message: String, error: RemoteError },
    /// The form was destroyed before the action settled
    Discarded,
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmitOutcome::Succeeded(_))
    }
}

//! Modal and drawer containers.
//!
//! A container is closed or open. Opening builds a fresh [`Form`] from the
//! spec; cancel, dismiss and a successful submit destroy it. The same form
//! is never shown twice.

use std::sync::{Arc, Mutex, MutexGuard};

use procure_common::{Notice, Notifier, TracingNotifier};
use procure_config::EngineConfig;
use procure_fields::{Bindings, SubmitAction, Value};
use procure_forms::{Form, FormSpec, SubmitOutcome};
use procure_table::QueryCache;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{ContainerError, Result};

/// How the container is presented; both share one lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Modal,
    Drawer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Closed,
    Open,
}

/// Why a container closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Cancelled,
    /// Backdrop click or escape
    Dismissed,
    Submitted,
}

/// A modal or drawer hosting one form per open.
pub struct FormContainer {
    kind: ContainerKind,
    title: String,
    spec: FormSpec,
    bindings: Bindings,
    action: Arc<dyn SubmitAction>,
    config: Arc<EngineConfig>,
    /// Source keys refreshed after a successful submit, each in its own cache
    invalidates: Vec<(QueryCache, String)>,
    notifier: Arc<dyn Notifier>,
    success_message: String,
    form: Mutex<Option<Form>>,
    state: watch::Sender<ContainerState>,
}

impl std::fmt::Debug for FormContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormContainer")
            .field("kind", &self.kind)
            .field("title", &self.title)
            .field("state", &self.state())
            .finish()
    }
}

impl FormContainer {
    pub fn new(
        kind: ContainerKind,
        title: impl Into<String>,
        spec: FormSpec,
        action: Arc<dyn SubmitAction>,
    ) -> Self {
        let (state, _) = watch::channel(ContainerState::Closed);
        Self {
            kind,
            title: title.into(),
            spec,
            bindings: Bindings::new(),
            action,
            config: Arc::new(EngineConfig::default()),
            invalidates: Vec::new(),
            notifier: Arc::new(TracingNotifier),
            success_message: "Saved".to_string(),
            form: Mutex::new(None),
            state,
        }
    }

    pub fn with_bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_config(mut self, config: Arc<EngineConfig>) -> Self {
        self.config = config;
        self
    }

    /// Invalidate `key` in `cache` after every successful submit
    pub fn invalidates(mut self, cache: QueryCache, key: impl Into<String>) -> Self {
        self.invalidates.push((cache, key.into()));
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = message.into();
        self
    }

    fn slot(&self) -> MutexGuard<'_, Option<Form>> {
        self.form.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn state(&self) -> ContainerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ContainerState> {
        self.state.subscribe()
    }

    /// The form of the current open, if any
    pub fn form(&self) -> Option<Form> {
        self.slot().clone()
    }

    /// Open with the spec's default values. Opening an open container
    /// returns the form already shown.
    pub fn open(&self) -> Result<Form> {
        self.open_with(self.spec.default_values.clone())
    }

    /// Open with `values` in place of the default values, e.g. the row being
    /// edited.
    pub fn open_with(&self, values: Value) -> Result<Form> {
        let mut slot = self.slot();
        if let Some(form) = slot.as_ref() {
            return Ok(form.clone());
        }

        let mut spec = self.spec.clone();
        spec.default_values = values;
        let form = Form::builder(spec)
            .bindings(self.bindings.clone())
            .action(Arc::clone(&self.action))
            .config(Arc::clone(&self.config))
            .build()?;
        debug!(container = %self.title, kind = ?self.kind, form = %form.id(), "opened");
        *slot = Some(form.clone());
        self.state.send_replace(ContainerState::Open);
        Ok(form)
    }

    /// Submit the open form.
    ///
    /// Success invalidates the configured source keys, reports the success
    /// message and closes. Failure reports the error message and leaves the
    /// form open with its values.
    pub async fn submit(&self) -> Result<SubmitOutcome> {
        let form = self.form().ok_or_else(|| ContainerError::NotOpen {
            title: self.title.clone(),
        })?;

        let outcome = form.submit().await;
        match &outcome {
            SubmitOutcome::Succeeded(_) => {
                for (cache, key) in &self.invalidates {
                    cache.invalidate(key);
                }
                self.notifier.notify(Notice::success(&self.success_message));
                self.close_form(&form, CloseReason::Submitted);
            }
            SubmitOutcome::Failed { message, .. } => {
                self.notifier.notify(Notice::error(message));
            }
            SubmitOutcome::Invalid(_) | SubmitOutcome::Blocked | SubmitOutcome::Discarded => {}
        }
        Ok(outcome)
    }

    pub fn cancel(&self) -> bool {
        self.close(CloseReason::Cancelled)
    }

    pub fn dismiss(&self) -> bool {
        self.close(CloseReason::Dismissed)
    }

    /// Destroy the open form. Returns false when already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        let Some(form) = self.slot().take() else {
            return false;
        };
        form.destroy();
        self.state.send_replace(ContainerState::Closed);
        debug!(container = %self.title, ?reason, form = %form.id(), "closed");
        true
    }

    /// Close only if `form` is still the one shown
    fn close_form(&self, form: &Form, reason: CloseReason) {
        let current = self.slot().as_ref().map(Form::id);
        if current == Some(form.id()) {
            self.close(reason);
        }
    }
}

impl Drop for FormContainer {
    fn drop(&mut self) {
        if let Some(form) = self.slot().take() {
            form.destroy();
        }
    }
}

//! Confirmable call-to-action: a button whose action runs only after the
//! user confirms.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use procure_common::{Notice, Notifier, TracingNotifier};
use procure_config::EngineConfig;
use procure_fields::{RemoteError, RemoteResult, SubmitAction, Value};
use procure_forms::SubmitOutcome;
use procure_table::QueryCache;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{ContainerError, Result};

/// `Closed -> AwaitingConfirmation -> Submitting -> Closed`; a failed
/// submit returns to `AwaitingConfirmation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtaState {
    Closed,
    AwaitingConfirmation,
    Submitting,
}

impl fmt::Display for CtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtaState::Closed => write!(f, "closed"),
            CtaState::AwaitingConfirmation => write!(f, "awaiting confirmation"),
            CtaState::Submitting => write!(f, "submitting"),
        }
    }
}

struct Pending {
    payload: Value,
    /// Bumped on every request so a cancelled submit cannot settle the next one
    generation: u64,
}

pub struct ConfirmAction {
    label: String,
    prompt: String,
    action: Arc<dyn SubmitAction>,
    config: Arc<EngineConfig>,
    invalidates: Vec<(QueryCache, String)>,
    notifier: Arc<dyn Notifier>,
    success_message: String,
    pending: Arc<Mutex<Pending>>,
    state: Arc<watch::Sender<CtaState>>,
}

impl fmt::Debug for ConfirmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmAction")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

impl ConfirmAction {
    pub fn new(
        label: impl Into<String>,
        prompt: impl Into<String>,
        action: Arc<dyn SubmitAction>,
    ) -> Self {
        let (state, _) = watch::channel(CtaState::Closed);
        Self {
            label: label.into(),
            prompt: prompt.into(),
            action,
            config: Arc::new(EngineConfig::default()),
            invalidates: Vec::new(),
            notifier: Arc::new(TracingNotifier),
            success_message: "Done".to_string(),
            pending: Arc::new(Mutex::new(Pending {
                payload: Value::Null,
                generation: 0,
            })),
            state: Arc::new(state),
        }
    }

    pub fn with_config(mut self, config: Arc<EngineConfig>) -> Self {
        self.config = config;
        self
    }

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

    fn pending(&self) -> MutexGuard<'_, Pending> {
        lock(&self.pending)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn state(&self) -> CtaState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CtaState> {
        self.state.subscribe()
    }

    fn transition(&self, op: &'static str, from: CtaState, to: CtaState) -> Result<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                result = Err(ContainerError::InvalidTransition {
                    op,
                    state: state.to_string(),
                });
                false
            }
        });
        result
    }

    /// The button was pressed: ask for confirmation of `payload`
    pub fn request(&self, payload: Value) -> Result<()> {
        let mut pending = self.pending();
        self.transition("request", CtaState::Closed, CtaState::AwaitingConfirmation)?;
        pending.payload = payload;
        pending.generation += 1;
        debug!(action = %self.label, "awaiting confirmation");
        Ok(())
    }

    /// Back out. While submitting, the request keeps running but its result
    /// is discarded.
    pub fn cancel(&self) -> bool {
        let mut pending = self.pending();
        let was_open = self.state.send_if_modified(|state| {
            let open = *state != CtaState::Closed;
            *state = CtaState::Closed;
            open
        });
        if was_open {
            pending.generation += 1;
            pending.payload = Value::Null;
            debug!(action = %self.label, "cancelled");
        }
        was_open
    }

    /// The user confirmed: run the action.
    ///
    /// The action runs on its own task and settles the state there, so
    /// dropping this future does not leave the button stuck in `Submitting`.
    pub async fn confirm(&self) -> Result<SubmitOutcome> {
        let (payload, generation) = {
            let pending = self.pending();
            self.transition(
                "confirm",
                CtaState::AwaitingConfirmation,
                CtaState::Submitting,
            )?;
            (pending.payload.clone(), pending.generation)
        };
        debug!(action = %self.label, "confirmed");

        let settle = Settle {
            label: self.label.clone(),
            config: Arc::clone(&self.config),
            invalidates: self.invalidates.clone(),
            notifier: Arc::clone(&self.notifier),
            success_message: self.success_message.clone(),
            pending: Arc::clone(&self.pending),
            state: Arc::clone(&self.state),
            generation,
        };
        let action = Arc::clone(&self.action);
        let task = tokio::spawn({
            let settle = settle.clone();
            async move {
                let result = action.submit(payload).await;
                settle.finish(result)
            }
        });
        match task.await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                warn!(action = %self.label, %error, "action task failed");
                Ok(settle.finish(Err(RemoteError::new(None, Value::Null))))
            }
        }
    }
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// What a running confirm needs to settle the button on its own
#[derive(Clone)]
struct Settle {
    label: String,
    config: Arc<EngineConfig>,
    invalidates: Vec<(QueryCache, String)>,
    notifier: Arc<dyn Notifier>,
    success_message: String,
    pending: Arc<Mutex<Pending>>,
    state: Arc<watch::Sender<CtaState>>,
    generation: u64,
}

impl Settle {
    fn finish(&self, result: RemoteResult<Value>) -> SubmitOutcome {
        let pending = lock(&self.pending);
        if pending.generation != self.generation || *self.state.borrow() != CtaState::Submitting {
            debug!(action = %self.label, "result discarded after cancel");
            return SubmitOutcome::Discarded;
        }
        match result {
            Ok(response) => {
                self.state.send_replace(CtaState::Closed);
                drop(pending);
                for (cache, key) in &self.invalidates {
                    cache.invalidate(key);
                }
                self.notifier.notify(Notice::success(&self.success_message));
                SubmitOutcome::Succeeded(response)
            }
            Err(error) => {
                let message = error.user_message(&self.config.submit_error_fallback);
                warn!(action = %self.label, %error, "action failed");
                self.state.send_replace(CtaState::AwaitingConfirmation);
                drop(pending);
                self.notifier.notify(Notice::error(&message));
                SubmitOutcome::Failed { message, error }
            }
        }
    }
}

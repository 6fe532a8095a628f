//! Submit pipeline and uploads.

use std::sync::Arc;

use procure_common::Pretty;
use procure_fields::{
    expand_paths, path, submit_payload, validate_all, FieldPath, FieldsError, Progress, RemoteError,
    RemoteResult, UploadFile, Value,
};
use tracing::{debug, trace, warn};

use crate::error::{FormError, Result};
use crate::form::{Form, FormState};
use crate::state::{FieldPhase, SubmitOutcome};

impl Form {
    /// Validate every field, then run the submit action.
    ///
    /// Invalid values never reach the action. The request runs on its own
    /// task: destroying the form makes this return `Discarded` without
    /// callbacks, but the request is not aborted. On failure the values stay
    /// as they were so the user can retry.
    pub async fn submit(&self) -> SubmitOutcome {
        let payload = {
            let mut guard = self.state();
            let state = &mut *guard;
            if state.destroyed {
                return SubmitOutcome::Discarded;
            }
            if state.submitting || !state.uploads.is_empty() {
                debug!(form = %self.inner.id, "submit blocked");
                return SubmitOutcome::Blocked;
            }

            let fields = &self.inner.spec.fields;
            let errors = validate_all(self.inner.validator.as_ref(), fields, &state.values);
            let paths: Vec<FieldPath> = expand_paths(fields, &state.values, &FieldPath::root())
                .into_iter()
                .map(|(path, _)| path)
                .collect();
            for path in &paths {
                let field = state.fields.entry(path.clone()).or_default();
                field.validated(errors.get(path).cloned());
            }
            if !errors.is_empty() {
                debug!(form = %self.inner.id, errors = errors.len(), "submit stopped by validation");
                return SubmitOutcome::Invalid(errors);
            }

            for path in paths {
                state.fields.entry(path).or_default().phase = FieldPhase::Submitting;
            }
            state.submitting = true;
            submit_payload(fields, &state.values, self.inner.validator.allow_unknown())
        };

        trace!(form = %self.inner.id, payload = %Pretty(&payload), "submitting");
        let form = self.clone();
        let action = Arc::clone(&self.inner.action);
        let request = tokio::spawn(async move {
            let result = action.submit(payload).await;
            form.settle(result)
        });

        tokio::select! {
            _ = self.inner.cancel.cancelled() => {
                debug!(form = %self.inner.id, "submit discarded");
                SubmitOutcome::Discarded
            }
            joined = request => match joined {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(form = %self.inner.id, %error, "submit task failed");
                    self.settle(Err(RemoteError::new(None, Value::Null)))
                }
            },
        }
    }

    fn settle(&self, result: RemoteResult<Value>) -> SubmitOutcome {
        let phase = if result.is_ok() {
            FieldPhase::Settled
        } else {
            FieldPhase::Failed
        };
        {
            let mut state = self.state();
            if state.destroyed {
                return SubmitOutcome::Discarded;
            }
            state.submitting = false;
            for field in state.fields.values_mut() {
                if field.phase == FieldPhase::Submitting {
                    field.phase = phase;
                }
            }
        }

        match result {
            Ok(response) => {
                debug!(form = %self.inner.id, "submit succeeded");
                if let Some(callback) = &self.inner.on_success {
                    callback(&response);
                }
                SubmitOutcome::Succeeded(response)
            }
            Err(error) => {
                let message = error.user_message(&self.inner.config.submit_error_fallback);
                warn!(form = %self.inner.id, %error, "submit failed");
                if let Some(callback) = &self.inner.on_error {
                    callback(&message);
                }
                SubmitOutcome::Failed { message, error }
            }
        }
    }

    /// Upload `file` through the field's bound uploader and commit the
    /// returned value.
    ///
    /// The field is `Submitting` while the upload runs and its progress is
    /// tracked; the form cannot submit meanwhile. A failed upload keeps the
    /// previous value and records the error on the field. If the target
    /// array item is removed or shifted, the array replaced, the form reset
    /// or a newer upload started on the same field, the upload is dropped
    /// and nothing is committed.
    pub async fn upload(&self, path: impl Into<FieldPath>, file: UploadFile) -> Result<Value> {
        let path = path.into();
        let spec = self.spec_at(&path)?;
        let name = spec.kind.uploader().ok_or_else(|| FormError::NotUploadField {
            path: path.to_string(),
        })?;
        let uploader = self
            .inner
            .bindings
            .get_uploader(name)
            .ok_or_else(|| FieldsError::MissingBinding {
                kind: "uploader",
                name: name.to_string(),
                field: spec.name.clone(),
            })?;

        let token = {
            let mut state = self.state();
            if state.destroyed {
                return Err(FormError::Destroyed);
            }
            if path::get(&state.values, &path).is_none() {
                if let Some(parent) = path.parent() {
                    // the target item must exist; object keys may still be absent
                    if path::get(&state.values, &parent).is_none() {
                        return Err(FormError::field_not_found(&path));
                    }
                }
            }
            let token = self.inner.cancel.child_token();
            if let Some(previous) = state.uploads.insert(path.clone(), token.clone()) {
                previous.cancel();
            }
            let field = state.fields.entry(path.clone()).or_default();
            field.phase = FieldPhase::Submitting;
            field.progress = Some(0);
            field.error = None;
            token
        };
        debug!(form = %self.inner.id, path = %path, file = %file.name, "upload started");

        let progress: Progress = {
            let form = self.clone();
            let path = path.clone();
            let token = token.clone();
            Arc::new(move |percent: u8| {
                let mut state = form.state();
                if token.is_cancelled() {
                    return;
                }
                if let Some(field) = state.fields.get_mut(&path) {
                    field.progress = Some(percent.min(100));
                }
            })
        };
        let result = tokio::select! {
            _ = token.cancelled() => None,
            result = uploader.upload(file, progress) => Some(result),
        };

        let value = {
            let mut guard = self.state();
            let state = &mut *guard;
            // a cancelled token was already removed by whoever cancelled it
            let Some(result) = result.filter(|_| !token.is_cancelled()) else {
                return Err(self.discarded_upload(state, &path));
            };
            state.uploads.remove(&path);
            let value = match result {
                Ok(value) => value,
                Err(error) => {
                    let message = error.user_message(&self.inner.config.submit_error_fallback);
                    warn!(path = %path, %error, "upload failed");
                    let field = state.fields.entry(path.clone()).or_default();
                    field.progress = None;
                    field.phase = FieldPhase::Failed;
                    field.error = Some(message.clone());
                    return Err(FormError::Upload {
                        path: path.to_string(),
                        message,
                    });
                }
            };
            self.commit(state, &path, spec, &value)?;
            if let Some(field) = state.fields.get_mut(&path) {
                field.progress = None;
            }
            value
        };

        self.derive(&path, spec, &value);
        Ok(value)
    }

    fn discarded_upload(&self, state: &FormState, path: &FieldPath) -> FormError {
        if state.destroyed {
            return FormError::Destroyed;
        }
        debug!(form = %self.inner.id, path = %path, "upload discarded");
        FormError::UploadDiscarded {
            path: path.to_string(),
        }
    }

    /// Cancel every running upload whose target satisfies `pred`
    pub(crate) fn cancel_uploads(&self, state: &mut FormState, pred: impl Fn(&FieldPath) -> bool) {
        state.uploads.retain(|path, token| {
            if pred(path) {
                token.cancel();
                debug!(path = %path, "upload cancelled");
                false
            } else {
                true
            }
        });
    }
}

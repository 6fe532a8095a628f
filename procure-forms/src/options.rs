//! Option sessions for SELECT_API_OPTION fields.
//!
//! A session is one mounted dropdown. Mounting issues the initial resolver
//! call (no search term); `search` issues debounced calls with the typed
//! term. Each session owns a stale-response guard and a cancellation token
//! that is a child of the form's, so unmounting a field, an array item or
//! the whole form stops every pending response from landing.

use std::sync::Arc;
use std::time::Duration;

use procure_fields::{
    expand_paths, FieldKind, FieldPath, FieldSpec, LatestGuard, ResolveRequest, Resolver, Ticket,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{FormError, Result};
use crate::form::{Form, FormState};
use crate::state::OptionsState;

pub(crate) struct OptionSession {
    guard: LatestGuard,
    cancel: CancellationToken,
    state: watch::Sender<OptionsState>,
    resolver: Arc<dyn Resolver>,
}

impl OptionSession {
    pub(crate) fn snapshot(&self) -> OptionsState {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<OptionsState> {
        self.state.subscribe()
    }

    /// Unmount: nothing issued so far may touch the state again
    pub(crate) fn close(&self) {
        self.cancel.cancel();
        self.guard.invalidate();
    }

    fn spawn(
        self: &Arc<Self>,
        request: ResolveRequest,
        ticket: Ticket,
        debounce: Option<Duration>,
        fallback: String,
    ) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(delay) = debounce {
                tokio::select! {
                    _ = session.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                // a later keystroke took over during the wait
                if !session.guard.is_current(ticket) {
                    return;
                }
            }

            let path = request.path.clone();
            let result = session.resolver.resolve(request).await;

            session.state.send_if_modified(|state| {
                if session.cancel.is_cancelled() || !session.guard.is_current(ticket) {
                    trace!(path = %path, "discarding stale option response");
                    return false;
                }
                state.loading = false;
                match &result {
                    Ok(options) => {
                        state.options = options.clone();
                        state.error = None;
                    }
                    Err(error) => {
                        warn!(path = %path, %error, "option resolver failed");
                        state.error = Some(error.user_message(&fallback));
                    }
                }
                true
            });
        });
    }
}

impl Form {
    /// Mount a session for every SELECT_API_OPTION path under `base`
    pub(crate) fn mount_selects(&self, state: &mut FormState, fields: &[FieldSpec], base: &FieldPath) {
        let targets: Vec<(FieldPath, String)> = expand_paths(fields, &state.values, base)
            .into_iter()
            .filter_map(|(path, spec)| match &spec.kind {
                FieldKind::SelectApiOption { resolver, .. } => Some((path, resolver.clone())),
                _ => None,
            })
            .collect();
        for (path, resolver) in targets {
            self.mount_session(state, path, &resolver);
        }
    }

    /// Close every session whose path satisfies `pred`
    pub(crate) fn unmount_sessions(&self, state: &mut FormState, pred: impl Fn(&FieldPath) -> bool) {
        let doomed: Vec<FieldPath> = state.sessions.keys().filter(|p| pred(p)).cloned().collect();
        for path in doomed {
            if let Some(session) = state.sessions.remove(&path) {
                session.close();
                debug!(path = %path, "option session unmounted");
            }
        }
    }

    fn mount_session(&self, state: &mut FormState, path: FieldPath, resolver_name: &str) {
        let Some(resolver) = self.inner.bindings.get_resolver(resolver_name) else {
            warn!(path = %path, resolver = resolver_name, "no resolver bound");
            return;
        };
        if let Some(old) = state.sessions.remove(&path) {
            old.close();
        }

        let (tx, _) = watch::channel(OptionsState {
            loading: true,
            ..OptionsState::default()
        });
        let session = Arc::new(OptionSession {
            guard: LatestGuard::new(),
            cancel: self.inner.cancel.child_token(),
            state: tx,
            resolver,
        });
        let ticket = session.guard.issue();
        let request = ResolveRequest::search(
            None,
            state.values.clone(),
            self.inner.spec.default_values.clone(),
            path.clone(),
        );
        debug!(form = %self.inner.id, path = %path, "option session mounted");
        session.spawn(request, ticket, None, self.inner.config.unavailable_text.clone());
        state.sessions.insert(path, session);
    }

    /// (Re)mount the dropdown at `path`, issuing a fresh initial load.
    pub fn open_options(&self, path: impl Into<FieldPath>) -> Result<()> {
        let path = path.into();
        let spec = self.spec_at(&path)?;
        let FieldKind::SelectApiOption { resolver, .. } = &spec.kind else {
            return Err(FormError::NotSelectField {
                path: path.to_string(),
            });
        };
        let mut guard = self.state();
        if guard.destroyed {
            return Err(FormError::Destroyed);
        }
        self.mount_session(&mut guard, path, resolver);
        Ok(())
    }

    /// Search the dropdown at `path`. The resolver runs once typing pauses
    /// for the configured debounce; only the last term's answer is shown.
    pub fn search(&self, path: impl Into<FieldPath>, term: impl Into<String>) -> Result<()> {
        let path = path.into();
        let term = term.into();
        let state = self.state();
        if state.destroyed {
            return Err(FormError::Destroyed);
        }
        let session = state
            .sessions
            .get(&path)
            .cloned()
            .ok_or_else(|| FormError::NoSession {
                path: path.to_string(),
            })?;

        let ticket = session.guard.issue();
        session.state.send_modify(|s| {
            s.loading = true;
            s.term = Some(term.clone());
        });
        let request = ResolveRequest::search(
            Some(term),
            state.values.clone(),
            self.inner.spec.default_values.clone(),
            path,
        );
        drop(state);

        session.spawn(
            request,
            ticket,
            Some(self.inner.config.search_debounce()),
            self.inner.config.unavailable_text.clone(),
        );
        Ok(())
    }

    /// Unmount the dropdown at `path`. Returns whether one was mounted.
    pub fn close_options(&self, path: impl Into<FieldPath>) -> bool {
        let path = path.into();
        let mut state = self.state();
        match state.sessions.remove(&path) {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// What the dropdown at `path` shows, if it is mounted
    pub fn options(&self, path: impl Into<FieldPath>) -> Option<OptionsState> {
        self.state()
            .sessions
            .get(&path.into())
            .map(|session| session.snapshot())
    }

    /// Watch the dropdown at `path`. The receiver goes quiet when the session
    /// is unmounted.
    pub fn watch_options(&self, path: impl Into<FieldPath>) -> Option<watch::Receiver<OptionsState>> {
        self.state()
            .sessions
            .get(&path.into())
            .map(|session| session.subscribe())
    }

    /// Paths with a mounted dropdown, sorted
    pub fn mounted_options(&self) -> Vec<FieldPath> {
        let mut paths: Vec<FieldPath> = self.state().sessions.keys().cloned().collect();
        paths.sort();
        paths
    }
}

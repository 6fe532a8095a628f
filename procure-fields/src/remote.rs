//! Injected asynchronous seams.
//!
//! The engines never talk to a backend themselves. Option lookups, list
//! loads, submits and uploads go through these traits; implementations are
//! bound by name in [`crate::Bindings`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::path::FieldPath;
use crate::types::SelectOption;

/// A failed remote call: optional HTTP-like status plus an arbitrary payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("remote call failed (status {status:?}): {payload}")]
pub struct RemoteError {
    pub status: Option<u16>,
    pub payload: Value,
}

impl RemoteError {
    pub fn new(status: Option<u16>, payload: Value) -> Self {
        Self { status, payload }
    }

    /// Error carrying a plain message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            payload: serde_json::json!({ "message": message.into() }),
        }
    }

    /// Error produced when a call was abandoned before it settled
    pub fn cancelled() -> Self {
        Self {
            status: None,
            payload: Value::String("cancelled".into()),
        }
    }

    /// Message suitable for the user: the first nested `message` string in
    /// the payload, else `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        find_message(&self.payload)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }
}

fn find_message(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| map.values().find_map(find_message)),
        Value::Array(items) => items.iter().find_map(find_message),
        _ => None,
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// What a resolver is asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveInput {
    /// Candidate options for a picker; `None` means "no search text yet"
    Search(Option<String>),
    /// The option(s) representing an already stored raw value
    Raw(Value),
}

/// A resolver call with the context it may depend on.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub input: ResolveInput,
    /// Current form values (the row, for table cells)
    pub form: Value,
    /// Initial values the form was opened with
    pub initial: Value,
    /// Concrete path of the field being resolved
    pub path: FieldPath,
}

impl ResolveRequest {
    pub fn search(term: Option<String>, form: Value, initial: Value, path: FieldPath) -> Self {
        Self {
            input: ResolveInput::Search(term),
            form,
            initial,
            path,
        }
    }

    pub fn raw(value: Value, form: Value, path: FieldPath) -> Self {
        Self {
            input: ResolveInput::Raw(value),
            form: form.clone(),
            initial: form,
            path,
        }
    }

    /// The search term, when this is a search
    pub fn term(&self) -> Option<&str> {
        match &self.input {
            ResolveInput::Search(term) => term.as_deref(),
            ResolveInput::Raw(_) => None,
        }
    }
}

/// Maps search text or a raw value to options.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, request: ResolveRequest) -> RemoteResult<Vec<SelectOption>>;
}

/// Fetches the full row set of a list.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self) -> RemoteResult<Vec<Value>>;
}

/// Sends a payload and returns the server response.
#[async_trait]
pub trait SubmitAction: Send + Sync {
    async fn submit(&self, payload: Value) -> RemoteResult<Value>;
}

/// A file picked by the user
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Progress callback handed to an uploader; receives a percentage
pub type Progress = Arc<dyn Fn(u8) + Send + Sync>;

/// Stores a file and returns the value to keep in the form (usually a URL).
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: UploadFile, progress: Progress) -> RemoteResult<Value>;
}

/// Write access handed to derivations.
pub trait ValueSink: Send + Sync {
    fn value(&self, path: &FieldPath) -> Option<Value>;
    fn set_value(&self, path: &FieldPath, value: Value);
}

/// Runs after a field commits; may write sibling fields.
///
/// `path` is the concrete path of the field that changed, so derivations in
/// array items can address their own row via `path.parent()`.
pub trait Derivation: Send + Sync {
    fn apply(&self, path: &FieldPath, value: &Value, sink: &dyn ValueSink);
}

impl<F> Derivation for F
where
    F: Fn(&FieldPath, &Value, &dyn ValueSink) + Send + Sync,
{
    fn apply(&self, path: &FieldPath, value: &Value, sink: &dyn ValueSink) {
        self(path, value, sink)
    }
}

/// Decides whether an array may grow or shrink given the current values.
pub trait ArrayGuard: Send + Sync {
    fn allow(&self, values: &Value, len: usize) -> bool;
}

impl<F> ArrayGuard for F
where
    F: Fn(&Value, usize) -> bool + Send + Sync,
{
    fn allow(&self, values: &Value, len: usize) -> bool {
        self(values, len)
    }
}

struct ResolverFn<F>(F);

#[async_trait]
impl<F, Fut> Resolver for ResolverFn<F>
where
    F: Fn(ResolveRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<Vec<SelectOption>>> + Send + 'static,
{
    async fn resolve(&self, request: ResolveRequest) -> RemoteResult<Vec<SelectOption>> {
        (self.0)(request).await
    }
}

/// Wrap an async closure as a [`Resolver`]
pub fn resolver_fn<F, Fut>(f: F) -> Arc<dyn Resolver>
where
    F: Fn(ResolveRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<Vec<SelectOption>>> + Send + 'static,
{
    Arc::new(ResolverFn(f))
}

struct LoaderFn<F>(F);

#[async_trait]
impl<F, Fut> Loader for LoaderFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<Vec<Value>>> + Send + 'static,
{
    async fn load(&self) -> RemoteResult<Vec<Value>> {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`Loader`]
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn Loader>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<Vec<Value>>> + Send + 'static,
{
    Arc::new(LoaderFn(f))
}

struct SubmitFn<F>(F);

#[async_trait]
impl<F, Fut> SubmitAction for SubmitFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<Value>> + Send + 'static,
{
    async fn submit(&self, payload: Value) -> RemoteResult<Value> {
        (self.0)(payload).await
    }
}

/// Wrap an async closure as a [`SubmitAction`]
pub fn submit_fn<F, Fut>(f: F) -> Arc<dyn SubmitAction>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<Value>> + Send + 'static,
{
    Arc::new(SubmitFn(f))
}

struct UploaderFn<F>(F);

#[async_trait]
impl<F, Fut> Uploader for UploaderFn<F>
where
    F: Fn(UploadFile, Progress) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<Value>> + Send + 'static,
{
    async fn upload(&self, file: UploadFile, progress: Progress) -> RemoteResult<Value> {
        (self.0)(file, progress).await
    }
}

/// Wrap an async closure as an [`Uploader`]
pub fn uploader_fn<F, Fut>(f: F) -> Arc<dyn Uploader>
where
    F: Fn(UploadFile, Progress) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<Value>> + Send + 'static,
{
    Arc::new(UploaderFn(f))
}

/// A resolver over a fixed option list; searches match labels
/// case-insensitively and raw lookups match value or id.
pub struct StaticResolver {
    options: Vec<SelectOption>,
}

impl StaticResolver {
    pub fn new(options: Vec<SelectOption>) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, request: ResolveRequest) -> RemoteResult<Vec<SelectOption>> {
        Ok(match &request.input {
            ResolveInput::Search(None) => self.options.clone(),
            ResolveInput::Search(Some(term)) => {
                let term = term.to_lowercase();
                self.options
                    .iter()
                    .filter(|o| o.label.to_lowercase().contains(&term))
                    .cloned()
                    .collect()
            }
            ResolveInput::Raw(Value::Array(raws)) => self
                .options
                .iter()
                .filter(|o| raws.iter().any(|raw| o.represents(raw)))
                .cloned()
                .collect(),
            ResolveInput::Raw(raw) => self
                .options
                .iter()
                .filter(|o| o.represents(raw))
                .cloned()
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_message_finds_nested_message() {
        let err = RemoteError::new(
            Some(422),
            json!({"errors": [{"field": "code", "message": "Code already taken"}]}),
        );
        assert_eq!(err.user_message("fallback"), "Code already taken");
    }

    #[test]
    fn user_message_prefers_top_level() {
        let err = RemoteError::new(
            Some(400),
            json!({"detail": {"message": "inner"}, "message": "outer"}),
        );
        assert_eq!(err.user_message("fallback"), "outer");
    }

    #[test]
    fn user_message_falls_back() {
        let err = RemoteError::new(Some(500), json!("boom"));
        assert_eq!(err.user_message("Try again"), "Try again");
    }

    #[tokio::test]
    async fn static_resolver_search_and_raw() {
        let resolver = StaticResolver::new(vec![
            SelectOption::new("Steel", 1),
            SelectOption::new("Stone", 2),
            SelectOption::new("Wood", 3),
        ]);
        let found = resolver
            .resolve(ResolveRequest::search(
                Some("st".into()),
                json!({}),
                json!({}),
                "m".into(),
            ))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let raw = resolver
            .resolve(ResolveRequest::raw(json!([1, 3]), json!({}), "m".into()))
            .await
            .unwrap();
        let labels: Vec<_> = raw.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["Steel", "Wood"]);
    }

    #[tokio::test]
    async fn closure_adapters() {
        let submit = submit_fn(|payload: Value| async move { Ok(json!({"echo": payload})) });
        assert_eq!(
            submit.submit(json!(1)).await.unwrap(),
            json!({"echo": 1})
        );

        let loader = loader_fn(|| async { Err(RemoteError::message("down")) });
        assert_eq!(loader.load().await.unwrap_err().user_message(""), "down");
    }
}

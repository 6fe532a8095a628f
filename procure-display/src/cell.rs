//! Async display with the stale-response guard.

use std::sync::{Arc, Mutex, MutexGuard};

use procure_config::EngineConfig;
use procure_fields::{FieldSpec, LatestGuard, ResolveRequest, Resolver, Value};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::node::{format_value, resolved_node, DisplayNode};

/// Resolve a value once, without any guard.
///
/// Resolver failures render `Unavailable`; they are never returned.
pub async fn render(
    value: Option<&Value>,
    spec: &FieldSpec,
    resolver: Option<&dyn Resolver>,
    row: &Value,
    config: &EngineConfig,
) -> DisplayNode {
    let node = format_value(value, &spec.kind, config);
    let (true, Some(raw)) = (node.is_loading(), value) else {
        return node;
    };
    let Some(resolver) = resolver else {
        return DisplayNode::text(procure_fields::path::text_of(raw));
    };
    let request = ResolveRequest::raw(raw.clone(), row.clone(), spec.path());
    match resolver.resolve(request).await {
        Ok(options) => resolved_node(&spec.kind, raw, &options),
        Err(error) => {
            warn!(field = %spec.name, %error, "display resolver failed");
            DisplayNode::Unavailable {
                text: config.unavailable_text.clone(),
            }
        }
    }
}

struct CellInner {
    spec: FieldSpec,
    resolver: Option<Arc<dyn Resolver>>,
    config: Arc<EngineConfig>,
    guard: LatestGuard,
    current: Mutex<Option<Value>>,
    node: watch::Sender<DisplayNode>,
}

impl CellInner {
    fn current(&self) -> MutexGuard<'_, Option<Value>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One rendered cell whose value can change while lookups are in flight.
///
/// A resolver result is applied only if it was the latest request *and* the
/// cell still shows the value that produced it. Dropping the cell discards
/// every outstanding result.
pub struct DisplayCell {
    inner: Arc<CellInner>,
}

impl DisplayCell {
    pub fn new(
        spec: FieldSpec,
        resolver: Option<Arc<dyn Resolver>>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let initial = DisplayNode::Placeholder {
            text: config.placeholder.clone(),
        };
        let (node, _) = watch::channel(initial);
        Self {
            inner: Arc::new(CellInner {
                spec,
                resolver,
                config,
                guard: LatestGuard::new(),
                current: Mutex::new(None),
                node,
            }),
        }
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.inner.spec
    }

    /// The value currently shown
    pub fn value(&self) -> Option<Value> {
        self.inner.current().clone()
    }

    pub fn node(&self) -> DisplayNode {
        self.inner.node.borrow().clone()
    }

    /// Watch the rendered node
    pub fn subscribe(&self) -> watch::Receiver<DisplayNode> {
        self.inner.node.subscribe()
    }

    /// Show `value`; `row` is the record it belongs to, passed to the resolver.
    ///
    /// Setting the value already shown does nothing. Async kinds render
    /// `Loading` until the matching response arrives.
    pub fn set_value(&self, value: Value, row: &Value) {
        let mut current = self.inner.current();
        if current.as_ref() == Some(&value) {
            return;
        }
        *current = Some(value.clone());

        let node = format_value(Some(&value), &self.inner.spec.kind, &self.inner.config);
        let resolver = match (&self.inner.resolver, node.is_loading()) {
            (Some(resolver), true) => Arc::clone(resolver),
            (None, true) => {
                self.inner.guard.invalidate();
                self.inner
                    .node
                    .send_replace(DisplayNode::text(procure_fields::path::text_of(&value)));
                return;
            }
            (_, false) => {
                self.inner.guard.invalidate();
                self.inner.node.send_replace(node);
                return;
            }
        };

        let ticket = self.inner.guard.issue();
        self.inner.node.send_replace(node);
        drop(current);

        let inner = Arc::clone(&self.inner);
        let request = ResolveRequest::raw(value.clone(), row.clone(), inner.spec.path());
        tokio::spawn(async move {
            let result = resolver.resolve(request).await;

            let current = inner.current();
            if !inner.guard.is_current(ticket) || current.as_ref() != Some(&value) {
                trace!(field = %inner.spec.name, ?value, "discarding stale display response");
                return;
            }
            let node = match result {
                Ok(options) => resolved_node(&inner.spec.kind, &value, &options),
                Err(error) => {
                    warn!(field = %inner.spec.name, %error, "display resolver failed");
                    DisplayNode::Unavailable {
                        text: inner.config.unavailable_text.clone(),
                    }
                }
            };
            inner.node.send_replace(node);
            drop(current);
        });
    }

    /// Wait until the cell is no longer loading and return what it shows
    pub async fn settled(&self) -> DisplayNode {
        let mut rx = self.subscribe();
        let node = match rx.wait_for(|node| !node.is_loading()).await {
            Ok(node) => node.clone(),
            Err(_) => self.node(),
        };
        node
    }
}

impl Drop for DisplayCell {
    fn drop(&mut self) {
        self.inner.guard.invalidate();
    }
}

impl std::fmt::Debug for DisplayCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayCell")
            .field("field", &self.inner.spec.name)
            .field("node", &self.node())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procure_fields::{resolver_fn, FieldKind, RemoteError, ResolveInput, SelectOption};
    use serde_json::json;
    use std::time::Duration;

    fn badge() -> FieldSpec {
        FieldSpec::new(
            "status",
            "Status",
            FieldKind::BadgeApi {
                resolver: "statuses".into(),
            },
        )
    }

    /// 1 → "Red" after 500ms, 2 → "Blue" after 10ms, 9 → error
    fn slow_statuses() -> Arc<dyn Resolver> {
        resolver_fn(|request: ResolveRequest| async move {
            let ResolveInput::Raw(raw) = request.input else {
                return Ok(vec![]);
            };
            match raw.as_i64() {
                Some(1) => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(vec![SelectOption::new("Red", 1).with_color("red")])
                }
                Some(2) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(vec![SelectOption::new("Blue", 2).with_color("blue")])
                }
                _ => Err(RemoteError::new(Some(500), json!({"message": "boom"}))),
            }
        })
    }

    fn cell() -> DisplayCell {
        DisplayCell::new(
            badge(),
            Some(slow_statuses()),
            Arc::new(EngineConfig::default()),
        )
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn late_response_for_old_value_is_dropped() {
        let cell = cell();
        cell.set_value(json!(1), &json!({}));
        assert!(cell.node().is_loading());
        cell.set_value(json!(2), &json!({}));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cell.node().label(), "Blue");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            cell.node(),
            DisplayNode::Badge {
                label: "Blue".into(),
                color: Some("blue".into())
            }
        );
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn going_back_to_an_old_value_waits_for_the_new_request() {
        let cell = cell();
        cell.set_value(json!(1), &json!({}));
        cell.set_value(json!(2), &json!({}));
        cell.set_value(json!(1), &json!({}));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cell.node().is_loading(), "the response for 2 must not land");
        assert_eq!(cell.settled().await.label(), "Red");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn resolver_failure_renders_unavailable() {
        let cell = cell();
        cell.set_value(json!(9), &json!({}));
        assert_eq!(
            cell.settled().await,
            DisplayNode::Unavailable {
                text: "Unavailable".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sync_value_supersedes_pending_lookup() {
        let cell = cell();
        cell.set_value(json!(1), &json!({}));
        cell.set_value(Value::Null, &json!({}));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cell.node().label(), "N/A");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_cell_ignores_late_results() {
        let cell = cell();
        let rx = cell.subscribe();
        cell.set_value(json!(1), &json!({}));
        drop(cell);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.borrow().is_loading());
    }

    #[tokio::test]
    async fn render_resolves_once() {
        let config = EngineConfig::default();
        let resolver = slow_statuses();
        let node = render(
            Some(&json!(2)),
            &badge(),
            Some(resolver.as_ref()),
            &json!({}),
            &config,
        )
        .await;
        assert_eq!(node.label(), "Blue");

        let plain = render(
            Some(&json!("hello")),
            &FieldSpec::text("note", "Note"),
            None,
            &json!({}),
            &config,
        )
        .await;
        assert_eq!(plain, DisplayNode::text("hello"));
    }
}

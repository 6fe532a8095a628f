//! The form engine.
//!
//! A [`Form`] is one live editing session over a [`FormSpec`]. It owns the
//! value tree, per-field state and the mounted option sessions. Creating a
//! form mounts it; [`Form::destroy`] unmounts it. Nothing survives between
//! two forms built from the same spec.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use procure_config::EngineConfig;
use procure_fields::path;
use procure_fields::types::check_unique_names;
use procure_fields::{
    find_field, submit_fn, Bindings, FieldErrors, FieldPath, FieldSpec, FieldsError,
    RuleValidator, SubmitAction, ValidationSchema, Validator, Value, ValueSink,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::error::{FormError, Result};
use crate::options::OptionSession;
use crate::state::{FieldPhase, FieldState};

/// Called with the action's response after a successful submit
pub type SuccessCallback = Arc<dyn Fn(&Value) + Send + Sync>;
/// Called with the user-facing message after a failed submit
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One editable record: fields, initial values and validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormSpec {
    pub fields: Vec<FieldSpec>,
    /// Initial render and reset state
    #[serde(default)]
    pub default_values: Value,
    #[serde(default)]
    pub validation: ValidationSchema,
    /// Validate a field when it loses focus, not only on commit and submit
    #[serde(default)]
    pub validate_on_blur: bool,
}

impl FormSpec {
    pub fn new(fields: Vec<FieldSpec>, default_values: Value) -> Self {
        Self {
            fields,
            default_values,
            ..Self::default()
        }
    }

    pub fn with_validation(mut self, validation: ValidationSchema) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_validate_on_blur(mut self) -> Self {
        self.validate_on_blur = true;
        self
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let spec: FormSpec = serde_yaml_ng::from_str(yaml)?;
        check_unique_names(&spec.fields, "root")?;
        Ok(spec)
    }
}

pub(crate) struct FormState {
    pub(crate) values: Value,
    pub(crate) fields: BTreeMap<FieldPath, FieldState>,
    pub(crate) sessions: HashMap<FieldPath, Arc<OptionSession>>,
    pub(crate) submitting: bool,
    /// Running uploads by target path; cancelled when their item moves
    pub(crate) uploads: HashMap<FieldPath, CancellationToken>,
    pub(crate) destroyed: bool,
}

pub(crate) struct FormInner {
    pub(crate) id: Ulid,
    pub(crate) spec: FormSpec,
    pub(crate) bindings: Bindings,
    pub(crate) action: Arc<dyn SubmitAction>,
    pub(crate) validator: Arc<dyn Validator>,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) cancel: CancellationToken,
    pub(crate) state: Mutex<FormState>,
}

/// Handle to a mounted form. Clones share the same form.
#[derive(Clone)]
pub struct Form {
    pub(crate) inner: Arc<FormInner>,
}

impl std::fmt::Debug for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Form")
            .field("id", &self.inner.id)
            .field("fields", &self.inner.spec.fields.len())
            .finish()
    }
}

/// Builder for [`Form`]
pub struct FormBuilder {
    spec: FormSpec,
    bindings: Bindings,
    action: Option<Arc<dyn SubmitAction>>,
    validator: Option<Arc<dyn Validator>>,
    config: Arc<EngineConfig>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl FormBuilder {
    pub fn bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// The submit action. Without one, submit succeeds with the payload.
    pub fn action(mut self, action: Arc<dyn SubmitAction>) -> Self {
        self.action = Some(action);
        self
    }

    /// Replace the built-in rule evaluator
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn config(mut self, config: Arc<EngineConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Check the spec against the bindings and mount the form.
    ///
    /// Mounting starts the initial option load of every select field, so
    /// this must run inside a Tokio runtime.
    pub fn build(self) -> Result<Form> {
        check_unique_names(&self.spec.fields, "root")?;
        self.bindings.check(&self.spec.fields)?;
        let validator = match self.validator {
            Some(validator) => validator,
            None => Arc::new(RuleValidator::new(self.spec.validation.clone())?),
        };
        let action = self
            .action
            .unwrap_or_else(|| submit_fn(|payload: Value| async move { Ok(payload) }));

        let form = Form {
            inner: Arc::new(FormInner {
                id: Ulid::new(),
                state: Mutex::new(FormState {
                    values: self.spec.default_values.clone(),
                    fields: BTreeMap::new(),
                    sessions: HashMap::new(),
                    submitting: false,
                    uploads: HashMap::new(),
                    destroyed: false,
                }),
                spec: self.spec,
                bindings: self.bindings,
                action,
                validator,
                config: self.config,
                on_success: self.on_success,
                on_error: self.on_error,
                cancel: CancellationToken::new(),
            }),
        };

        {
            let mut state = form.state();
            form.mount_selects(&mut state, &form.inner.spec.fields, &FieldPath::root());
        }
        debug!(
            form = %form.inner.id,
            fields = form.inner.spec.fields.len(),
            "form mounted"
        );
        Ok(form)
    }
}

impl Form {
    pub fn builder(spec: FormSpec) -> FormBuilder {
        FormBuilder {
            spec,
            bindings: Bindings::new(),
            action: None,
            validator: None,
            config: Arc::new(EngineConfig::default()),
            on_success: None,
            on_error: None,
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FormState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn spec_at(&self, path: &FieldPath) -> Result<&FieldSpec> {
        find_field(&self.inner.spec.fields, path).ok_or_else(|| FormError::field_not_found(path))
    }

    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    pub fn spec(&self) -> &FormSpec {
        &self.inner.spec
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Snapshot of the whole value tree
    pub fn values(&self) -> Value {
        self.state().values.clone()
    }

    pub fn value(&self, path: impl Into<FieldPath>) -> Option<Value> {
        path::get(&self.state().values, &path.into()).cloned()
    }

    /// State of one field; untouched fields are `Pristine`
    pub fn field_state(&self, path: impl Into<FieldPath>) -> FieldState {
        self.state()
            .fields
            .get(&path.into())
            .cloned()
            .unwrap_or_default()
    }

    /// Current error message per field
    pub fn errors(&self) -> FieldErrors {
        self.state()
            .fields
            .iter()
            .filter_map(|(path, field)| field.error.clone().map(|e| (path.clone(), e)))
            .collect()
    }

    pub fn is_submitting(&self) -> bool {
        self.state().submitting
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    /// False while the form submits, while any upload runs, or after destroy
    pub fn can_submit(&self) -> bool {
        let state = self.state();
        !state.destroyed && !state.submitting && state.uploads.is_empty()
    }

    /// Commit `value` at `path`, validate it, then run its `on_change`
    /// derivation.
    ///
    /// Derivations may call `set_value` again. Cycles are not detected: a
    /// derivation chain that loops never returns.
    pub fn set_value(&self, path: impl Into<FieldPath>, value: Value) -> Result<()> {
        let path = path.into();
        let spec = self.spec_at(&path)?;
        {
            let mut guard = self.state();
            let state = &mut *guard;
            if state.destroyed {
                return Err(FormError::Destroyed);
            }
            self.commit(state, &path, spec, &value)?;
        }
        self.derive(&path, spec, &value);
        Ok(())
    }

    /// Write, validate and remount under the state lock. Writing never grows
    /// an array.
    pub(crate) fn commit(
        &self,
        state: &mut FormState,
        path: &FieldPath,
        spec: &FieldSpec,
        value: &Value,
    ) -> Result<()> {
        path::set(&mut state.values, path, value.clone()).map_err(|error| match error {
            FieldsError::IndexOutOfRange { path, index, len } => {
                FormError::IndexOutOfRange { path, index, len }
            }
            other => other.into(),
        })?;
        let error = self
            .inner
            .validator
            .validate_field(path, &spec.label, Some(value));
        let field = state.fields.entry(path.clone()).or_default();
        field.phase = FieldPhase::Dirty;
        field.validated(error);

        if let Some(array) = spec.kind.as_array() {
            // the whole array was replaced; its items are new mounts
            let inside = |p: &FieldPath| p.starts_with(path) && p != path;
            self.unmount_sessions(state, inside);
            self.cancel_uploads(state, inside);
            let len = value.as_array().map_or(0, Vec::len);
            for i in 0..len {
                self.mount_selects(state, &array.children, &path.index(i));
            }
        }
        debug!(form = %self.inner.id, path = %path, "value committed");
        Ok(())
    }

    pub(crate) fn derive(&self, path: &FieldPath, spec: &FieldSpec, value: &Value) {
        if let Some(name) = &spec.on_change {
            if let Some(derivation) = self.inner.bindings.get_derivation(name) {
                derivation.apply(path, value, self);
            }
        }
    }

    /// Append a copy of the array's `item_defaults`. Returns the new index.
    pub fn add_array_item(&self, path: impl Into<FieldPath>) -> Result<usize> {
        let path = path.into();
        let spec = self.spec_at(&path)?;
        let array = spec.kind.as_array().ok_or_else(|| FormError::NotAnArray {
            path: path.to_string(),
        })?;

        let mut guard = self.state();
        let state = &mut *guard;
        if state.destroyed {
            return Err(FormError::Destroyed);
        }
        let len = array_len(&state.values, &path);
        let within_limit = array.max_items.is_none_or(|max| len < max);
        if !within_limit || !self.guard_allows(array.can_add.as_deref(), &state.values, len) {
            debug!(path = %path, len, "add array item rejected");
            return Err(FormError::GuardRejected {
                path: path.to_string(),
                op: "add",
            });
        }

        path::array_mut(&mut state.values, &path)?.push(array.item_defaults.clone());
        self.revalidate(state, &path, spec);
        self.mount_selects(state, &array.children, &path.index(len));
        debug!(form = %self.inner.id, path = %path, index = len, "array item added");
        Ok(len)
    }

    /// Excise element `index`. Later items shift down by one: their field
    /// state moves with them and their option sessions are remounted at the
    /// new index. Returns the removed item.
    pub fn remove_array_item(&self, path: impl Into<FieldPath>, index: usize) -> Result<Value> {
        let path = path.into();
        let spec = self.spec_at(&path)?;
        let array = spec.kind.as_array().ok_or_else(|| FormError::NotAnArray {
            path: path.to_string(),
        })?;

        let mut guard = self.state();
        let state = &mut *guard;
        if state.destroyed {
            return Err(FormError::Destroyed);
        }
        let len = array_len(&state.values, &path);
        if index >= len {
            return Err(FormError::IndexOutOfRange {
                path: path.to_string(),
                index,
                len,
            });
        }
        let above_minimum = array.min_items.is_none_or(|min| len > min);
        if !above_minimum || !self.guard_allows(array.can_remove.as_deref(), &state.values, len) {
            debug!(path = %path, len, "remove array item rejected");
            return Err(FormError::GuardRejected {
                path: path.to_string(),
                op: "remove",
            });
        }

        let removed = path::array_mut(&mut state.values, &path)?.remove(index);

        let fields = std::mem::take(&mut state.fields);
        state.fields = fields
            .into_iter()
            .filter_map(|(p, field)| p.shift_after_removal(&path, index).map(|p| (p, field)))
            .collect();

        // no stable identity across removal: shifted items are fresh mounts
        let moved = |p: &FieldPath| p.index_under(&path).is_some_and(|i| i >= index);
        self.unmount_sessions(state, moved);
        self.cancel_uploads(state, moved);
        for i in index..len - 1 {
            self.mount_selects(state, &array.children, &path.index(i));
        }

        self.revalidate(state, &path, spec);
        debug!(form = %self.inner.id, path = %path, index, "array item removed");
        Ok(removed)
    }

    /// Mark `path` touched; validate it when the spec asks for blur validation
    pub fn blur(&self, path: impl Into<FieldPath>) -> Result<()> {
        let path = path.into();
        let spec = self.spec_at(&path)?;
        let mut guard = self.state();
        let state = &mut *guard;
        if state.destroyed {
            return Err(FormError::Destroyed);
        }
        let error = self.inner.spec.validate_on_blur.then(|| {
            self.inner
                .validator
                .validate_field(&path, &spec.label, path::get(&state.values, &path))
        });
        let field = state.fields.entry(path).or_default();
        field.touched = true;
        if let Some(error) = error {
            field.validated(error);
        }
        Ok(())
    }

    /// Back to `default_values`: field state cleared, dropdowns remounted
    pub fn reset(&self) -> Result<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        if state.destroyed {
            return Err(FormError::Destroyed);
        }
        state.values = self.inner.spec.default_values.clone();
        state.fields.clear();
        self.unmount_sessions(state, |_| true);
        self.cancel_uploads(state, |_| true);
        self.mount_selects(state, &self.inner.spec.fields, &FieldPath::root());
        debug!(form = %self.inner.id, "form reset");
        Ok(())
    }

    /// Unmount the form.
    ///
    /// Option sessions are cancelled and an in-flight submit resolves to
    /// `Discarded` without running callbacks. The submit request itself is
    /// left to finish. Idempotent.
    pub fn destroy(&self) {
        {
            let mut state = self.state();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            self.unmount_sessions(&mut state, |_| true);
            self.cancel_uploads(&mut state, |_| true);
        }
        self.inner.cancel.cancel();
        debug!(form = %self.inner.id, "form destroyed");
    }

    fn guard_allows(&self, name: Option<&str>, values: &Value, len: usize) -> bool {
        match name {
            None => true,
            Some(name) => self
                .inner
                .bindings
                .get_guard(name)
                .is_some_and(|guard| guard.allow(values, len)),
        }
    }

    fn revalidate(&self, state: &mut FormState, path: &FieldPath, spec: &FieldSpec) {
        let error = self
            .inner
            .validator
            .validate_field(path, &spec.label, path::get(&state.values, path));
        let field = state.fields.entry(path.clone()).or_default();
        field.phase = FieldPhase::Dirty;
        field.validated(error);
    }
}

fn array_len(values: &Value, path: &FieldPath) -> usize {
    path::get(values, path)
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

impl ValueSink for Form {
    fn value(&self, path: &FieldPath) -> Option<Value> {
        Form::value(self, path.clone())
    }

    fn set_value(&self, path: &FieldPath, value: Value) {
        if let Err(error) = Form::set_value(self, path.clone(), value) {
            warn!(path = %path, %error, "derived value rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procure_fields::{ArraySpec, Rule, SelectOption, StaticResolver};
    use serde_json::json;

    fn order_spec() -> FormSpec {
        FormSpec::new(
            vec![
                FieldSpec::text("code", "Code"),
                FieldSpec::number("total", "Total"),
                FieldSpec::array(
                    "items",
                    "Items",
                    ArraySpec::new(
                        vec![
                            FieldSpec::select("rawMaterialId", "Raw material", "rawMaterials"),
                            FieldSpec::number("quantity", "Quantity").with_on_change("sumTotal"),
                        ],
                        json!({"rawMaterialId": null, "quantity": 1}),
                    )
                    .with_max_items(3)
                    .with_min_items(1),
                ),
            ],
            json!({"code": "", "total": 1, "items": [{"rawMaterialId": null, "quantity": 1}]}),
        )
        .with_validation(
            ValidationSchema::new()
                .rule("code", Rule::required())
                .rule("items.*.quantity", Rule::min(1.0)),
        )
    }

    fn bindings() -> Bindings {
        Bindings::new()
            .resolver(
                "rawMaterials",
                Arc::new(StaticResolver::new(vec![
                    SelectOption::new("Steel", 1),
                    SelectOption::new("Copper", 2),
                ])),
            )
            .derivation(
                "sumTotal",
                |_: &FieldPath, _: &Value, sink: &dyn ValueSink| {
                    let total: f64 = sink
                        .value(&"items".into())
                        .and_then(|items| items.as_array().cloned())
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|item| item["quantity"].as_f64())
                        .sum();
                    sink.set_value(&"total".into(), json!(total));
                },
            )
    }

    fn form() -> Form {
        Form::builder(order_spec()).bindings(bindings()).build().unwrap()
    }

    #[tokio::test]
    async fn set_value_marks_dirty_and_validates() {
        let form = form();
        assert_eq!(form.field_state("code").phase, FieldPhase::Pristine);

        form.set_value("code", json!("")).unwrap();
        let state = form.field_state("code");
        assert_eq!(state.phase, FieldPhase::Invalid);
        assert_eq!(state.error.as_deref(), Some("Code is required"));

        form.set_value("code", json!("PO-1")).unwrap();
        assert_eq!(form.field_state("code").phase, FieldPhase::Valid);
        assert!(form.errors().is_empty());
    }

    #[tokio::test]
    async fn derivation_writes_sibling() {
        let form = form();
        form.add_array_item("items").unwrap();
        form.set_value("items.1.quantity", json!(4)).unwrap();
        assert_eq!(form.value("total"), Some(json!(5.0)));
    }

    #[tokio::test]
    async fn unknown_path_is_rejected() {
        let form = form();
        assert!(matches!(
            form.set_value("nope", json!(1)),
            Err(FormError::Fields(_))
        ));
        assert!(matches!(
            form.add_array_item("code"),
            Err(FormError::NotAnArray { .. })
        ));
    }

    #[tokio::test]
    async fn item_limits_are_enforced() {
        let form = form();
        assert!(matches!(
            form.remove_array_item("items", 0),
            Err(FormError::GuardRejected { op: "remove", .. })
        ));
        form.add_array_item("items").unwrap();
        form.add_array_item("items").unwrap();
        assert!(matches!(
            form.add_array_item("items"),
            Err(FormError::GuardRejected { op: "add", .. })
        ));
        assert!(matches!(
            form.remove_array_item("items", 7),
            Err(FormError::IndexOutOfRange { len: 3, .. })
        ));
    }

    #[tokio::test]
    async fn named_guard_sees_current_values() {
        let spec = FormSpec::new(
            vec![
                FieldSpec::text("locked", "Locked"),
                FieldSpec::array(
                    "lines",
                    "Lines",
                    ArraySpec::new(vec![FieldSpec::text("note", "Note")], json!({"note": ""}))
                        .with_can_add("unlocked"),
                ),
            ],
            json!({"locked": "no", "lines": []}),
        );
        let form = Form::builder(spec)
            .bindings(
                Bindings::new().guard("unlocked", |values: &Value, _: usize| values["locked"] == "no"),
            )
            .build()
            .unwrap();

        assert_eq!(form.add_array_item("lines").unwrap(), 0);
        form.set_value("locked", json!("yes")).unwrap();
        assert!(form.add_array_item("lines").is_err());
        assert_eq!(form.value("lines"), Some(json!([{"note": ""}])));
    }

    #[tokio::test]
    async fn removal_shifts_field_state() {
        let form = form();
        form.add_array_item("items").unwrap();
        form.add_array_item("items").unwrap();
        form.set_value("items.2.quantity", json!(0)).unwrap();
        assert_eq!(form.field_state("items.2.quantity").phase, FieldPhase::Invalid);

        form.remove_array_item("items", 1).unwrap();
        assert_eq!(form.field_state("items.1.quantity").phase, FieldPhase::Invalid);
        assert_eq!(form.field_state("items.2.quantity").phase, FieldPhase::Pristine);
    }

    #[tokio::test]
    async fn blur_validates_only_when_enabled() {
        let form = form();
        form.blur("code").unwrap();
        let state = form.field_state("code");
        assert!(state.touched);
        assert_eq!(state.error, None);

        let eager = Form::builder(order_spec().with_validate_on_blur())
            .bindings(bindings())
            .build()
            .unwrap();
        eager.blur("code").unwrap();
        assert_eq!(
            eager.field_state("code").error.as_deref(),
            Some("Code is required")
        );
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let form = form();
        form.set_value("code", json!("PO-9")).unwrap();
        form.add_array_item("items").unwrap();
        form.reset().unwrap();
        assert_eq!(form.values(), order_spec().default_values);
        assert_eq!(form.field_state("code").phase, FieldPhase::Pristine);
        assert_eq!(form.mounted_options(), vec![FieldPath::parse("items.0.rawMaterialId")]);
    }

    #[tokio::test]
    async fn destroyed_form_rejects_changes() {
        let form = form();
        form.destroy();
        form.destroy();
        assert!(form.is_destroyed());
        assert!(!form.can_submit());
        assert!(matches!(
            form.set_value("code", json!("x")),
            Err(FormError::Destroyed)
        ));
        assert!(form.mounted_options().is_empty());
    }

    #[tokio::test]
    async fn missing_binding_fails_build() {
        let err = Form::builder(order_spec()).build().unwrap_err();
        assert!(matches!(err, FormError::Fields(_)));
    }

    #[tokio::test]
    async fn spec_from_yaml() {
        let yaml = r#"
fields:
  - name: name
    label: Name
    type: { kind: text }
default_values:
  name: ""
validation:
  rules:
    name:
      - rule: required
"#;
        let spec = FormSpec::from_yaml(yaml).unwrap();
        let form = Form::builder(spec).build().unwrap();
        form.set_value("name", json!("")).unwrap();
        assert_eq!(form.errors().len(), 1);
    }
}

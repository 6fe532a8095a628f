//! Bindings: the named implementations a field tree refers to.
//!
//! Field specs stay plain data: a select field names its resolver, an array
//! names its guards, a field names the derivation to run on change. The host
//! registers the implementations here and hands the registry to each engine
//! instance. Nothing is looked up through globals.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{FieldsError, Result};
use crate::remote::{ArrayGuard, Derivation, Resolver, Uploader};
use crate::types::{FieldKind, FieldSpec};

/// Named resolvers, derivations, guards and uploaders.
#[derive(Clone, Default)]
pub struct Bindings {
    resolvers: HashMap<String, Arc<dyn Resolver>>,
    derivations: HashMap<String, Arc<dyn Derivation>>,
    guards: HashMap<String, Arc<dyn ArrayGuard>>,
    uploaders: HashMap<String, Arc<dyn Uploader>>,
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindings")
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .field("derivations", &self.derivations.keys().collect::<Vec<_>>())
            .field("guards", &self.guards.keys().collect::<Vec<_>>())
            .field("uploaders", &self.uploaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolver(mut self, name: impl Into<String>, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.insert(name.into(), resolver);
        self
    }

    pub fn derivation(
        mut self,
        name: impl Into<String>,
        derivation: impl Derivation + 'static,
    ) -> Self {
        self.derivations.insert(name.into(), Arc::new(derivation));
        self
    }

    pub fn guard(mut self, name: impl Into<String>, guard: impl ArrayGuard + 'static) -> Self {
        self.guards.insert(name.into(), Arc::new(guard));
        self
    }

    pub fn uploader(mut self, name: impl Into<String>, uploader: Arc<dyn Uploader>) -> Self {
        self.uploaders.insert(name.into(), uploader);
        self
    }

    pub fn get_resolver(&self, name: &str) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(name).cloned()
    }

    pub fn get_derivation(&self, name: &str) -> Option<Arc<dyn Derivation>> {
        self.derivations.get(name).cloned()
    }

    pub fn get_guard(&self, name: &str) -> Option<Arc<dyn ArrayGuard>> {
        self.guards.get(name).cloned()
    }

    pub fn get_uploader(&self, name: &str) -> Option<Arc<dyn Uploader>> {
        self.uploaders.get(name).cloned()
    }

    /// Verify every name the tree mentions is bound.
    pub fn check(&self, fields: &[FieldSpec]) -> Result<()> {
        for field in fields {
            let missing = |kind: &'static str, name: &str| FieldsError::MissingBinding {
                kind,
                name: name.to_string(),
                field: field.name.clone(),
            };

            if let Some(name) = field.kind.resolver() {
                if !self.resolvers.contains_key(name) {
                    return Err(missing("resolver", name));
                }
            }
            if let Some(name) = field.kind.uploader() {
                if !self.uploaders.contains_key(name) {
                    return Err(missing("uploader", name));
                }
            }
            if let Some(name) = &field.on_change {
                if !self.derivations.contains_key(name) {
                    return Err(missing("derivation", name));
                }
            }
            if let FieldKind::Array(array) = &field.kind {
                for name in array.can_add.iter().chain(array.can_remove.iter()) {
                    if !self.guards.contains_key(name) {
                        return Err(missing("guard", name));
                    }
                }
                self.check(&array.children)?;
            }
        }
        debug!(fields = fields.len(), "bindings verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StaticResolver;
    use crate::types::ArraySpec;
    use serde_json::{json, Value};

    fn tree() -> Vec<FieldSpec> {
        vec![FieldSpec::array(
            "items",
            "Items",
            ArraySpec::new(
                vec![FieldSpec::select("rawMaterialId", "Raw material", "rawMaterials")
                    .with_on_change("fillUnit")],
                json!({}),
            )
            .with_can_add("belowMax"),
        )]
    }

    #[test]
    fn check_reports_first_missing_name() {
        let bindings = Bindings::new()
            .resolver("rawMaterials", Arc::new(StaticResolver::new(vec![])))
            .guard("belowMax", |_: &Value, len: usize| len < 3);

        let err = bindings.check(&tree()).unwrap_err();
        match err {
            FieldsError::MissingBinding { kind, name, field } => {
                assert_eq!(kind, "derivation");
                assert_eq!(name, "fillUnit");
                assert_eq!(field, "rawMaterialId");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn check_passes_when_everything_is_bound() {
        let bindings = Bindings::new()
            .resolver("rawMaterials", Arc::new(StaticResolver::new(vec![])))
            .guard("belowMax", |_: &Value, len: usize| len < 3)
            .derivation(
                "fillUnit",
                |_: &crate::FieldPath, _: &Value, _: &dyn crate::ValueSink| {},
            );
        assert!(bindings.check(&tree()).is_ok());
        assert!(bindings.get_guard("belowMax").unwrap().allow(&json!({}), 2));
    }
}

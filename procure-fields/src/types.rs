//! Core field types shared by the form and table engines.
//!
//! A `FieldSpec` describes one form input or one table cell. Its `kind` is a
//! closed tagged union; kind-specific data (resolver names, array children)
//! lives on the variant. Everything serializes to/from YAML so field trees
//! can be declared as data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FieldsError, Result};
use crate::path::{FieldPath, Segment};

/// One choice returned by an option endpoint: `{id, label, value, slug, color}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectOption {
    pub label: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            id: None,
            slug: None,
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// Whether this option stands for `raw` (matched on value, then id)
    pub fn represents(&self, raw: &Value) -> bool {
        &self.value == raw || self.id.as_ref() == Some(raw)
    }
}

/// Shape of one ARRAY element plus the guards on the array's length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArraySpec {
    pub children: Vec<FieldSpec>,
    #[serde(default)]
    pub item_defaults: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    /// Name of a bound `ArrayGuard` consulted before adding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_add: Option<String>,
    /// Name of a bound `ArrayGuard` consulted before removing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_remove: Option<String>,
}

impl ArraySpec {
    pub fn new(children: Vec<FieldSpec>, item_defaults: Value) -> Self {
        Self {
            children,
            item_defaults,
            min_items: None,
            max_items: None,
            can_add: None,
            can_remove: None,
        }
    }

    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn with_min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn with_can_add(mut self, guard: impl Into<String>) -> Self {
        self.can_add = Some(guard.into());
        self
    }

    pub fn with_can_remove(mut self, guard: impl Into<String>) -> Self {
        self.can_remove = Some(guard.into());
        self
    }
}

/// The kind of a field. Decides the editor, the display and which
/// asynchronous lookups apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FieldKind {
    Text,
    Textarea,
    MultilineText,
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precision: Option<u32>,
    },
    Date,
    Boolean,
    Thumbnail,
    /// Choices come from a bound resolver
    SelectApiOption {
        resolver: String,
        #[serde(default)]
        multiple: bool,
    },
    /// Colored badge resolved from the raw value
    BadgeApi {
        resolver: String,
    },
    /// Link whose label is resolved; `href` may contain `{value}`
    Link {
        resolver: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        href: Option<String>,
    },
    Array(ArraySpec),
    /// Rendered by a host-provided component; the engines only carry the value
    Custom {
        component: String,
    },
    UploadFile {
        uploader: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        accept: Vec<String>,
    },
    UploadImage {
        uploader: String,
    },
}

impl FieldKind {
    /// Kinds whose display needs a resolver round-trip
    pub fn is_async_display(&self) -> bool {
        matches!(
            self,
            FieldKind::SelectApiOption { .. } | FieldKind::BadgeApi { .. } | FieldKind::Link { .. }
        )
    }

    pub fn resolver(&self) -> Option<&str> {
        match self {
            FieldKind::SelectApiOption { resolver, .. }
            | FieldKind::BadgeApi { resolver }
            | FieldKind::Link { resolver, .. } => Some(resolver),
            _ => None,
        }
    }

    pub fn uploader(&self) -> Option<&str> {
        match self {
            FieldKind::UploadFile { uploader, .. } | FieldKind::UploadImage { uploader } => {
                Some(uploader)
            }
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArraySpec> {
        match self {
            FieldKind::Array(spec) => Some(spec),
            _ => None,
        }
    }

    /// Stable tag used in logs and cache keys
    pub fn tag(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::MultilineText => "multiline-text",
            FieldKind::Number { .. } => "number",
            FieldKind::Date => "date",
            FieldKind::Boolean => "boolean",
            FieldKind::Thumbnail => "thumbnail",
            FieldKind::SelectApiOption { .. } => "select-api-option",
            FieldKind::BadgeApi { .. } => "badge-api",
            FieldKind::Link { .. } => "link",
            FieldKind::Array(_) => "array",
            FieldKind::Custom { .. } => "custom",
            FieldKind::UploadFile { .. } => "upload-file",
            FieldKind::UploadImage { .. } => "upload-image",
        }
    }
}

fn default_span() -> u8 {
    24
}

/// A field specification: one input or one cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    /// Dotted path relative to the enclosing record or array item
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Grid columns out of 24; presentational only
    #[serde(default = "default_span")]
    pub span: u8,
    /// Name of a bound `Derivation` run after each commit to this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            span: default_span(),
            on_change: None,
            placeholder: None,
            disabled: false,
        }
    }

    pub fn text(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldKind::Text)
    }

    pub fn number(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldKind::Number { precision: None })
    }

    pub fn select(
        name: impl Into<String>,
        label: impl Into<String>,
        resolver: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            label,
            FieldKind::SelectApiOption {
                resolver: resolver.into(),
                multiple: false,
            },
        )
    }

    pub fn array(name: impl Into<String>, label: impl Into<String>, spec: ArraySpec) -> Self {
        Self::new(name, label, FieldKind::Array(spec))
    }

    pub fn with_span(mut self, span: u8) -> Self {
        self.span = span;
        self
    }

    pub fn with_on_change(mut self, derivation: impl Into<String>) -> Self {
        self.on_change = Some(derivation.into());
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// The field's name as a relative path
    pub fn path(&self) -> FieldPath {
        FieldPath::parse(&self.name)
    }
}

/// Find the spec addressed by a concrete path.
///
/// Names are matched relative to the enclosing scope; at an ARRAY field one
/// index segment is consumed and the search continues in its children.
pub fn find_field<'a>(fields: &'a [FieldSpec], path: &FieldPath) -> Option<&'a FieldSpec> {
    fields.iter().find_map(|field| {
        let rest = path.strip_prefix(&field.path())?;
        if rest.is_root() {
            return Some(field);
        }
        let array = field.kind.as_array()?;
        match rest.segments().split_first() {
            Some((Segment::Index(_), tail)) => {
                find_field(&array.children, &FieldPath::from_segments(tail))
            }
            _ => None,
        }
    })
}

/// Every concrete path the tree addresses in `values`, depth first.
///
/// ARRAY fields contribute their own path followed by the paths of each
/// existing element.
pub fn expand_paths<'a>(
    fields: &'a [FieldSpec],
    values: &Value,
    base: &FieldPath,
) -> Vec<(FieldPath, &'a FieldSpec)> {
    let mut out = Vec::new();
    for field in fields {
        let path = base.join(&field.path());
        out.push((path.clone(), field));
        if let FieldKind::Array(array) = &field.kind {
            let len = crate::path::get(values, &path)
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            for i in 0..len {
                out.extend(expand_paths(&array.children, values, &path.index(i)));
            }
        }
    }
    out
}

/// Reject trees where two fields in the same scope share a name.
pub fn check_unique_names(fields: &[FieldSpec], scope: &str) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for field in fields {
        if !seen.insert(field.name.as_str()) {
            return Err(FieldsError::DuplicateFieldName {
                name: field.name.clone(),
                scope: scope.to_string(),
            });
        }
        if let FieldKind::Array(array) = &field.kind {
            check_unique_names(&array.children, &format!("{scope}.{}[*]", field.name))?;
        }
    }
    Ok(())
}

/// Parse a YAML list of field specifications
pub fn parse_fields_yaml(yaml: &str) -> Result<Vec<FieldSpec>> {
    let fields: Vec<FieldSpec> = serde_yaml_ng::from_str(yaml)?;
    check_unique_names(&fields, "root")?;
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::text("code", "Code"),
            FieldSpec::text("supplier.name", "Supplier"),
            FieldSpec::array(
                "items",
                "Items",
                ArraySpec::new(
                    vec![
                        FieldSpec::select("rawMaterialId", "Raw material", "rawMaterials"),
                        FieldSpec::number("quantity", "Quantity"),
                    ],
                    json!({"rawMaterialId": null, "quantity": 1}),
                ),
            ),
        ]
    }

    #[test]
    fn find_top_level_and_nested_name() {
        let fields = order_fields();
        assert_eq!(find_field(&fields, &"code".into()).unwrap().label, "Code");
        assert_eq!(
            find_field(&fields, &"supplier.name".into()).unwrap().label,
            "Supplier"
        );
        assert!(find_field(&fields, &"supplier".into()).is_none());
    }

    #[test]
    fn find_inside_array_items() {
        let fields = order_fields();
        let spec = find_field(&fields, &"items.3.quantity".into()).unwrap();
        assert_eq!(spec.label, "Quantity");
        assert_eq!(find_field(&fields, &"items".into()).unwrap().kind.tag(), "array");
        assert!(find_field(&fields, &"items.quantity".into()).is_none());
    }

    #[test]
    fn expand_follows_array_length() {
        let fields = order_fields();
        let values = json!({"code": "PO-1", "items": [{}, {}]});
        let paths: Vec<String> = expand_paths(&fields, &values, &FieldPath::root())
            .into_iter()
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "code",
                "supplier.name",
                "items",
                "items.0.rawMaterialId",
                "items.0.quantity",
                "items.1.rawMaterialId",
                "items.1.quantity",
            ]
        );
    }

    #[test]
    fn sibling_items_may_reuse_names() {
        let fields = order_fields();
        assert!(check_unique_names(&fields, "root").is_ok());

        let mut dup = order_fields();
        dup.push(FieldSpec::text("code", "Again"));
        assert!(matches!(
            check_unique_names(&dup, "root"),
            Err(FieldsError::DuplicateFieldName { .. })
        ));
    }

    #[test]
    fn kind_helpers() {
        let badge = FieldKind::BadgeApi {
            resolver: "statuses".into(),
        };
        assert!(badge.is_async_display());
        assert_eq!(badge.resolver(), Some("statuses"));
        assert!(!FieldKind::Date.is_async_display());
        assert_eq!(
            FieldKind::UploadImage {
                uploader: "images".into()
            }
            .uploader(),
            Some("images")
        );
    }

    #[test]
    fn yaml_field_tree() {
        let yaml = r#"
- name: name
  label: Name
  type:
    kind: text
- name: items
  label: Items
  span: 24
  type:
    kind: array
    item_defaults:
      rawMaterialId: null
      quantity: 1
    max_items: 10
    can_add: belowBudget
    children:
      - name: rawMaterialId
        label: Raw material
        span: 12
        on_change: fillUnit
        type:
          kind: select-api-option
          resolver: rawMaterials
      - name: quantity
        label: Quantity
        type:
          kind: number
          precision: 2
"#;
        let fields = parse_fields_yaml(yaml).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].span, 24);
        let array = fields[1].kind.as_array().unwrap();
        assert_eq!(array.max_items, Some(10));
        assert_eq!(array.can_add.as_deref(), Some("belowBudget"));
        assert_eq!(array.children[0].on_change.as_deref(), Some("fillUnit"));
        assert_eq!(array.children[0].kind.resolver(), Some("rawMaterials"));
        assert_eq!(array.item_defaults, json!({"rawMaterialId": null, "quantity": 1}));
    }

    #[test]
    fn yaml_rejects_duplicate_names() {
        let yaml = r#"
- name: name
  label: Name
  type: { kind: text }
- name: name
  label: Again
  type: { kind: textarea }
"#;
        assert!(parse_fields_yaml(yaml).is_err());
    }

    #[test]
    fn option_represents_value_or_id() {
        let option = SelectOption {
            id: Some(json!(5)),
            ..SelectOption::new("Steel", "steel")
        };
        assert!(option.represents(&json!("steel")));
        assert!(option.represents(&json!(5)));
        assert!(!option.represents(&json!(6)));
    }
}

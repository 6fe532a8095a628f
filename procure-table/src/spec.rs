//! Declarative list configuration

use procure_fields::types::check_unique_names;
use procure_fields::{FieldPath, FieldSpec};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};

/// One list: where its rows come from and how they are shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Cache identity shared with the mutations that invalidate this list
    pub source_key: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub row_actions: Vec<ActionSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_buttons: Vec<ActionSpec>,
    /// Overrides the configured page size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

impl TableSpec {
    pub fn new(source_key: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            source_key: source_key.into(),
            columns,
            filters: Vec::new(),
            row_actions: Vec::new(),
            extra_buttons: Vec::new(),
            page_size: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_row_action(mut self, action: ActionSpec) -> Self {
        self.row_actions.push(action);
        self
    }

    pub fn with_extra_button(mut self, action: ActionSpec) -> Self {
        self.extra_buttons.push(action);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let spec: TableSpec = serde_yaml_ng::from_str(yaml)?;
        spec.check()?;
        Ok(spec)
    }

    /// Column and filter names must be unique
    pub fn check(&self) -> Result<()> {
        let columns: Vec<FieldSpec> = self.columns.iter().map(|c| c.field.clone()).collect();
        check_unique_names(&columns, "columns")?;
        let filters: Vec<FieldSpec> = self.filters.iter().map(|f| f.field.clone()).collect();
        check_unique_names(&filters, "filters")?;
        Ok(())
    }

    pub fn column(&self, key: &str) -> Result<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.field.name == key)
            .ok_or_else(|| TableError::UnknownColumn {
                column: key.to_string(),
            })
    }
}

/// A column is a field rendered as a cell; `name` is the dotted path into
/// the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(flatten)]
    pub field: FieldSpec,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sortable: bool,
}

impl ColumnSpec {
    pub fn new(field: FieldSpec) -> Self {
        Self {
            field,
            sortable: false,
        }
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn path(&self) -> FieldPath {
        self.field.path()
    }
}

impl From<FieldSpec> for ColumnSpec {
    fn from(field: FieldSpec) -> Self {
        Self::new(field)
    }
}

/// How a filter value is compared with the row value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    #[default]
    Eq,
    /// Case-insensitive substring
    Contains,
    Gte,
    Lte,
    /// Filter value is a list; the row value must be one of them
    In,
    /// Filter value is `[low, high]`, both inclusive; either end may be null
    Between,
}

/// One input of the filter bar. The filter's `name` keys its value in the
/// filter form; `column` is the row path it narrows (defaults to `name`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(flatten)]
    pub field: FieldSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default)]
    pub comparator: Comparator,
}

impl FilterSpec {
    pub fn new(field: FieldSpec, comparator: Comparator) -> Self {
        Self {
            field,
            column: None,
            comparator,
        }
    }

    pub fn on_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Path of the row value this filter narrows
    pub fn column_path(&self) -> FieldPath {
        match &self.column {
            Some(column) => FieldPath::parse(column),
            None => self.field.path(),
        }
    }
}

/// A row action or toolbar button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub id: String,
    pub label: String,
    /// Session flag required to show the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    /// Name of a bound row predicate; row actions only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl ActionSpec {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            permission: None,
            when: None,
        }
    }

    pub fn requires(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn when(mut self, predicate: impl Into<String>) -> Self {
        self.when = Some(predicate.into());
        self
    }
}

/// Sort order of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

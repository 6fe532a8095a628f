//! The list engine.
//!
//! A [`Table`] reads its rows from the shared [`QueryCache`], narrows them
//! with the filter values, orders and pages them, all without another
//! loader call. Only `load` and `refetch` reach the backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use procure_common::Permissions;
use procure_config::EngineConfig;
use procure_display::{DisplayCell, DisplayNode};
use procure_fields::path;
use procure_fields::{submit_fn, Bindings, FieldPath, FieldSpec, Loader, Resolver, Value};
use procure_forms::{Form, FormSpec};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{QueryCache, Rows};
use crate::error::{Result, TableError};
use crate::filter::{apply_filters, sort_rows};
use crate::spec::{ActionSpec, SortDirection, TableSpec};

/// Decides whether a row action applies to a row
pub type RowPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Where the pager stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// 1-based
    pub page: usize,
    pub page_size: usize,
    /// Rows left after filtering
    pub total: usize,
    /// Never less than one
    pub pages: usize,
}

struct TableState {
    source_key: String,
    filter_values: Value,
    page: usize,
    page_size: usize,
    sort: Option<(FieldPath, SortDirection)>,
    error: Option<String>,
    /// One cell per (page slot, column), reused across pages
    cells: Vec<Vec<Arc<DisplayCell>>>,
}

struct TableInner {
    spec: TableSpec,
    loader: Arc<dyn Loader>,
    cache: QueryCache,
    bindings: Bindings,
    permissions: Permissions,
    config: Arc<EngineConfig>,
    predicates: HashMap<String, RowPredicate>,
    /// Resolver per column, same order as `spec.columns`
    resolvers: Vec<Option<Arc<dyn Resolver>>>,
    state: Mutex<TableState>,
}

/// Handle to a mounted list. Clones share the same list.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("source_key", &self.source_key())
            .field("columns", &self.inner.spec.columns.len())
            .finish()
    }
}

/// Builder for [`Table`]
pub struct TableBuilder {
    spec: TableSpec,
    loader: Option<Arc<dyn Loader>>,
    cache: Option<QueryCache>,
    bindings: Bindings,
    permissions: Permissions,
    config: Arc<EngineConfig>,
    predicates: HashMap<String, RowPredicate>,
}

impl TableBuilder {
    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Share a cache with the containers that invalidate this list.
    /// Without one the table gets a private cache.
    pub fn cache(mut self, cache: QueryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn config(mut self, config: Arc<EngineConfig>) -> Self {
        self.config = config;
        self
    }

    /// Bind a row predicate referenced by an action's `when`
    pub fn predicate(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicates.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn build(self) -> Result<Table> {
        self.spec.check()?;
        let loader = self.loader.ok_or_else(|| TableError::MissingLoader {
            source_key: self.spec.source_key.clone(),
        })?;

        let columns: Vec<FieldSpec> = self.spec.columns.iter().map(|c| c.field.clone()).collect();
        self.bindings.check(&columns)?;
        let filters: Vec<FieldSpec> = self.spec.filters.iter().map(|f| f.field.clone()).collect();
        self.bindings.check(&filters)?;
        for action in &self.spec.row_actions {
            if let Some(name) = &action.when {
                if !self.predicates.contains_key(name) {
                    return Err(TableError::MissingPredicate {
                        name: name.clone(),
                        action: action.id.clone(),
                    });
                }
            }
        }

        let resolvers = columns
            .iter()
            .map(|field| {
                field
                    .kind
                    .resolver()
                    .and_then(|name| self.bindings.get_resolver(name))
            })
            .collect();
        let page_size = self.spec.page_size.unwrap_or(self.config.page_size).max(1);

        debug!(
            source_key = %self.spec.source_key,
            columns = columns.len(),
            page_size,
            "table mounted"
        );
        Ok(Table {
            inner: Arc::new(TableInner {
                state: Mutex::new(TableState {
                    source_key: self.spec.source_key.clone(),
                    filter_values: Value::Object(Default::default()),
                    page: 1,
                    page_size,
                    sort: None,
                    error: None,
                    cells: Vec::new(),
                }),
                spec: self.spec,
                loader,
                cache: self.cache.unwrap_or_default(),
                bindings: self.bindings,
                permissions: self.permissions,
                config: self.config,
                predicates: self.predicates,
                resolvers,
            }),
        })
    }
}

impl Table {
    pub fn builder(spec: TableSpec) -> TableBuilder {
        TableBuilder {
            spec,
            loader: None,
            cache: None,
            bindings: Bindings::new(),
            permissions: Permissions::new(),
            config: Arc::new(EngineConfig::default()),
            predicates: HashMap::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn spec(&self) -> &TableSpec {
        &self.inner.spec
    }

    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    pub fn source_key(&self) -> String {
        self.state().source_key.clone()
    }

    /// Point the table at another query. The next `load` reads that key's
    /// cache entry, calling the loader only if it is missing or stale.
    pub fn set_source_key(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state();
        if state.source_key != key {
            debug!(from = %state.source_key, to = %key, "source key changed");
            state.source_key = key;
            state.page = 1;
            state.error = None;
        }
    }

    /// Rows for the current source key, from cache when fresh.
    ///
    /// A failed load sets the page-level error and keeps earlier rows
    /// visible; it is returned as [`TableError::Load`].
    pub async fn load(&self) -> Result<Rows> {
        let key = self.source_key();
        let result = self
            .inner
            .cache
            .load(&key, Arc::clone(&self.inner.loader))
            .await;
        self.settle_load(key, result)
    }

    /// Invalidate this table's key and load again
    pub async fn refetch(&self) -> Result<Rows> {
        let key = self.source_key();
        let result = self
            .inner
            .cache
            .refetch(&key, Arc::clone(&self.inner.loader))
            .await;
        self.settle_load(key, result)
    }

    fn settle_load(
        &self,
        key: String,
        result: std::result::Result<Rows, procure_fields::RemoteError>,
    ) -> Result<Rows> {
        let mut state = self.state();
        if state.source_key != key {
            debug!(source_key = %key, "source key changed while loading");
        }
        match result {
            Ok(rows) => {
                if state.source_key == key {
                    state.error = None;
                }
                Ok(rows)
            }
            Err(error) => {
                let message = error.user_message(&self.inner.config.submit_error_fallback);
                warn!(source_key = %key, %error, "table load failed");
                if state.source_key == key {
                    state.error = Some(message.clone());
                }
                Err(TableError::Load {
                    source_key: key,
                    message,
                    error,
                })
            }
        }
    }

    /// Mark this table's rows stale; the next `load` refetches
    pub fn invalidate(&self) {
        self.inner.cache.invalidate(&self.source_key());
    }

    /// Page-level load error, if the last load failed
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.cache.is_fetching(&self.source_key())
    }

    /// Every cached row, unfiltered
    pub fn rows(&self) -> Rows {
        self.inner
            .cache
            .rows(&self.source_key())
            .unwrap_or_default()
    }

    /// Replace the filter values and go back to the first page
    pub fn apply_filters(&self, values: Value) {
        let mut state = self.state();
        debug!(source_key = %state.source_key, "filters applied");
        state.filter_values = values;
        state.page = 1;
    }

    pub fn clear_filters(&self) {
        self.apply_filters(Value::Object(Default::default()));
    }

    pub fn filter_values(&self) -> Value {
        self.state().filter_values.clone()
    }

    /// Rows after filtering and sorting
    pub fn visible_rows(&self) -> Vec<Value> {
        let rows = self.rows();
        let state = self.state();
        let mut visible = apply_filters(&rows, &self.inner.spec.filters, &state.filter_values);
        if let Some((column, direction)) = &state.sort {
            sort_rows(&mut visible, column, *direction);
        }
        visible
    }

    /// The current page of visible rows
    pub fn page_rows(&self) -> Vec<Value> {
        let visible = self.visible_rows();
        let Pagination {
            page, page_size, ..
        } = self.pagination_for(visible.len());
        visible
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect()
    }

    pub fn pagination(&self) -> Pagination {
        let total = self.visible_rows().len();
        self.pagination_for(total)
    }

    fn pagination_for(&self, total: usize) -> Pagination {
        let state = self.state();
        let pages = total.div_ceil(state.page_size).max(1);
        Pagination {
            page: state.page.clamp(1, pages),
            page_size: state.page_size,
            total,
            pages,
        }
    }

    /// Go to `page` (1-based), clamped to the available pages
    pub fn set_page(&self, page: usize) -> usize {
        let pages = self.pagination().pages;
        let page = page.clamp(1, pages);
        self.state().page = page;
        page
    }

    /// Change the page size and go back to the first page
    pub fn set_page_size(&self, page_size: usize) {
        let mut state = self.state();
        state.page_size = page_size.max(1);
        state.page = 1;
    }

    pub fn set_sort(&self, column: &str, direction: SortDirection) -> Result<()> {
        let column = self.inner.spec.column(column)?;
        if !column.sortable {
            return Err(TableError::NotSortable {
                column: column.field.name.clone(),
            });
        }
        self.state().sort = Some((column.path(), direction));
        Ok(())
    }

    pub fn clear_sort(&self) {
        self.state().sort = None;
    }

    /// Show the current page in the cell grid and return what each cell
    /// displays right now. Async cells may still be loading.
    pub fn render_page(&self) -> Vec<Vec<DisplayNode>> {
        self.render_cells()
            .iter()
            .map(|cells| cells.iter().map(|cell| cell.node()).collect())
            .collect()
    }

    /// Like [`Table::render_page`], waiting for every async cell to settle
    pub async fn render_page_settled(&self) -> Vec<Vec<DisplayNode>> {
        let grid = self.render_cells();
        let mut nodes = Vec::with_capacity(grid.len());
        for cells in &grid {
            nodes.push(join_all(cells.iter().map(|cell| cell.settled())).await);
        }
        nodes
    }

    fn render_cells(&self) -> Vec<Vec<Arc<DisplayCell>>> {
        let rows = self.page_rows();
        let columns = &self.inner.spec.columns;
        let mut state = self.state();

        state.cells.truncate(rows.len());
        while state.cells.len() < rows.len() {
            let cells = columns
                .iter()
                .zip(&self.inner.resolvers)
                .map(|(column, resolver)| {
                    Arc::new(DisplayCell::new(
                        column.field.clone(),
                        resolver.clone(),
                        Arc::clone(&self.inner.config),
                    ))
                })
                .collect();
            state.cells.push(cells);
        }

        for (row, cells) in rows.iter().zip(&state.cells) {
            for (column, cell) in columns.iter().zip(cells) {
                let value = path::get(row, &column.path())
                    .cloned()
                    .unwrap_or(Value::Null);
                cell.set_value(value, row);
            }
        }
        state.cells.clone()
    }

    /// Row actions offered for `row`: permitted by the session and, when the
    /// action names a predicate, accepted by it.
    pub fn row_actions(&self, row: &Value) -> Vec<ActionSpec> {
        self.inner
            .spec
            .row_actions
            .iter()
            .filter(|action| self.inner.permissions.allows_opt(action.permission.as_deref()))
            .filter(|action| {
                action.when.as_ref().is_none_or(|name| {
                    self.inner
                        .predicates
                        .get(name)
                        .is_some_and(|predicate| predicate(row))
                })
            })
            .cloned()
            .collect()
    }

    /// Toolbar buttons the session may use
    pub fn extra_buttons(&self) -> Vec<ActionSpec> {
        self.inner
            .spec
            .extra_buttons
            .iter()
            .filter(|action| self.inner.permissions.allows_opt(action.permission.as_deref()))
            .cloned()
            .collect()
    }

    /// A form over the filter fields, seeded with the current filter values.
    /// Submitting it applies the values to this table.
    pub fn filter_form(&self) -> Result<Form> {
        let fields = self
            .inner
            .spec
            .filters
            .iter()
            .map(|f| f.field.clone())
            .collect();
        let spec = FormSpec::new(fields, self.filter_values());
        let table = self.clone();
        let form = Form::builder(spec)
            .bindings(self.inner.bindings.clone())
            .config(Arc::clone(&self.inner.config))
            .action(submit_fn(move |values: Value| {
                let table = table.clone();
                async move {
                    table.apply_filters(values.clone());
                    Ok(values)
                }
            }))
            .build()?;
        Ok(form)
    }
}

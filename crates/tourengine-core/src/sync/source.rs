//! Record source: the generic query interface to the remote data store
//!
//! The sync engine only ever talks to the server through [`RecordSource`].
//! Two implementations ship with the crate:
//!
//! - [`RestRecordSource`] - PostgREST-style HTTP API via reqwest
//! - [`MemoryRecordSource`] - in-memory tables, loadable from JSON, used by
//!   tests and by the CLI fixture mode

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{TourError, TourResult};

/// Comparison applied by a [`Filter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::In => "in",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
        }
    }
}

/// A single column predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    /// For [`FilterOp::In`] this is a JSON array of candidates
    pub value: Value,
}

impl Filter {
    /// Whether `row` satisfies this predicate.
    pub fn matches(&self, row: &Value) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Neq => !values_equal(actual, &self.value),
            FilterOp::In => self
                .value
                .as_array()
                .map(|candidates| candidates.iter().any(|c| values_equal(actual, c)))
                .unwrap_or(false),
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }

    /// PostgREST operator expression, e.g. `eq.42` or `in.(a,b)`.
    fn to_param(&self) -> String {
        match (&self.op, &self.value) {
            (FilterOp::In, Value::Array(items)) => {
                let list: Vec<String> = items.iter().map(quote_list_item).collect();
                format!("in.({})", list.join(","))
            }
            (op, value) => format!("{}.{}", op.as_str(), scalar_param(value)),
        }
    }
}

/// Sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A select query against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    /// Columns to return; empty means all
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq, value)
    }

    pub fn in_list<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let list: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.filter(column, FilterOp::In, Value::Array(list))
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gt, value)
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt, value)
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lte, value)
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `row` satisfies every filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Query-string parameters in PostgREST form.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let select = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(",")
        };
        params.push(("select".to_string(), select));

        for filter in &self.filters {
            params.push((filter.column.clone(), filter.to_param()));
        }

        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect();
            params.push(("order".to_string(), order.join(",")));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

/// Generic record-query capability of the remote data store
///
/// Errors are reported as [`TourError::Network`]; implementations never retry.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn select(&self, query: &Query) -> TourResult<Vec<Value>>;

    /// Insert rows, returning them as stored.
    async fn insert(&self, table: &str, rows: Vec<Value>) -> TourResult<Vec<Value>>;

    /// Apply `patch` to every row matching `query`, returning the updated rows.
    async fn update(&self, query: &Query, patch: Value) -> TourResult<Vec<Value>>;

    /// Delete every row matching `query`, returning how many were removed.
    async fn delete(&self, query: &Query) -> TourResult<usize>;
}

/// Run `query` and deserialize every returned row.
pub async fn select_as<T: DeserializeOwned>(
    source: &dyn RecordSource,
    query: &Query,
) -> TourResult<Vec<T>> {
    source
        .select(query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(TourError::from))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP implementation
// ═══════════════════════════════════════════════════════════════════════════

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgREST-style record source
///
/// Requests go to `{base_url}/rest/v1/{table}` with the API key sent both as
/// `apikey` and as a bearer token.
pub struct RestRecordSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestRecordSource {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> TourResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TourError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send_for_rows(&self, request: reqwest::RequestBuilder) -> TourResult<Vec<Value>> {
        let response = request
            .send()
            .await
            .map_err(|e| TourError::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let url = response.url().to_string();
            return Err(TourError::Network(format!("HTTP {} from {}", status, url)));
        }

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| TourError::Network(format!("Failed to read response: {}", e)))
    }
}

#[async_trait]
impl RecordSource for RestRecordSource {
    async fn select(&self, query: &Query) -> TourResult<Vec<Value>> {
        debug!(table = %query.table, filters = query.filters.len(), "Selecting records");
        let request = self
            .request(reqwest::Method::GET, &query.table)
            .query(&query.to_params());
        self.send_for_rows(request).await
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> TourResult<Vec<Value>> {
        let request = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&rows);
        self.send_for_rows(request).await
    }

    async fn update(&self, query: &Query, patch: Value) -> TourResult<Vec<Value>> {
        let filters: Vec<(String, String)> = query
            .filters
            .iter()
            .map(|f| (f.column.clone(), f.to_param()))
            .collect();
        let request = self
            .request(reqwest::Method::PATCH, &query.table)
            .header("Prefer", "return=representation")
            .query(&filters)
            .json(&patch);
        self.send_for_rows(request).await
    }

    async fn delete(&self, query: &Query) -> TourResult<usize> {
        let filters: Vec<(String, String)> = query
            .filters
            .iter()
            .map(|f| (f.column.clone(), f.to_param()))
            .collect();
        let request = self
            .request(reqwest::Method::DELETE, &query.table)
            .header("Prefer", "return=representation")
            .query(&filters);
        Ok(self.send_for_rows(request).await?.len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// In-memory implementation
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory record source
///
/// Tables can be made to fail on demand, and every call can be delayed, so
/// tests can exercise failure and overlap behaviour of the sync engine.
#[derive(Default)]
pub struct MemoryRecordSource {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    failing: RwLock<HashSet<String>>,
    latency: RwLock<Option<Duration>>,
}

impl MemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object mapping table names to arrays of rows.
    pub fn from_json(dataset: Value) -> TourResult<Self> {
        let Value::Object(tables) = dataset else {
            return Err(TourError::Config(
                "record dataset must be an object of table arrays".to_string(),
            ));
        };

        let source = Self::new();
        for (table, rows) in tables {
            let Value::Array(rows) = rows else {
                return Err(TourError::Config(format!("table '{}' is not an array", table)));
            };
            source.tables.write().insert(table, rows);
        }
        Ok(source)
    }

    /// Load a JSON dataset from disk.
    pub fn from_path(path: impl AsRef<Path>) -> TourResult<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_json(serde_json::from_slice(&data)?)
    }

    /// Append rows to a table without going through the trait.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make every request against `table` fail with a network error.
    pub fn fail_table(&self, table: &str) {
        self.failing.write().insert(table.to_string());
    }

    pub fn heal_table(&self, table: &str) {
        self.failing.write().remove(table);
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(Vec::len).unwrap_or(0)
    }

    async fn enter(&self, table: &str) -> TourResult<()> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.read().contains(table) {
            return Err(TourError::Network(format!("table '{}' unavailable", table)));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn select(&self, query: &Query) -> TourResult<Vec<Value>> {
        self.enter(&query.table).await?;

        let tables = self.tables.read();
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        drop(tables);

        for order in query.order.iter().rev() {
            rows.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                )
                .unwrap_or(Ordering::Equal);
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        if !query.columns.is_empty() {
            rows = rows
                .into_iter()
                .map(|row| project(row, &query.columns))
                .collect();
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> TourResult<Vec<Value>> {
        self.enter(table).await?;
        self.seed(table, rows.clone());
        Ok(rows)
    }

    async fn update(&self, query: &Query, patch: Value) -> TourResult<Vec<Value>> {
        self.enter(&query.table).await?;
        let Value::Object(patch) = patch else {
            return Err(TourError::InvalidOperation(
                "update patch must be an object".to_string(),
            ));
        };

        let mut tables = self.tables.write();
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(&query.table) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                if let Value::Object(fields) = row {
                    for (k, v) in &patch {
                        fields.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> TourResult<usize> {
        self.enter(&query.table).await?;
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(&query.table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !query.matches(r));
        Ok(before - rows.len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Value helpers
// ═══════════════════════════════════════════════════════════════════════════

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        // Nulls sort last, as in PostgreSQL ascending order
        (Value::Null, _) => Some(Ordering::Greater),
        (_, Value::Null) => Some(Ordering::Less),
        _ => None,
    }
}

fn project(row: Value, columns: &[String]) -> Value {
    match row {
        Value::Object(mut fields) => {
            let mut projected = Map::new();
            for column in columns {
                if let Some(v) = fields.remove(column) {
                    projected.insert(column.clone(), v);
                }
            }
            Value::Object(projected)
        }
        other => other,
    }
}

fn scalar_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote_list_item(value: &Value) -> String {
    let raw = scalar_param(value);
    if raw.contains([',', '(', ')', '"']) {
        format!("\"{}\"", raw.replace('"', "\\\""))
    } else {
        raw
    }
}

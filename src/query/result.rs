//! Result Shaping
//!
//! The warehouse returns flat tabular rows; downstream consumers expect a
//! nested aggregation document in the legacy API shape
//! (`{aggregations: {<name>: {buckets: […]}}}`). Each registered
//! [`ResultProcessor`] is a pure transform from the cached sub-query
//! results into that document; the session folds them in registration
//! order at finalize time.

use crate::query::drilldown::DrilldownState;
use crate::query::error::{QueryError, QueryResult};
use crate::query::time::{fill_time_buckets, time_bucket, Interval, TimeRange};
use crate::warehouse::QueryResponse;
use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

/// One cached sub-query result: column labels plus row-major cells
#[derive(Debug, Clone, Default)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    /// Find a column by label, ignoring case (the warehouse upper-cases
    /// labels)
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    fn require_column(&self, query: &str, name: &str) -> QueryResult<usize> {
        self.column_index(name)
            .ok_or_else(|| QueryError::MissingColumn {
                query: query.to_string(),
                column: name.to_string(),
            })
    }
}

impl From<QueryResponse> for TabularResult {
    fn from(response: QueryResponse) -> Self {
        Self {
            columns: response
                .column_metas
                .into_iter()
                .map(|meta| meta.label)
                .collect(),
            rows: response.results,
        }
    }
}

/// Read-only view over all cached sub-query results
pub struct QueryResults<'a>(pub &'a HashMap<String, TabularResult>);

impl QueryResults<'_> {
    pub fn get(&self, name: &str) -> QueryResult<&TabularResult> {
        self.0
            .get(name)
            .ok_or_else(|| QueryError::MissingSubQuery(name.to_string()))
    }
}

/// A cell's string content; the warehouse returns most cells as strings
pub fn cell_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Lenient integer coercion: strings parse, fractions truncate, anything
/// else counts as zero
pub fn cell_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Lenient float coercion, same rules as [`cell_i64`]
pub fn cell_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Fetch one cell by column index
///
/// The warehouse may return rows shorter than `columnMetas`; a cell past
/// the row's end reads as NULL, so the lenient coercions above turn it
/// into an empty string or zero.
pub fn cell(row: &[Value], idx: usize) -> &Value {
    static NULL: Value = Value::Null;
    row.get(idx).unwrap_or(&NULL)
}

/// A registered result transform
///
/// Each variant consumes specific sub-query results and writes one or more
/// named aggregations into the shared document. Processors hold owned
/// copies of whatever session state they need, so applying them is a pure
/// function of the cached results.
#[derive(Debug, Clone)]
pub enum ResultProcessor {
    /// Reshape the `drilldown` sub-query into prefix-keyed buckets
    Drilldown { state: DrilldownState },
    /// Per-path time series for the top drilldown paths
    TopPathsOverTime {
        state: DrilldownState,
        top_path_indexes: HashMap<String, usize>,
        interval: Interval,
        range: TimeRange,
    },
    /// Flat hits-per-interval time series
    HitsOverTime { interval: Interval, range: TimeRange },
    /// Terms aggregation: top buckets, missing count, optional distinct
    /// count
    Terms {
        field: String,
        terms_name: String,
        missing_name: String,
        value_count_name: Option<String>,
    },
    /// Exact distinct count standing in for the legacy cardinality
    /// estimate
    Cardinality { agg_name: String },
    /// Per-user hit counts with most-recent request timestamps
    UserStats,
    /// Average response time over the default sub-query
    ResponseTimeAverage,
}

impl ResultProcessor {
    /// Apply this transform to the cached results, writing into the
    /// aggregation document
    pub fn apply(&self, results: &QueryResults, doc: &mut Map<String, Value>) -> QueryResult<()> {
        match self {
            Self::Drilldown { state } => apply_drilldown(state, results, doc),
            Self::TopPathsOverTime {
                state,
                top_path_indexes,
                interval,
                range,
            } => apply_top_paths_over_time(state, top_path_indexes, *interval, range, results, doc),
            Self::HitsOverTime { interval, range } => {
                apply_hits_over_time(*interval, range, results, doc)
            }
            Self::Terms {
                field,
                terms_name,
                missing_name,
                value_count_name,
            } => apply_terms(field, terms_name, missing_name, value_count_name.as_deref(), results, doc),
            Self::Cardinality { agg_name } => {
                let result = results.get(agg_name)?;
                let count = single_count(result, agg_name, "distinct_count")?;
                doc.insert(agg_name.clone(), json!({ "value": count }));
                Ok(())
            }
            Self::UserStats => apply_user_stats(results, doc),
            Self::ResponseTimeAverage => {
                let result = results.get("default")?;
                let idx = result.require_column("default", "average_response_time")?;
                let value = result
                    .rows
                    .first()
                    .map(|row| cell_f64(cell(row, idx)))
                    .unwrap_or(0.0);
                doc.insert("average_response_time".to_string(), json!({ "value": value }));
                Ok(())
            }
        }
    }
}

fn apply_drilldown(
    state: &DrilldownState,
    results: &QueryResults,
    doc: &mut Map<String, Value>,
) -> QueryResult<()> {
    let result = results.get("drilldown")?;
    let hits_idx = result.require_column("drilldown", "hits")?;
    let field_indexes = hierarchy_indexes(state, result, "drilldown")?;

    let mut buckets = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let values: Vec<String> = field_indexes.iter().map(|&i| cell_str(cell(row, i))).collect();
        buckets.push(json!({
            "key": state.prefix_key(&values),
            "doc_count": cell_i64(cell(row, hits_idx)),
        }));
    }

    doc.insert("drilldown".to_string(), json!({ "buckets": buckets }));
    Ok(())
}

fn apply_top_paths_over_time(
    state: &DrilldownState,
    top_path_indexes: &HashMap<String, usize>,
    interval: Interval,
    range: &TimeRange,
    results: &QueryResults,
    doc: &mut Map<String, Value>,
) -> QueryResult<()> {
    struct Slot {
        key: String,
        doc_count: i64,
        time_buckets: BTreeMap<i64, Value>,
    }

    let name = "top_path_hits_over_time";
    let result = results.get(name)?;
    let hits_idx = result.require_column(name, "hits")?;
    let interval_idx = result.require_column(name, "interval_field")?;
    let depth_idx = result.require_column(name, state.depth_field())?;
    let field_indexes = hierarchy_indexes(state, result, name)?;

    // One slot per top path, in overall-traffic order, so the heaviest
    // path stays at a stable position in the output.
    let mut slots: Vec<Option<Slot>> = (0..top_path_indexes.len()).map(|_| None).collect();

    for row in &result.rows {
        let path_value = cell_str(cell(row, depth_idx));
        let Some(&slot_idx) = top_path_indexes.get(&path_value) else {
            continue;
        };

        let hits = cell_i64(cell(row, hits_idx));
        let time = interval.parse_key(&cell_str(cell(row, interval_idx)))?;

        let slot = slots[slot_idx].get_or_insert_with(|| {
            let values: Vec<String> =
                field_indexes.iter().map(|&i| cell_str(cell(row, i))).collect();
            Slot {
                key: state.prefix_key(&values),
                doc_count: 0,
                time_buckets: BTreeMap::new(),
            }
        });
        slot.doc_count += hits;
        slot.time_buckets
            .insert(time.timestamp(), time_bucket(time, hits));
    }

    let buckets: Vec<Value> = slots
        .into_iter()
        .flatten()
        .map(|slot| {
            json!({
                "key": slot.key,
                "doc_count": slot.doc_count,
                "drilldown_over_time": {
                    "buckets": fill_time_buckets(&slot.time_buckets, range, interval),
                },
            })
        })
        .collect();

    doc.insert(name.to_string(), json!({ "buckets": buckets }));
    Ok(())
}

fn apply_hits_over_time(
    interval: Interval,
    range: &TimeRange,
    results: &QueryResults,
    doc: &mut Map<String, Value>,
) -> QueryResult<()> {
    let name = "hits_over_time";
    let result = results.get(name)?;
    let hits_idx = result.require_column(name, "hits")?;
    let interval_idx = result.require_column(name, "interval_field")?;

    let mut time_buckets = BTreeMap::new();
    for row in &result.rows {
        let time = interval.parse_key(&cell_str(cell(row, interval_idx)))?;
        time_buckets.insert(
            time.timestamp(),
            time_bucket(time, cell_i64(cell(row, hits_idx))),
        );
    }

    doc.insert(
        name.to_string(),
        json!({ "buckets": fill_time_buckets(&time_buckets, range, interval) }),
    );
    Ok(())
}

fn apply_terms(
    field: &str,
    terms_name: &str,
    missing_name: &str,
    value_count_name: Option<&str>,
    results: &QueryResults,
    doc: &mut Map<String, Value>,
) -> QueryResult<()> {
    let top = results.get(terms_name)?;
    let field_idx = top.require_column(terms_name, field)?;
    let hits_idx = top.require_column(terms_name, "hits")?;

    let buckets: Vec<Value> = top
        .rows
        .iter()
        .map(|row| {
            json!({
                "key": cell_str(cell(row, field_idx)),
                "doc_count": cell_i64(cell(row, hits_idx)),
            })
        })
        .collect();
    doc.insert(terms_name.to_string(), json!({ "buckets": buckets }));

    let missing = results.get(missing_name)?;
    let count = single_count(missing, missing_name, "hits")?;
    doc.insert(missing_name.to_string(), json!({ "doc_count": count }));

    if let Some(name) = value_count_name {
        let distinct = results.get(name)?;
        let count = single_count(distinct, name, "distinct_count")?;
        doc.insert(name.to_string(), json!({ "value": count }));
    }

    Ok(())
}

fn apply_user_stats(results: &QueryResults, doc: &mut Map<String, Value>) -> QueryResult<()> {
    let result = results.get("default")?;
    let hits_idx = result.require_column("default", "hits")?;
    let last_idx = result.require_column("default", "last_request_at")?;
    let user_idx = result.require_column("default", "user_id")?;

    let mut buckets = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let last_request_ms = cell_i64(cell(row, last_idx));
        let as_string = Utc
            .timestamp_millis_opt(last_request_ms)
            .single()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();

        buckets.push(json!({
            "key": cell_str(cell(row, user_idx)),
            "doc_count": cell_i64(cell(row, hits_idx)),
            "last_request_at": {
                "value": cell_f64(cell(row, last_idx)),
                "value_as_string": as_string,
            },
        }));
    }

    doc.insert("user_stats".to_string(), json!({ "buckets": buckets }));
    Ok(())
}

fn hierarchy_indexes(
    state: &DrilldownState,
    result: &TabularResult,
    query: &str,
) -> QueryResult<Vec<usize>> {
    state
        .fields
        .iter()
        .map(|field| result.require_column(query, field))
        .collect()
}

fn single_count(result: &TabularResult, query: &str, column: &str) -> QueryResult<i64> {
    let idx = result.require_column(query, column)?;
    Ok(result
        .rows
        .first()
        .map(|row| cell_i64(cell(row, idx)))
        .unwrap_or(0))
}

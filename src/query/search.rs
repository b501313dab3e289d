//! Search Session
//!
//! One [`LogSearch`] owns one analytics request from start to finish: verb
//! calls accumulate SQL clauses and aggregation directives, named
//! sub-queries execute (memoized) against the warehouse, and
//! [`LogSearch::result`] folds the registered processors into the final
//! aggregation document.
//!
//! # Execution Pipeline
//!
//! ```text
//! Options → verbs (filters, aggregations) → sub-queries → processors → document
//! ```
//!
//! Sessions are never shared: a session is built, driven, and consumed by
//! a single logical request, so sub-queries run strictly sequentially and
//! each named sub-query hits the network at most once.

use crate::query::drilldown::DrilldownState;
use crate::query::error::{QueryError, QueryResult};
use crate::query::result::{cell, cell_str, QueryResults, ResultProcessor, TabularResult};
use crate::query::rules::{rule_set_predicate, RuleSet};
use crate::query::time::{Interval, TimeRange};
use crate::sql::{self, SqlClauses};
use crate::warehouse::QueryTransport;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// How many drilldown paths the over-time breakdown follows
const TOP_PATH_COUNT: usize = 10;

/// Result cap for terms-style aggregations
const REGION_TERMS_SIZE: usize = 500;

/// Request parameters for one search session
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Range start: RFC 3339, `YYYY-MM-DD HH:MM:SS`, or a bare date
    pub start_time: String,
    /// Range end; a bare date means end of that day, a future end clamps
    /// to now
    pub end_time: String,
    /// Time-bucketing granularity token (hour/day/month)
    pub interval: Option<String>,
    /// Region token: "world", "US", "US-XX", or a country code
    pub region: Option<String>,
}

/// Sort orders for the user-stats aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatsOrder {
    CountAscending,
    CountDescending,
    LastRequestAscending,
    LastRequestDescending,
}

impl UserStatsOrder {
    fn order_by(&self) -> &'static str {
        match self {
            Self::CountAscending => "hits ASC",
            Self::CountDescending => "hits DESC",
            Self::LastRequestAscending => "last_request_at ASC",
            Self::LastRequestDescending => "last_request_at DESC",
        }
    }
}

/// A single analytics query session against the log warehouse
pub struct LogSearch {
    transport: Arc<dyn QueryTransport>,
    table: String,
    time_range: TimeRange,
    interval: Option<Interval>,
    region: Option<String>,
    country: Option<String>,
    state: Option<String>,
    clauses: SqlClauses,
    results: HashMap<String, TabularResult>,
    processors: Vec<ResultProcessor>,
    drilldown: Option<DrilldownState>,
}

impl LogSearch {
    /// Create a session, normalizing the time range and validating the
    /// interval token up front
    pub fn new(
        transport: Arc<dyn QueryTransport>,
        table: impl Into<String>,
        options: &SearchOptions,
    ) -> QueryResult<Self> {
        let time_range = TimeRange::parse(&options.start_time, &options.end_time)?;
        let interval = options
            .interval
            .as_deref()
            .map(Interval::from_token)
            .transpose()?;

        Ok(Self {
            transport,
            table: table.into(),
            time_range,
            interval,
            region: options.region.clone(),
            country: None,
            state: None,
            clauses: SqlClauses::new(),
            results: HashMap::new(),
            processors: Vec::new(),
            drilldown: None,
        })
    }

    /// The normalized query time range
    pub fn time_range(&self) -> &TimeRange {
        &self.time_range
    }

    /// The validated interval, if one was requested
    pub fn interval(&self) -> Option<Interval> {
        self.interval
    }

    /// Country resolved by region dispatch, if any
    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    /// State resolved by region dispatch, if any
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    // ============================================
    // Filters
    // ============================================

    /// Append one rule tree as a parenthesized predicate group
    ///
    /// Successive calls combine with AND across groups.
    pub fn filter_by_rules(&mut self, set: &RuleSet) -> QueryResult<()> {
        if let Some(predicate) = rule_set_predicate(set)? {
            self.clauses.where_.push(predicate);
        }
        Ok(())
    }

    /// Constrain every sub-query to the session's date range
    pub fn filter_by_date_range(&mut self) {
        let (start, end) = self.time_range.date_bounds();
        self.clauses.where_.push(format!(
            "request_at_date >= {} AND request_at_date <= {}",
            sql::quote_str(&start),
            sql::quote_str(&end)
        ));
    }

    /// Constrain to one exact request path
    pub fn filter_by_request_path(&mut self, path: &str) {
        self.clauses
            .where_
            .push(format!("request_url_path = {}", sql::quote_str(path)));
    }

    /// Constrain to one API key (case preserved)
    pub fn filter_by_api_key(&mut self, api_key: &str) {
        self.clauses
            .where_
            .push(format!("api_key = {}", sql::quote_str(api_key)));
    }

    /// Constrain to one user's traffic
    pub fn filter_by_user(&mut self, user_email: &str) {
        self.clauses
            .where_
            .push(format!("user_email = {}", sql::quote_str(user_email)));
    }

    /// Constrain to a set of user ids
    pub fn filter_by_user_ids(&mut self, user_ids: &[String]) {
        if !user_ids.is_empty() {
            self.clauses.where_.push(sql::in_list("user_id", user_ids));
        }
    }

    // ============================================
    // Execution
    // ============================================

    /// Execute one named sub-query, merging the session's persistent
    /// clauses with `scoped`
    ///
    /// Memoized by name: a repeated name returns the cached result without
    /// touching the network.
    pub async fn execute_query(&mut self, name: &str, scoped: SqlClauses) -> QueryResult<()> {
        if self.results.contains_key(name) {
            return Ok(());
        }

        let statement = self.clauses.compose(&self.table, &scoped);
        tracing::info!(query = name, sql = %statement, "executing warehouse query");

        let response = self.transport.submit(&statement).await?;
        self.results
            .insert(name.to_string(), TabularResult::from(response));
        Ok(())
    }

    fn cached(&self, name: &str) -> QueryResult<&TabularResult> {
        self.results
            .get(name)
            .ok_or_else(|| QueryError::MissingSubQuery(name.to_string()))
    }

    /// Finalize the session: run the default sub-query if nothing executed
    /// yet, then fold all registered processors in order into the output
    /// document
    pub async fn result(mut self) -> QueryResult<Value> {
        if self.results.is_empty() {
            self.execute_query("default", SqlClauses::new()).await?;
        }

        let mut aggregations = serde_json::Map::new();
        let results = QueryResults(&self.results);
        for processor in &self.processors {
            processor.apply(&results, &mut aggregations)?;
        }

        Ok(json!({ "aggregations": aggregations }))
    }

    // ============================================
    // Aggregations
    // ============================================

    /// Hierarchical path drilldown at the prefix's depth, ordered by hit
    /// count
    pub async fn aggregate_by_drilldown(&mut self, prefix: &str) -> QueryResult<()> {
        let state = DrilldownState::from_prefix(prefix);

        let mut scoped = state.common.clone();
        scoped.order_by.push("hits DESC".to_string());
        self.execute_query("drilldown", scoped).await?;

        self.processors.push(ResultProcessor::Drilldown {
            state: state.clone(),
        });
        self.drilldown = Some(state);
        Ok(())
    }

    /// Time breakdown of the top drilldown paths plus interval grand
    /// totals
    ///
    /// Requires [`LogSearch::aggregate_by_drilldown`] to have run. The
    /// "Other" remainder (total minus top paths) is left to the caller.
    pub async fn aggregate_by_drilldown_over_time(&mut self) -> QueryResult<()> {
        let state = self.drilldown.clone().ok_or(QueryError::DrilldownNotExecuted)?;
        let interval = self.interval.ok_or(QueryError::MissingInterval)?;

        // Top paths come out of the drilldown result already ordered by
        // hit count; their index fixes the output ordering.
        let (top_paths, top_path_indexes) = {
            let result = self.cached("drilldown")?;
            let depth_idx = result
                .column_index(state.depth_field())
                .ok_or_else(|| QueryError::MissingColumn {
                    query: "drilldown".to_string(),
                    column: state.depth_field().to_string(),
                })?;

            let mut top_paths = Vec::new();
            let mut top_path_indexes = HashMap::new();
            for (index, row) in result.rows.iter().take(TOP_PATH_COUNT).enumerate() {
                let value = cell_str(cell(row, depth_idx));
                top_path_indexes.insert(value.clone(), index);
                // The host-level marker slash is an output convention; the
                // stored host value has no trailing slash.
                let matched = if state.depth == 0 {
                    value.strip_suffix('/').map(str::to_string).unwrap_or(value)
                } else {
                    value
                };
                top_paths.push(matched);
            }
            (top_paths, top_path_indexes)
        };

        let mut top_scoped = state.common.clone();
        top_scoped
            .select
            .push(format!("{} AS interval_field", interval.sql_expr()));
        if top_paths.is_empty() {
            // No drilldown rows at all; keep the sub-query valid and empty.
            top_scoped.where_.push("1 = 0".to_string());
        } else {
            top_scoped
                .where_
                .push(sql::in_list(state.depth_field(), &top_paths));
        }
        top_scoped.group_by.push(interval.sql_expr().to_string());
        top_scoped.order_by.push("interval_field".to_string());
        self.execute_query("top_path_hits_over_time", top_scoped)
            .await?;

        // Grand totals per interval: drop the deepest hierarchy level so
        // rows sum across paths instead of splitting by them.
        let mut all_scoped = state.common.clone();
        all_scoped.select.pop();
        all_scoped.group_by.pop();
        all_scoped
            .select
            .push(format!("{} AS interval_field", interval.sql_expr()));
        all_scoped.group_by.push(interval.sql_expr().to_string());
        all_scoped.order_by.push("interval_field".to_string());
        self.execute_query("hits_over_time", all_scoped).await?;

        let range = self.time_range;
        self.processors.push(ResultProcessor::TopPathsOverTime {
            state,
            top_path_indexes,
            interval,
            range,
        });
        self.processors
            .push(ResultProcessor::HitsOverTime { interval, range });
        Ok(())
    }

    /// Plain hits-per-interval time series over the whole filtered set
    pub async fn aggregate_by_interval(&mut self) -> QueryResult<()> {
        let interval = self.interval.ok_or(QueryError::MissingInterval)?;

        let mut scoped = SqlClauses::new();
        scoped.select.push("COUNT(*) AS hits".to_string());
        scoped
            .select
            .push(format!("{} AS interval_field", interval.sql_expr()));
        scoped.group_by.push(interval.sql_expr().to_string());
        scoped.order_by.push("interval_field".to_string());
        self.execute_query("hits_over_time", scoped).await?;

        self.processors.push(ResultProcessor::HitsOverTime {
            interval,
            range: self.time_range,
        });
        Ok(())
    }

    /// Geographic rollup driven by the session's region token
    ///
    /// `"world"` rolls up by country, `"US"` by state, `"US-XX"` by city
    /// within that state, and any other token by city within that country.
    pub async fn aggregate_by_region(&mut self) -> QueryResult<()> {
        let region = self.region.clone().ok_or(QueryError::MissingRegion)?;

        if region == "world" {
            self.aggregate_by_region_field("request_ip_country").await
        } else if region == "US" {
            self.country = Some(region.clone());
            self.filter_by_country(&region);
            self.aggregate_by_region_field("request_ip_region").await
        } else if let Some(state) = parse_us_state(&region) {
            self.country = Some("US".to_string());
            self.state = Some(state.clone());
            self.filter_by_country("US");
            self.clauses
                .where_
                .push(format!("request_ip_region = {}", sql::quote_str(&state)));
            self.aggregate_by_region_field("request_ip_city").await
        } else {
            self.country = Some(region.clone());
            self.filter_by_country(&region);
            self.aggregate_by_region_field("request_ip_city").await
        }
    }

    fn filter_by_country(&mut self, country: &str) {
        self.clauses
            .where_
            .push(format!("request_ip_country = {}", sql::quote_str(country)));
    }

    async fn aggregate_by_region_field(&mut self, field: &str) -> QueryResult<()> {
        self.terms_aggregation(
            field,
            REGION_TERMS_SIZE,
            "regions".to_string(),
            "missing_regions".to_string(),
            None,
        )
        .await
    }

    /// Top-N terms plus missing count plus exact distinct count
    ///
    /// The legacy backend inflated shard sizes to approximate a global
    /// top-N; a single SQL backend gives the exact answer directly.
    pub async fn aggregate_by_term(&mut self, field: &str, size: usize) -> QueryResult<()> {
        let plural = pluralize(field);
        self.terms_aggregation(
            field,
            size,
            format!("top_{plural}"),
            format!("missing_{plural}"),
            Some(format!("value_count_{plural}")),
        )
        .await
    }

    async fn terms_aggregation(
        &mut self,
        field: &str,
        size: usize,
        terms_name: String,
        missing_name: String,
        value_count_name: Option<String>,
    ) -> QueryResult<()> {
        let mut top = SqlClauses::new();
        top.select.push("COUNT(*) AS hits".to_string());
        top.select.push(field.to_string());
        top.where_.push(format!("{field} IS NOT NULL"));
        top.group_by.push(field.to_string());
        top.order_by.push("hits DESC".to_string());
        top.limit = Some(size);
        self.execute_query(&terms_name, top).await?;

        let mut missing = SqlClauses::new();
        missing.select.push("COUNT(*) AS hits".to_string());
        missing.where_.push(format!("{field} IS NULL"));
        self.execute_query(&missing_name, missing).await?;

        if let Some(name) = &value_count_name {
            let mut distinct = SqlClauses::new();
            distinct
                .select
                .push(format!("COUNT(DISTINCT {field}) AS distinct_count"));
            self.execute_query(name, distinct).await?;
        }

        self.processors.push(ResultProcessor::Terms {
            field: field.to_string(),
            terms_name,
            missing_name,
            value_count_name,
        });
        Ok(())
    }

    /// Exact distinct count, replacing the legacy approximate cardinality
    /// estimate
    pub async fn aggregate_by_cardinality(&mut self, field: &str) -> QueryResult<()> {
        let agg_name = format!("unique_{}", pluralize(field));

        let mut scoped = SqlClauses::new();
        scoped
            .select
            .push(format!("COUNT(DISTINCT {field}) AS distinct_count"));
        self.execute_query(&agg_name, scoped).await?;

        self.processors
            .push(ResultProcessor::Cardinality { agg_name });
        Ok(())
    }

    /// Top users by hit count plus distinct user count
    pub async fn aggregate_by_users(&mut self, size: usize) -> QueryResult<()> {
        self.aggregate_by_term("user_email", size).await?;
        self.aggregate_by_cardinality("user_email").await
    }

    /// Top client IPs by hit count plus distinct IP count
    pub async fn aggregate_by_request_ip(&mut self, size: usize) -> QueryResult<()> {
        self.aggregate_by_term("request_ip", size).await?;
        self.aggregate_by_cardinality("request_ip").await
    }

    /// Per-user hit count and most-recent request timestamp on the
    /// default sub-query
    pub fn aggregate_by_user_stats(&mut self, order: Option<UserStatsOrder>) {
        self.clauses.select.push("COUNT(*) AS hits".to_string());
        self.clauses
            .select
            .push("MAX(request_at) AS last_request_at".to_string());
        self.clauses.select.push("user_id".to_string());
        self.clauses.group_by.push("user_id".to_string());

        if let Some(order) = order {
            self.clauses.order_by.push(order.order_by().to_string());
        }

        self.processors.push(ResultProcessor::UserStats);
    }

    /// Average response time on the default sub-query
    pub fn aggregate_by_response_time_average(&mut self) {
        self.clauses
            .select
            .push("AVG(timer_response) AS average_response_time".to_string());
        self.processors.push(ResultProcessor::ResponseTimeAverage);
    }
}

fn parse_us_state(region: &str) -> Option<String> {
    let state = region.strip_prefix("US-")?;
    if state.len() == 2 && state.chars().all(|c| c.is_ascii_uppercase()) {
        Some(state.to_string())
    } else {
        None
    }
}

fn pluralize(field: &str) -> String {
    match field.strip_suffix('y') {
        Some(stem) => format!("{stem}ies"),
        None => format!("{field}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{ColumnMeta, QueryResponse, WarehouseError};
    use async_trait::async_trait;
    use serde_json::Value as Json;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&str) -> QueryResponse + Send + Sync>;

    struct MockTransport {
        log: Mutex<Vec<String>>,
        responder: Responder,
    }

    impl MockTransport {
        fn new(responder: Responder) -> Arc<Self> {
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
                responder,
            })
        }

        fn empty() -> Arc<Self> {
            Self::new(Box::new(|_| QueryResponse::default()))
        }

        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryTransport for MockTransport {
        async fn submit(&self, sql: &str) -> Result<QueryResponse, WarehouseError> {
            self.log.lock().unwrap().push(sql.to_string());
            Ok((self.responder)(sql))
        }
    }

    fn response(columns: &[&str], rows: Vec<Vec<Json>>) -> QueryResponse {
        QueryResponse {
            column_metas: columns
                .iter()
                .map(|label| ColumnMeta {
                    label: label.to_string(),
                })
                .collect(),
            results: rows,
        }
    }

    fn options() -> SearchOptions {
        SearchOptions {
            start_time: "2020-01-01".to_string(),
            end_time: "2020-01-03".to_string(),
            interval: Some("day".to_string()),
            region: None,
        }
    }

    fn session(transport: Arc<MockTransport>, options: &SearchOptions) -> LogSearch {
        LogSearch::new(transport, "api_umbrella.logs", options).unwrap()
    }

    #[tokio::test]
    async fn test_execute_query_is_memoized_by_name() {
        let transport = MockTransport::empty();
        let mut search = session(transport.clone(), &options());

        search
            .execute_query("default", SqlClauses::new())
            .await
            .unwrap();
        search
            .execute_query("default", SqlClauses::new())
            .await
            .unwrap();

        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_result_runs_default_when_nothing_executed() {
        let transport = MockTransport::empty();
        let mut search = session(transport.clone(), &options());
        search.filter_by_date_range();

        let document = search.result().await.unwrap();
        assert!(document["aggregations"].is_object());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("(request_at_date >= '2020-01-01' AND request_at_date <= '2020-01-03')"));
    }

    #[tokio::test]
    async fn test_rule_filters_append_parenthesized_groups() {
        let transport = MockTransport::empty();
        let mut search = session(transport.clone(), &options());

        let set: RuleSet = serde_json::from_str(
            r#"{"condition":"AND","rules":[{"field":"request_path","operator":"equal","value":"/API/"}]}"#,
        )
        .unwrap();
        search.filter_by_rules(&set).unwrap();
        search.filter_by_request_path("/exact");

        let _ = search.result().await.unwrap();
        let sql = &transport.calls()[0];
        assert!(sql.contains("((\"request_url_path\" = '/api/'))"));
        assert!(sql.contains("(request_url_path = '/exact')"));
    }

    #[tokio::test]
    async fn test_drilldown_host_level_query() {
        let transport = MockTransport::new(Box::new(|_| {
            response(
                &["HITS", "REQUEST_URL_HOST"],
                vec![vec![Json::from("10"), Json::from("example.com/")]],
            )
        }));
        let mut search = session(transport.clone(), &options());

        search.aggregate_by_drilldown("0/").await.unwrap();

        let sql = &transport.calls()[0];
        assert!(sql.contains(
            "GROUP BY request_url_host, CASE WHEN request_url_path_level1 \
             IS NULL THEN '' ELSE '/' END"
        ));
        assert!(sql.contains("ORDER BY hits DESC"));

        let document = search.result().await.unwrap();
        let buckets = document["aggregations"]["drilldown"]["buckets"]
            .as_array()
            .unwrap();
        assert_eq!(buckets[0]["key"], "0/example.com/");
        assert_eq!(buckets[0]["doc_count"], 10);
    }

    #[tokio::test]
    async fn test_drilldown_level_one_scopes_to_host() {
        let transport = MockTransport::empty();
        let mut search = session(transport.clone(), &options());

        search
            .aggregate_by_drilldown("1/example.com")
            .await
            .unwrap();

        let sql = &transport.calls()[0];
        assert!(sql.contains("(request_url_host = 'example.com')"));
        assert!(sql.contains("GROUP BY request_url_host, request_url_path_level1"));
    }

    #[tokio::test]
    async fn test_drilldown_over_time_document() {
        let transport = MockTransport::new(Box::new(|sql| {
            if sql.contains("interval_field") && sql.contains(" IN (") {
                // Per-path interval breakdown for the top paths
                response(
                    &["HITS", "REQUEST_URL_HOST", "INTERVAL_FIELD"],
                    vec![
                        vec![Json::from("6"), Json::from("example.com/"), Json::from("2020-01-01")],
                        vec![Json::from("4"), Json::from("example.com/"), Json::from("2020-01-03")],
                        vec![Json::from("5"), Json::from("other.org"), Json::from("2020-01-02")],
                    ],
                )
            } else if sql.contains("interval_field") {
                // Grand totals per interval
                response(
                    &["HITS", "INTERVAL_FIELD"],
                    vec![
                        vec![Json::from("8"), Json::from("2020-01-01")],
                        vec![Json::from("7"), Json::from("2020-01-02")],
                    ],
                )
            } else {
                response(
                    &["HITS", "REQUEST_URL_HOST"],
                    vec![
                        vec![Json::from("10"), Json::from("example.com/")],
                        vec![Json::from("5"), Json::from("other.org")],
                    ],
                )
            }
        }));
        let mut search = session(transport.clone(), &options());

        search.aggregate_by_drilldown("0/").await.unwrap();
        search.aggregate_by_drilldown_over_time().await.unwrap();

        // Host marker slashes are stripped before matching stored hosts.
        let calls = transport.calls();
        assert!(calls[1].contains("\"request_url_host\" IN ('example.com', 'other.org')"));
        // Grand totals drop the per-host select and grouping.
        assert!(calls[2].contains("GROUP BY request_at_date"));
        assert!(!calls[2].contains("GROUP BY request_url_host"));

        let document = search.result().await.unwrap();
        let aggregations = &document["aggregations"];

        let top = aggregations["top_path_hits_over_time"]["buckets"]
            .as_array()
            .unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0]["key"], "0/example.com/");
        assert_eq!(top[0]["doc_count"], 10);
        let series = top[0]["drilldown_over_time"]["buckets"].as_array().unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0]["doc_count"], 6);
        assert_eq!(series[1]["doc_count"], 0);
        assert_eq!(series[2]["doc_count"], 4);

        let totals = aggregations["hits_over_time"]["buckets"].as_array().unwrap();
        assert_eq!(totals.len(), 3);
        assert_eq!(totals[0]["doc_count"], 8);
        assert_eq!(totals[2]["doc_count"], 0);
    }

    #[tokio::test]
    async fn test_drilldown_over_time_requires_drilldown() {
        let transport = MockTransport::empty();
        let mut search = session(transport, &options());
        let err = search.aggregate_by_drilldown_over_time().await.unwrap_err();
        assert!(matches!(err, QueryError::DrilldownNotExecuted));
    }

    #[tokio::test]
    async fn test_region_us_state_filters_and_city_rollup() {
        let transport = MockTransport::new(Box::new(|sql| {
            if sql.contains("IS NOT NULL") {
                response(
                    &["HITS", "REQUEST_IP_CITY"],
                    vec![vec![Json::from("9"), Json::from("San Francisco")]],
                )
            } else {
                response(&["HITS"], vec![vec![Json::from("1")]])
            }
        }));

        let mut opts = options();
        opts.region = Some("US-CA".to_string());
        let mut search = session(transport.clone(), &opts);

        let rules: RuleSet = serde_json::from_str(
            r#"{"condition":"AND","rules":[{"field":"request_path","operator":"begins_with","value":"/api"}]}"#,
        )
        .unwrap();
        search.filter_by_rules(&rules).unwrap();
        search.filter_by_date_range();
        search.aggregate_by_region().await.unwrap();

        assert_eq!(search.country(), Some("US"));
        assert_eq!(search.state(), Some("CA"));

        let terms_sql = &transport.calls()[0];
        assert!(terms_sql.contains("(request_ip_country = 'US')"));
        assert!(terms_sql.contains("(request_ip_region = 'CA')"));
        assert!(terms_sql.contains("GROUP BY request_ip_city"));
        assert!(terms_sql.contains("LIMIT 500"));
        assert!(terms_sql.contains("\"request_url_path\" LIKE '/api%'"));

        let document = search.result().await.unwrap();
        let regions = &document["aggregations"]["regions"]["buckets"];
        assert_eq!(regions[0]["key"], "San Francisco");
        assert_eq!(regions[0]["doc_count"], 9);
        assert_eq!(document["aggregations"]["missing_regions"]["doc_count"], 1);
    }

    #[tokio::test]
    async fn test_region_world_rolls_up_by_country() {
        let transport = MockTransport::empty();
        let mut opts = options();
        opts.region = Some("world".to_string());
        let mut search = session(transport.clone(), &opts);

        search.aggregate_by_region().await.unwrap();

        assert!(search.country().is_none());
        assert!(transport.calls()[0].contains("GROUP BY request_ip_country"));
    }

    #[tokio::test]
    async fn test_term_aggregation_names_and_queries() {
        let transport = MockTransport::new(Box::new(|sql| {
            if sql.contains("DISTINCT") {
                response(&["DISTINCT_COUNT"], vec![vec![Json::from("4")]])
            } else if sql.contains("IS NULL") {
                response(&["HITS"], vec![vec![Json::from("2")]])
            } else {
                response(
                    &["HITS", "USER_EMAIL"],
                    vec![vec![Json::from("7"), Json::from("a@example.com")]],
                )
            }
        }));
        let mut search = session(transport.clone(), &options());

        search.aggregate_by_users(10).await.unwrap();

        let calls = transport.calls();
        // term + missing + value_count + cardinality
        assert_eq!(calls.len(), 4);
        assert!(calls[0].contains("LIMIT 10"));
        assert!(calls[3].contains("COUNT(DISTINCT user_email)"));

        let document = search.result().await.unwrap();
        let aggregations = &document["aggregations"];
        assert_eq!(aggregations["top_user_emails"]["buckets"][0]["key"], "a@example.com");
        assert_eq!(aggregations["missing_user_emails"]["doc_count"], 2);
        assert_eq!(aggregations["value_count_user_emails"]["value"], 4);
        assert_eq!(aggregations["unique_user_emails"]["value"], 4);
    }

    #[tokio::test]
    async fn test_user_stats_orders_and_reshapes() {
        let transport = MockTransport::new(Box::new(|_| {
            response(
                &["HITS", "LAST_REQUEST_AT", "USER_ID"],
                vec![vec![
                    Json::from("3"),
                    Json::from("1577923200000"),
                    Json::from("user-1"),
                ]],
            )
        }));
        let mut search = session(transport.clone(), &options());

        search.aggregate_by_user_stats(Some(UserStatsOrder::CountDescending));
        let document = search.result().await.unwrap();

        let sql = &transport.calls()[0];
        assert!(sql.contains("COUNT(*) AS hits, MAX(request_at) AS last_request_at, user_id"));
        assert!(sql.contains("GROUP BY user_id"));
        assert!(sql.contains("ORDER BY hits DESC"));

        let bucket = &document["aggregations"]["user_stats"]["buckets"][0];
        assert_eq!(bucket["key"], "user-1");
        assert_eq!(bucket["doc_count"], 3);
    }

    #[tokio::test]
    async fn test_aggregate_by_interval_densifies() {
        let transport = MockTransport::new(Box::new(|_| {
            response(
                &["HITS", "INTERVAL_FIELD"],
                vec![vec![Json::from("5"), Json::from("2020-01-02")]],
            )
        }));
        let mut search = session(transport.clone(), &options());

        search.aggregate_by_interval().await.unwrap();
        let document = search.result().await.unwrap();

        let buckets = document["aggregations"]["hits_over_time"]["buckets"]
            .as_array()
            .unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0]["doc_count"], 0);
        assert_eq!(buckets[1]["doc_count"], 5);
        assert_eq!(buckets[1]["key_as_string"], "2020-01-02T00:00:00Z");
    }

    #[test]
    fn test_unsupported_interval_fails_at_construction() {
        let transport = MockTransport::empty();
        let mut opts = options();
        opts.interval = Some("minute".to_string());
        let err = LogSearch::new(transport, "api_umbrella.logs", &opts)
            .err()
            .expect("minute must be rejected");
        assert!(matches!(err, QueryError::UnsupportedInterval(t) if t == "minute"));
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("user_email"), "user_emails");
        assert_eq!(pluralize("request_ip"), "request_ips");
        assert_eq!(pluralize("request_ip_country"), "request_ip_countries");
    }

    #[test]
    fn test_parse_us_state() {
        assert_eq!(parse_us_state("US-CA"), Some("CA".to_string()));
        assert_eq!(parse_us_state("US-ca"), None);
        assert_eq!(parse_us_state("FR"), None);
    }
}

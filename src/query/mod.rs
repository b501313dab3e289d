//! Loglens Query Engine
//!
//! Translates a declarative analytics request into warehouse SQL and
//! reshapes the tabular answers into the legacy aggregation document:
//!
//! - **Rules**: JSON rule tree → safe predicate fragments
//! - **Time**: range normalization, interval expressions, bucket filling
//! - **Drilldown**: hierarchical host/path breakdowns
//! - **Search**: the session driving sub-queries and processors
//! - **Result**: tabular results and the processor pipeline
//!
//! # Example
//!
//! ```rust,ignore
//! use loglens::query::{LogSearch, SearchOptions};
//!
//! let mut search = LogSearch::new(transport, "api_umbrella.logs", &SearchOptions {
//!     start_time: "2020-01-01".into(),
//!     end_time: "2020-01-07".into(),
//!     interval: Some("day".into()),
//!     region: None,
//! })?;
//!
//! search.filter_by_date_range();
//! search.aggregate_by_drilldown("1/example.com").await?;
//! search.aggregate_by_drilldown_over_time().await?;
//!
//! let document = search.result().await?;
//! ```

mod drilldown;
mod error;
mod result;
mod rules;
mod search;
mod time;

pub use drilldown::DrilldownState;
pub use error::{QueryError, QueryResult};
pub use result::{QueryResults, ResultProcessor, TabularResult};
pub use rules::{
    rule_predicate, rule_set_predicate, Condition, FilterRule, RuleSet, CASE_SENSITIVE_FIELDS,
    LEGACY_FIELD_ALIASES,
};
pub use search::{LogSearch, SearchOptions, UserStatsOrder};
pub use time::{fill_time_buckets, time_bucket, Interval, TimeRange};

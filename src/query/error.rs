//! Query error types
//!
//! Defines all error conditions that can occur while translating a request
//! into SQL and reshaping the warehouse results.

use thiserror::Error;

/// Errors that can occur during query translation and execution
#[derive(Error, Debug)]
pub enum QueryError {
    /// A filter rule used an operator token outside the supported set
    #[error("unknown filter operator: {operator} (rule: {rule})")]
    UnknownOperator { operator: String, rule: String },

    /// Interval granularity the warehouse schema cannot bucket by.
    /// Minute and week are recognized tokens but remain unimplemented
    /// upstream, so they fail here rather than silently degrading.
    #[error("unsupported interval: {0}")]
    UnsupportedInterval(String),

    /// A field with a declared numeric type received a non-numeric value
    #[error("invalid {expected} value for field {field}: {value:?}")]
    InvalidFieldValue {
        field: String,
        expected: &'static str,
        value: String,
    },

    /// A time value that could not be parsed
    #[error("invalid time value: {0}")]
    InvalidTime(String),

    /// The `between` operator needs a two-element value array
    #[error("between operator expects a two-element value array (rule: {rule})")]
    InvalidRange { rule: String },

    /// An aggregation verb was called before its prerequisite
    #[error("drilldown aggregation must run before drilldown-over-time")]
    DrilldownNotExecuted,

    /// A time-bucketed aggregation was requested without an interval
    #[error("no interval configured for time-bucketed aggregation")]
    MissingInterval,

    /// A region aggregation was requested without a region token
    #[error("no region configured for region aggregation")]
    MissingRegion,

    /// Warehouse transport or query failure
    #[error("warehouse error: {0}")]
    Warehouse(#[from] crate::warehouse::WarehouseError),

    /// A result processor referenced a sub-query that never executed
    #[error("sub-query {0} has no cached result")]
    MissingSubQuery(String),

    /// A result processor referenced a column absent from the result set
    #[error("column {column} missing from sub-query {query}")]
    MissingColumn { query: String, column: String },
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

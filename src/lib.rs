//! # Loglens
//!
//! API traffic analytics for a columnar log warehouse. Loglens converts a
//! declarative, UI-driven filter/aggregation request (time range, rule
//! tree, aggregation directives) into SQL executed against a remote query
//! service, then reshapes the flat rows back into a nested aggregation
//! document compatible with the legacy document-store aggregation API.
//!
//! ## Modules
//!
//! - [`query`]: Rule translation, session orchestration, result shaping
//! - [`sql`]: Centralized identifier/literal quoting and clause composition
//! - [`warehouse`]: HTTP client for the remote query service
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loglens::{Config, LogSearch, SearchOptions, WarehouseClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let table = config.warehouse.table.clone();
//!     let client = Arc::new(WarehouseClient::new(config.warehouse.into()));
//!
//!     let mut search = LogSearch::new(client, table, &SearchOptions {
//!         start_time: "2020-01-01".into(),
//!         end_time: "2020-01-07".into(),
//!         interval: Some("day".into()),
//!         region: None,
//!     })?;
//!
//!     search.filter_by_date_range();
//!     search.aggregate_by_drilldown("0/").await?;
//!     search.aggregate_by_drilldown_over_time().await?;
//!
//!     let document = search.result().await?;
//!     println!("{}", serde_json::to_string_pretty(&document)?);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod query;
pub mod sql;
pub mod warehouse;

// Re-export top-level types for convenience
pub use config::{Config, ConfigError, LoggingConfig, WarehouseSettings};

pub use query::{
    Condition, DrilldownState, FilterRule, Interval, LogSearch, QueryError, QueryResult,
    ResultProcessor, RuleSet, SearchOptions, TabularResult, TimeRange, UserStatsOrder,
};

pub use warehouse::{QueryTransport, WarehouseClient, WarehouseConfig, WarehouseError};

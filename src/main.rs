//! Loglens CLI
//!
//! Runs one analytics query session against the warehouse and prints the
//! resulting aggregation document as JSON.

use anyhow::Context;
use clap::Parser;
use loglens::{Config, LogSearch, RuleSet, SearchOptions, UserStatsOrder, WarehouseClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "loglens", about = "Query the API traffic warehouse")]
struct Cli {
    /// Config file path (defaults to the standard locations)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Range start (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    start_time: String,

    /// Range end (RFC 3339 or YYYY-MM-DD; bare dates extend to end of day)
    #[arg(long)]
    end_time: String,

    /// Time-bucketing granularity: hour, day, or month
    #[arg(long)]
    interval: Option<String>,

    /// Region token: world, US, US-XX, or a country code
    #[arg(long)]
    region: Option<String>,

    /// Filter rule tree as JSON: {"condition":"AND","rules":[...]}
    #[arg(long)]
    query: Option<String>,

    /// Drilldown prefix, e.g. "0/" or "2/example.com/api"
    #[arg(long)]
    drilldown: Option<String>,

    /// Also break the top drilldown paths down over time
    #[arg(long)]
    drilldown_over_time: bool,

    /// Hits-per-interval time series
    #[arg(long)]
    hits_over_time: bool,

    /// Top users aggregation with the given size
    #[arg(long)]
    users: Option<usize>,

    /// Top client IPs aggregation with the given size
    #[arg(long)]
    request_ips: Option<usize>,

    /// Per-user stats, ordered by hit count descending
    #[arg(long)]
    user_stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    let table = config.warehouse.table.clone();
    let client = Arc::new(WarehouseClient::new(config.warehouse.into()));

    let mut search = LogSearch::new(
        client,
        table,
        &SearchOptions {
            start_time: cli.start_time.clone(),
            end_time: cli.end_time.clone(),
            interval: cli.interval.clone(),
            region: cli.region.clone(),
        },
    )?;

    search.filter_by_date_range();

    if let Some(raw) = &cli.query {
        let rules: RuleSet = serde_json::from_str(raw).context("invalid rule tree JSON")?;
        search.filter_by_rules(&rules)?;
    }

    if let Some(prefix) = &cli.drilldown {
        search.aggregate_by_drilldown(prefix).await?;
        if cli.drilldown_over_time {
            search.aggregate_by_drilldown_over_time().await?;
        }
    }

    if cli.hits_over_time {
        search.aggregate_by_interval().await?;
    }

    if cli.region.is_some() {
        search.aggregate_by_region().await?;
    }

    if let Some(size) = cli.users {
        search.aggregate_by_users(size).await?;
    }

    if let Some(size) = cli.request_ips {
        search.aggregate_by_request_ip(size).await?;
    }

    if cli.user_stats {
        search.aggregate_by_user_stats(Some(UserStatsOrder::CountDescending));
    }

    let document = search.result().await?;
    println!("{}", serde_json::to_string_pretty(&document)?);

    Ok(())
}

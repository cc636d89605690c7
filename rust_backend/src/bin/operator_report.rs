use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use prod_metrics::db::AppConfig;
use prod_metrics::models::{production_day_for, resolve_window, WindowFilter};
use prod_metrics::services::{
    group_and_summarize, sort_records, AggregationEngine, GroupedReport, SortOrder,
};

/// Per-operator production report for one production window.
#[derive(Debug, Parser)]
#[command(name = "operator-report", version, about)]
struct Args {
    /// Single production day (YYYY-MM-DD)
    #[arg(long)]
    day: Option<String>,

    /// ISO week (YYYY-Www)
    #[arg(long)]
    week: Option<String>,

    /// Calendar month (YYYY-MM)
    #[arg(long)]
    month: Option<String>,

    /// First day of an explicit range (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<String>,

    /// Last day of an explicit range (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<String>,

    /// Restrict the scan to one database
    #[arg(long)]
    db: Option<String>,

    /// Worker count (defaults to engine.max_workers)
    #[arg(long)]
    workers: Option<usize>,

    /// Row order before grouping: none, az, za, time
    #[arg(long, default_value = "none")]
    sort: SortOrder,

    /// Configuration file (defaults to metrics.toml lookup)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report {
    window: String,
    filter_type: String,
    databases: Vec<String>,
    #[serde(flatten)]
    grouped: GroupedReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::from_default_location().unwrap_or_else(|e| {
            tracing::warn!("{}; using defaults", e);
            AppConfig::default()
        }),
    };

    let engine = AggregationEngine::from_app_config(&config).context("building engine")?;
    let workers = args.workers.unwrap_or(engine.config().max_workers);

    let filter = WindowFilter {
        day: args.day,
        week: args.week,
        month: args.month,
        start_date: args.start_date,
        end_date: args.end_date,
    };
    let today = production_day_for(Local::now().naive_local());
    let window = resolve_window(&filter, today);

    let output = engine
        .aggregate(&window, args.db.as_deref(), workers)
        .await
        .context("aggregation failed")?;

    let mut records = output.records;
    sort_records(&mut records, args.sort);

    let report = Report {
        window: window.label(),
        filter_type: window.filter_type.to_string(),
        databases: output.databases,
        grouped: group_and_summarize(records),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

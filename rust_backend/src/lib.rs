//! Production metrics backend.
//!
//! Aggregates per-operator output, cycle time and utilization across
//! databases and tables discovered at query time, within a production-day
//! window (07:00 to 06:59:59 the next day).
//!
//! - [`models`]: windows, table tasks, raw events and output records
//! - [`db`]: source traits with MySQL and in-memory implementations
//! - [`services`]: the aggregation engine and display grouping
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use prod_metrics::db::LocalRepository;
//! use prod_metrics::models::{resolve_window, WindowFilter};
//! use prod_metrics::services::{group_and_summarize, AggregationEngine, EngineConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let repo = LocalRepository::new();
//! repo.add_production_table("acme", "acme_final");
//! let at = |h| NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(h, 0, 0).unwrap();
//! repo.insert_event("acme", "acme_final", "jdoe", "SN1", at(8));
//! repo.insert_event("acme", "acme_final", "jdoe", "SN2", at(9));
//!
//! let today = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
//! let window = resolve_window(&WindowFilter::day("2024-03-05"), today);
//! let engine = AggregationEngine::new(Arc::new(repo), EngineConfig::default());
//! let output = engine.aggregate(&window, None, 4).await.unwrap();
//!
//! let report = group_and_summarize(output.records);
//! assert_eq!(report.summary.get("jdoe"), Some(8.33));
//! # }
//! ```

pub mod db;
pub mod models;
pub mod services;

//! Source access for production data.
//!
//! This module provides abstractions over the production MySQL server via the
//! Repository pattern, allowing the in-memory source to stand in for it in
//! tests and local development.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Application Layer (operator-report CLI, HTTP front)    │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  Service Layer (services/) - Aggregation Engine         │
//! │  - Schema discovery and table classification            │
//! │  - Per-table scans on worker connections                │
//! │  - Break-log reconciliation and metric derivation       │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  Source Traits (repository/) - ConnectionFactory and    │
//! │  SourceConnection                                       │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//!     ┌───────────────┴────────────────┐
//!     │                                 │
//! ┌───▼──────────────┐     ┌──────────▼──────────────┐
//! │ MySQL Source     │     │  Local Source           │
//! │ (Diesel + r2d2)  │     │  (in-memory)            │
//! └──────────────────┘     └─────────────────────────┘
//! ```
//!
//! # Modules
//! - `repository`: Source traits and error types
//! - `repositories::mysql`: MySQL implementation (feature `mysql-repo`)
//! - `repositories::local`: In-memory implementation for unit testing and local development
//! - `factory`: Factory for creating sources
//! - `config` / `repo_config`: Environment and TOML configuration

pub mod config;
pub mod factory;
pub mod repo_config;
pub mod repositories;
pub mod repository;

pub use config::{BreakLogConfig, MySqlConfig};
pub use factory::{RepositoryBuilder, RepositoryFactory, SourceType};
pub use repo_config::AppConfig;
pub use repositories::LocalRepository;
pub use repository::{
    ConnectionFactory, ErrorContext, RepositoryError, RepositoryResult, SourceConnection,
};

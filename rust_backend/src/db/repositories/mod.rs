//! Source implementations.
//!
//! - [`local`]: in-memory source for tests and local development
//! - `mysql`: Diesel-backed MySQL source (`mysql-repo` feature)

pub mod local;
#[cfg(feature = "mysql-repo")]
pub mod mysql;

pub use local::{LocalRepository, LocalRow};
#[cfg(feature = "mysql-repo")]
pub use mysql::MySqlRepository;

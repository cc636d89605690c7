//! Source trait definitions and error types.
//!
//! # Module Organization
//!
//! - [`error`]: Error types for source operations
//! - [`source`]: Connection and connection-factory traits
//!
//! A complete source implements both traits:
//!
//! ```ignore
//! impl SourceConnection for MyConnection { ... }
//! impl ConnectionFactory for MySource { ... }
//! ```

pub mod error;
pub mod source;

pub use error::{ErrorContext, RepositoryError, RepositoryResult};
pub use source::{ConnectionFactory, SourceConnection};

//! Domain types shared by the sources and the aggregation services.

pub mod records;
pub mod window;

pub use records::*;
pub use window::*;

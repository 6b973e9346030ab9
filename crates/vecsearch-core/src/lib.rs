pub mod config;
pub mod error;
pub mod filter;
pub mod metric;
pub mod types;

pub use config::{GlobalConfig, IndexParams};
pub use error::{IndexError, Result};
pub use filter::FilterExpr;
pub use metric::Metric;
pub use types::{Completeness, DocId, Document, NodeId, SearchHit};

/// Scalar type of every stored vector component.
pub type VecFloat = f64;

#[cfg(test)]
mod tests;

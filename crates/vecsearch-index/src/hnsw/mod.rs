//! Hierarchical Navigable Small World graph.

mod graph;
mod insert;
mod search;
mod visited;

pub use graph::{HnswIndex, MAX_LAYERS};
pub use insert::InsertPlan;

pub(crate) use graph::RestoredNode;

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod attributes;
pub mod collection;
pub mod hnsw;
pub mod hybrid;
pub mod lexical;
pub mod planner;
#[cfg(feature = "persistence")]
pub mod snapshot;

pub use attributes::AttributeIndex;
pub use collection::{Collection, CollectionStats};
pub use hnsw::{HnswIndex, InsertPlan, MAX_LAYERS};
pub use hybrid::{Fusion, HybridWeights};
pub use lexical::KeywordIndex;
pub use planner::{
    CandidateSource, PlanKind, QueryPlanner, QueryRequest, QueryResponse, RerankMode,
};

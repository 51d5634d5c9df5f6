//! Labeled query sets: loading, format adapters and train/validation/test splits.

pub mod adapters;
pub mod literal;
pub mod split;
pub mod types;

pub use adapters::{load_queries, parse_queries, QueryFormat, SplitConvention};
pub use split::{partition, validation_split, DatasetSplit};
pub use types::LabeledQuery;

//! Tool catalog: the fixed set of callable tools being retrieved.
//!
//! The catalog is loaded once and never mutated during evaluation. Its order
//! is significant: index position is the deterministic tie-break everywhere.

pub mod loader;
pub mod types;

pub use loader::{load_catalog, parse_catalog};
pub use types::{ToolCatalog, ToolDefinition};

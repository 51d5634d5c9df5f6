//! Toolrecall - offline retrieval-quality harness for tool routing
//!
//! Builds a BM25 index (or a dense embedding index) over enriched tool
//! documents, optionally reranks the first-stage candidates with a pairwise
//! scorer, and reports ranking metrics on a held-out query split.

pub mod catalog;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod inference;
pub mod rerank;
pub mod retrieval;
pub mod state;

// Re-export key types for convenience
pub use catalog::{load_catalog, ToolCatalog, ToolDefinition};
pub use config::{Config, RerankMode, RetrieverKind};
pub use corpus::{build_corpus, Corpus, SynonymTable};
pub use dataset::{load_queries, LabeledQuery, QueryFormat, SplitConvention};
pub use error::{AppError, Result};
pub use eval::{EvalSettings, EvaluationReport, Evaluator, TuningGrid};
pub use inference::{BiEncoder, Pooling};
pub use rerank::{CrossEncoderScorer, PairScorer, Reranker};
pub use retrieval::{
    Bm25Params, DenseRetriever, FirstStage, LexicalTokenizer, RetrievalResult, TextEmbedder,
    TextTokenizer, ToolRetriever,
};
pub use state::AppState;

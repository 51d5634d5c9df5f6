//! First-stage retrieval over the tool corpus: lexical BM25 or dense
//! embeddings.

pub mod bm25;
pub mod dense;
pub mod stage;
pub mod tokenize;
pub mod types;

pub use bm25::{Bm25Index, Bm25Params, ToolRetriever};
pub use dense::{DenseRetriever, TextEmbedder, DEFAULT_QUERY_INSTRUCTION};
pub use stage::FirstStage;
pub use tokenize::{load_dictionary, HfLexicalTokenizer, LexicalTokenizer, TextTokenizer};
pub use types::{rank_all_scores, rank_scores, RetrievalResult, ScoredTool};

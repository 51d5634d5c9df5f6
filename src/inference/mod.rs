//! ONNX Runtime plumbing shared by the cross-encoder and the bi-encoder.

pub mod bi_encoder;
pub mod session_pool;
pub mod tokenize;

pub use bi_encoder::{cosine_similarity, mean_pool, BiEncoder, Pooling};
pub use session_pool::SessionPool;
pub use tokenize::{ModelTokenizer, TokenBatch};

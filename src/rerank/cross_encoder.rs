//! ONNX cross-encoder implementing the pairwise scorer contract.

use crate::error::{AppError, Result};
use crate::inference::{ModelTokenizer, SessionPool};
use crate::rerank::PairScorer;
use std::path::Path;

/// Cross-encoder reranker (e.g. bge-reranker) scored through ONNX Runtime.
///
/// Scores are sigmoid-activated logits in `(0, 1)`.
pub struct CrossEncoderScorer {
    pool: SessionPool,
    tokenizer: ModelTokenizer,
    batch_size: usize,
}

impl CrossEncoderScorer {
    /// Load model and tokenizer, then run one warm-up inference so a broken
    /// model fails at startup instead of on the first query.
    pub fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        max_sequence_length: usize,
        pool_size: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let pool = SessionPool::load(model_path, pool_size)?;
        let tokenizer = ModelTokenizer::load(tokenizer_path, max_sequence_length)?;

        let scorer = Self {
            pool,
            tokenizer,
            batch_size: batch_size.max(1),
        };
        scorer.warmup()?;
        Ok(scorer)
    }

    fn warmup(&self) -> Result<()> {
        tracing::info!("Running cross-encoder warmup...");
        let _ = self.score_batch("warmup query", &["warmup document".to_string()])?;
        tracing::info!("Cross-encoder warmup completed");
        Ok(())
    }
}

impl PairScorer for CrossEncoderScorer {
    fn name(&self) -> &str {
        "cross-encoder"
    }

    fn concurrency_limit(&self) -> Option<usize> {
        Some(self.pool.size())
    }

    fn score(&self, query: &str, candidate: &str) -> Result<f32> {
        self.score_batch(query, &[candidate.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ModelError("model returned no score".into()))
    }

    /// Pairs are independent; batching only amortizes the forward pass.
    fn score_batch(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(self.batch_size) {
            let batch = self.tokenizer.encode_pairs(query, chunk)?;
            let logits = self.pool.logits(&batch)?;
            scores.extend(logits.into_iter().map(sigmoid));
        }
        Ok(scores)
    }
}

/// Sigmoid activation: 1 / (1 + e^-x)
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

//! Bi-encoder producing L2-normalized sentence embeddings.
//!
//! Query and documents are encoded independently, so document embeddings are
//! computed once per corpus and each query costs a single forward pass.

use crate::error::{AppError, Result};
use crate::inference::session_pool::SessionPool;
use crate::inference::tokenize::ModelTokenizer;
use crate::retrieval::TextEmbedder;
use ndarray::{concatenate, Array2, Array3, ArrayView1, Axis};
use std::path::Path;
use std::str::FromStr;

/// How token embeddings collapse into one sentence vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pooling {
    /// Average over non-padding tokens
    #[default]
    Mean,
    /// First token (`[CLS]`), as BGE models are trained
    Cls,
}

impl FromStr for Pooling {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "mean" => Ok(Self::Mean),
            "cls" => Ok(Self::Cls),
            other => Err(AppError::ConfigError(format!(
                "unknown pooling '{}' (expected mean or cls)",
                other
            ))),
        }
    }
}

pub struct BiEncoder {
    pool: SessionPool,
    tokenizer: ModelTokenizer,
    pooling: Pooling,
    batch_size: usize,
}

impl BiEncoder {
    /// Load model and tokenizer and run one warm-up encode.
    pub fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        max_sequence_length: usize,
        pooling: Pooling,
        pool_size: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let pool = SessionPool::load(model_path, pool_size)?;
        let tokenizer = ModelTokenizer::load(tokenizer_path, max_sequence_length)?;

        let encoder = Self {
            pool,
            tokenizer,
            pooling,
            batch_size: batch_size.max(1),
        };

        tracing::info!("Running bi-encoder warmup...");
        let warm = encoder.encode_batch(&["warmup query".to_string()])?;
        tracing::info!(dim = warm.ncols(), ?pooling, "Bi-encoder warmup completed");
        Ok(encoder)
    }

    /// Encode texts into a `(texts, dim)` matrix of unit-length rows.
    pub fn encode_batch(&self, texts: &[String]) -> Result<Array2<f32>> {
        if texts.is_empty() {
            return Err(AppError::ValidationError("nothing to encode".into()));
        }

        let mut chunks = Vec::with_capacity(texts.len().div_ceil(self.batch_size));
        for chunk in texts.chunks(self.batch_size) {
            let batch = self.tokenizer.encode_texts(chunk)?;
            let hidden = self.pool.last_hidden_state(&batch)?;
            let pooled = match self.pooling {
                Pooling::Mean => mean_pool(&hidden, &batch.attention_mask),
                Pooling::Cls => hidden.index_axis(Axis(1), 0).to_owned(),
            };
            chunks.push(l2_normalize(pooled));
        }

        let views: Vec<_> = chunks.iter().map(|c| c.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| AppError::ModelError(e.to_string()))
    }
}

impl TextEmbedder for BiEncoder {
    fn name(&self) -> &str {
        "bi-encoder"
    }

    fn embed(&self, texts: &[String]) -> Result<Array2<f32>> {
        self.encode_batch(texts)
    }
}

/// Mean of the token embeddings where `attention_mask` is 1.
pub fn mean_pool(hidden: &Array3<f32>, attention_mask: &Array2<i64>) -> Array2<f32> {
    let (batch, seq_len, dim) = hidden.dim();
    let mut pooled = Array2::<f32>::zeros((batch, dim));

    for i in 0..batch {
        let tokens = hidden.index_axis(Axis(0), i);
        let mut count = 0.0f32;
        for j in 0..seq_len {
            if attention_mask.get([i, j]).copied().unwrap_or(0) == 1 {
                let mut row = pooled.row_mut(i);
                row += &tokens.row(j);
                count += 1.0;
            }
        }
        if count > 0.0 {
            pooled.row_mut(i).mapv_inplace(|v| v / count);
        }
    }

    pooled
}

fn l2_normalize(mut embeddings: Array2<f32>) -> Array2<f32> {
    for mut row in embeddings.outer_iter_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    embeddings
}

/// Cosine similarity against every document row; both sides are unit length,
/// so this is a dot product.
pub fn cosine_similarity(query: ArrayView1<f32>, documents: &Array2<f32>) -> Vec<f32> {
    documents.outer_iter().map(|doc| query.dot(&doc)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mean_pool_skips_padding() {
        // one sentence, two real tokens and one pad token
        let hidden = Array3::from_shape_vec(
            (1, 3, 2),
            vec![1.0, 3.0, 3.0, 5.0, 100.0, 100.0],
        )
        .unwrap();
        let mask = array![[1i64, 1, 0]];

        let pooled = mean_pool(&hidden, &mask);
        assert_eq!(pooled, array![[2.0, 4.0]]);
    }

    #[test]
    fn test_l2_normalize_unit_rows() {
        let normalized = l2_normalize(array![[3.0f32, 4.0], [0.0, 0.0]]);
        assert_eq!(normalized.row(0).to_vec(), vec![0.6, 0.8]);
        // zero vectors stay zero rather than turning into NaN
        assert_eq!(normalized.row(1).to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity_orders_documents() {
        let docs = l2_normalize(array![[1.0f32, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        let query = array![1.0f32, 0.0];

        let scores = cosine_similarity(query.view(), &docs);
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!(scores[0] > scores[1] && scores[1] > scores[2]);
        assert!(scores[2].abs() < 1e-6);
    }

    #[test]
    fn test_pooling_parsing() {
        assert_eq!("".parse::<Pooling>().unwrap(), Pooling::Mean);
        assert_eq!("CLS".parse::<Pooling>().unwrap(), Pooling::Cls);
        assert!(matches!("max".parse::<Pooling>(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_missing_model_is_model_error() {
        let result = BiEncoder::load(
            Path::new("/nonexistent/model.onnx"),
            Path::new("/nonexistent/tokenizer.json"),
            512,
            Pooling::Mean,
            1,
            8,
        );
        assert!(matches!(result, Err(AppError::ModelError(_))));
    }
}

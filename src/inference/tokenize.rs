use crate::error::{AppError, Result};
use ndarray::Array2;
use std::path::Path;
use tokenizers::{Encoding, Tokenizer, TruncationParams};

/// Padded model inputs for one forward pass.
pub struct TokenBatch {
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
}

impl TokenBatch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }
}

/// HuggingFace tokenizer for the ONNX models, truncating inside the
/// tokenizer so special tokens like the closing `[SEP]` survive.
pub struct ModelTokenizer {
    tokenizer: Tokenizer,
}

impl ModelTokenizer {
    pub fn load(tokenizer_path: &Path, max_length: usize) -> Result<Self> {
        let mut tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            AppError::TokenizationError(format!(
                "failed to load tokenizer '{}': {}",
                tokenizer_path.display(),
                e
            ))
        })?;

        // longest-first trims whichever side is longer, never the specials
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_length.max(1),
                ..Default::default()
            }))
            .map_err(|e| {
                AppError::TokenizationError(format!("failed to configure truncation: {}", e))
            })?;

        tracing::info!(
            path = %tokenizer_path.display(),
            max_length,
            "Model tokenizer loaded"
        );

        Ok(Self { tokenizer })
    }

    /// Encode one `(query, candidate)` pair per candidate.
    pub fn encode_pairs(&self, query: &str, candidates: &[String]) -> Result<TokenBatch> {
        if candidates.is_empty() {
            return Err(AppError::ValidationError(
                "candidate list cannot be empty".to_string(),
            ));
        }

        let encodings = candidates
            .iter()
            .map(|candidate| {
                self.tokenizer
                    .encode((query, candidate.as_str()), true)
                    .map_err(|e| AppError::TokenizationError(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(pad(&encodings))
    }

    /// Encode standalone texts, as the bi-encoder sees them.
    pub fn encode_texts(&self, texts: &[String]) -> Result<TokenBatch> {
        if texts.is_empty() {
            return Err(AppError::ValidationError("text list cannot be empty".to_string()));
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AppError::TokenizationError(e.to_string()))?;

        Ok(pad(&encodings))
    }
}

/// Right-pad to the longest encoding in the batch.
fn pad(encodings: &[Encoding]) -> TokenBatch {
    let width = encodings
        .iter()
        .map(|e| e.get_ids().len())
        .max()
        .unwrap_or(0);

    let mut input_ids = Array2::<i64>::zeros((encodings.len(), width));
    let mut attention_mask = Array2::<i64>::zeros((encodings.len(), width));

    for (row, encoding) in encodings.iter().enumerate() {
        let ids = encoding.get_ids();
        let mask = encoding.get_attention_mask();
        for col in 0..ids.len() {
            input_ids[[row, col]] = ids[col] as i64;
            attention_mask[[row, col]] = mask[col] as i64;
        }
    }

    TokenBatch {
        input_ids,
        attention_mask,
    }
}

//! Dense first stage: cosine similarity between a query embedding and
//! precomputed tool-document embeddings.

use crate::catalog::ToolCatalog;
use crate::corpus::Corpus;
use crate::error::{AppError, Result};
use crate::inference::cosine_similarity;
use crate::retrieval::types::{rank_all_scores, RetrievalResult};
use ndarray::Array2;
use std::sync::Arc;

/// Instruction prepended to queries for BGE-style retrieval models.
pub const DEFAULT_QUERY_INSTRUCTION: &str =
    "Represent this sentence for searching relevant passages: ";

/// Text embedding model: one unit-length row per input text.
///
/// Calls are synchronous and may block.
pub trait TextEmbedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Array2<f32>>;

    fn name(&self) -> &str {
        "embedder"
    }
}

/// Exhaustive (flat) vector search over the corpus.
pub struct DenseRetriever {
    catalog: Arc<ToolCatalog>,
    corpus: Arc<Corpus>,
    embedder: Arc<dyn TextEmbedder>,
    query_instruction: String,
    /// One row per catalog tool
    documents: Array2<f32>,
}

impl DenseRetriever {
    /// Embed every corpus document once.
    pub fn build(
        catalog: Arc<ToolCatalog>,
        corpus: Arc<Corpus>,
        embedder: Arc<dyn TextEmbedder>,
        query_instruction: impl Into<String>,
    ) -> Result<Self> {
        if corpus.len() != catalog.len() {
            return Err(AppError::ValidationError(format!(
                "corpus ({} documents) is not aligned with catalog ({} tools)",
                corpus.len(),
                catalog.len()
            )));
        }

        let texts: Vec<String> = corpus.documents().iter().map(|d| d.text.clone()).collect();
        let documents = embedder.embed(&texts)?;
        if documents.nrows() != catalog.len() {
            return Err(AppError::ModelError(format!(
                "expected {} document embeddings, embedder returned {}",
                catalog.len(),
                documents.nrows()
            )));
        }

        tracing::info!(
            documents = documents.nrows(),
            dim = documents.ncols(),
            embedder = embedder.name(),
            "Dense index built"
        );

        Ok(Self {
            catalog,
            corpus,
            embedder,
            query_instruction: query_instruction.into(),
            documents,
        })
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    /// Cosine similarity of every tool, indexed like the catalog.
    pub fn score_all(&self, query: &str) -> Result<Vec<f32>> {
        let text = format!("{}{}", self.query_instruction, query);
        let embedding = self.embedder.embed(&[text])?;
        if embedding.nrows() != 1 || embedding.ncols() != self.documents.ncols() {
            return Err(AppError::ModelError(format!(
                "query embedding has shape {:?}, expected [1, {}]",
                embedding.shape(),
                self.documents.ncols()
            )));
        }
        Ok(cosine_similarity(embedding.row(0), &self.documents))
    }

    /// The `top_k` most similar tools. Unlike BM25 every tool has a score,
    /// so the result is only shorter than `top_k` for a small catalog.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<RetrievalResult> {
        Ok(self.retrieve_with_scores(query, top_k)?.0)
    }

    pub fn retrieve_with_scores(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<(RetrievalResult, Vec<f32>)> {
        let scores = self.score_all(query)?;
        let ranked = rank_all_scores(&self.catalog, &scores, top_k);
        Ok((ranked, scores))
    }
}

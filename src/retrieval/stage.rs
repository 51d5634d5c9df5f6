use crate::corpus::Corpus;
use crate::error::{AppError, Result};
use crate::retrieval::bm25::ToolRetriever;
use crate::retrieval::dense::DenseRetriever;
use crate::retrieval::types::RetrievalResult;
use std::sync::Arc;

/// The retriever that produces a query's candidate ranking.
pub enum FirstStage {
    Lexical(ToolRetriever),
    Dense(Arc<DenseRetriever>),
}

impl FirstStage {
    /// Report label, e.g. `BM25` or `Dense`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Lexical(_) => "BM25",
            Self::Dense(_) => "Dense",
        }
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        match self {
            Self::Lexical(retriever) => retriever.corpus(),
            Self::Dense(retriever) => retriever.corpus(),
        }
    }

    /// Ranked top-K plus the full score vector. Dense encoding runs on the
    /// blocking pool; BM25 scoring is cheap enough to run inline.
    pub async fn retrieve_with_scores(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<(RetrievalResult, Vec<f32>)> {
        match self {
            Self::Lexical(retriever) => Ok(retriever.retrieve_with_scores(query, top_k)),
            Self::Dense(retriever) => {
                let retriever = Arc::clone(retriever);
                let query = query.to_string();
                tokio::task::spawn_blocking(move || retriever.retrieve_with_scores(&query, top_k))
                    .await
                    .map_err(|e| AppError::ModelError(format!("encoder task join error: {}", e)))?
            }
        }
    }
}

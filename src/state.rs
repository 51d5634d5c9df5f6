use crate::catalog::{load_catalog, ToolCatalog};
use crate::config::{Config, RerankMode, RetrieverKind};
use crate::corpus::SynonymTable;
use crate::dataset::{load_queries, LabeledQuery};
use crate::error::Result;
use crate::eval::Evaluator;
use crate::inference::BiEncoder;
use crate::rerank::{CrossEncoderScorer, PairScorer, Reranker};
use crate::retrieval::{
    load_dictionary, HfLexicalTokenizer, LexicalTokenizer, TextEmbedder, TextTokenizer,
};
use std::sync::Arc;

/// Everything loaded before an evaluation run.
///
/// Load failures here are fatal; each error names the resource that failed.
pub struct AppState {
    pub catalog: Arc<ToolCatalog>,
    pub queries: Vec<LabeledQuery>,
    pub synonyms: Arc<SynonymTable>,
    pub tokenizer: Arc<dyn TextTokenizer>,
    /// Present for a dense first stage; already warmed up.
    pub embedder: Option<Arc<dyn TextEmbedder>>,
    /// Present when reranking is enabled; already warmed up.
    pub scorer: Option<Arc<dyn PairScorer>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let catalog = load_catalog(&config.catalog_path)?;
        let queries = load_queries(
            &config.queries_path,
            config.query_format,
            config.split_convention,
        )?;

        let synonyms = match &config.synonyms_path {
            Some(path) => SynonymTable::load(path)?,
            None => SynonymTable::default(),
        };

        let tokenizer: Arc<dyn TextTokenizer> = match &config.lexical_tokenizer_path {
            Some(path) => Arc::new(HfLexicalTokenizer::load(path)?),
            None => {
                let mut tokenizer = LexicalTokenizer::new();
                if let Some(path) = &config.dictionary_path {
                    tokenizer.add_words(load_dictionary(path)?);
                }
                tracing::info!(
                    dictionary_words = tokenizer.dictionary_len(),
                    "Lexical tokenizer ready"
                );
                Arc::new(tokenizer)
            }
        };

        let num_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let pool_size = config.pool_size.unwrap_or(num_cores);

        let embedder: Option<Arc<dyn TextEmbedder>> = match config.retriever {
            RetrieverKind::Bm25 => None,
            RetrieverKind::Dense => {
                tracing::info!(pool_size, "Loading bi-encoder");
                let encoder = BiEncoder::load(
                    &config.embedding_model_path,
                    &config.embedding_tokenizer_path,
                    config.max_sequence_length,
                    config.embedding_pooling,
                    pool_size,
                    config.batch_size,
                )?;
                let encoder: Arc<dyn TextEmbedder> = Arc::new(encoder);
                Some(encoder)
            }
        };

        let scorer: Option<Arc<dyn PairScorer>> = match config.rerank_mode {
            RerankMode::Off => None,
            RerankMode::CrossEncoder => {
                tracing::info!(pool_size, "Loading cross-encoder");

                let scorer = CrossEncoderScorer::load(
                    &config.reranker_model_path,
                    &config.reranker_tokenizer_path,
                    config.max_sequence_length,
                    pool_size,
                    config.batch_size,
                )?;
                let scorer: Arc<dyn PairScorer> = Arc::new(scorer);
                Some(scorer)
            }
        };

        tracing::info!(
            tools = catalog.len(),
            queries = queries.len(),
            synonyms = synonyms.len(),
            retriever = ?config.retriever,
            rerank = scorer.is_some(),
            "State initialized"
        );

        Ok(Self {
            catalog: Arc::new(catalog),
            queries,
            synonyms: Arc::new(synonyms),
            tokenizer,
            embedder,
            scorer,
            config: Arc::new(config),
        })
    }

    /// Harness wired with this state's catalog, tokenizer, first stage and
    /// optional reranker.
    pub fn evaluator(&self) -> Result<Evaluator> {
        let mut evaluator = Evaluator::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.tokenizer),
            Arc::clone(&self.synonyms),
            self.config.eval_settings(),
        )?;
        if let Some(embedder) = &self.embedder {
            evaluator =
                evaluator.with_embedder(Arc::clone(embedder), self.config.query_instruction.clone());
        }

        Ok(match &self.scorer {
            Some(scorer) => evaluator.with_reranker(Reranker::new(
                Arc::clone(scorer),
                self.config.rerank_candidates,
                self.config.scorer_timeout,
            )),
            None => evaluator,
        })
    }
}

//! End-to-end evaluation run: split, tune, rebuild, score the test split.

use crate::catalog::ToolCatalog;
use crate::corpus::{build_corpus, Corpus, SynonymTable};
use crate::dataset::{partition, validation_split, LabeledQuery};
use crate::error::{AppError, Result};
use crate::eval::metrics::{catalog_auc, MetricAccumulator, MetricSample};
use crate::eval::report::{EvaluationReport, MissCase, QueryRow, SplitSizes, Throughput};
use crate::eval::tuner::{tune, TuningGrid, TuningOutcome};
use crate::rerank::Reranker;
use crate::retrieval::{
    Bm25Params, DenseRetriever, FirstStage, RetrievalResult, TextEmbedder, TextTokenizer,
    ToolRetriever,
};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Knobs for one evaluation run.
#[derive(Debug, Clone)]
pub struct EvalSettings {
    /// Cutoffs, ascending and deduplicated by `new`
    pub k_values: Vec<usize>,
    /// Used directly when tuning is off or impossible
    pub params: Bm25Params,
    pub tune: bool,
    pub grid: TuningGrid,
    pub validation_fraction: f64,
    pub split_seed: u64,
    pub max_error_cases: usize,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            k_values: vec![1, 2, 3, 4, 5],
            params: Bm25Params::default(),
            tune: true,
            grid: TuningGrid::default(),
            validation_fraction: 0.2,
            split_seed: 42,
            max_error_cases: 10,
        }
    }
}

impl EvalSettings {
    pub fn max_k(&self) -> usize {
        self.k_values.iter().copied().max().unwrap_or(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.k_values.is_empty() || self.k_values.contains(&0) {
            return Err(AppError::ConfigError(
                "K values must be a non-empty list of positive integers".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(AppError::ConfigError(format!(
                "validation fraction must be within [0, 1), got {}",
                self.validation_fraction
            )));
        }
        self.params.validate()
    }
}

/// Embedding model plus the instruction prepended to each query.
struct DenseSetup {
    embedder: Arc<dyn TextEmbedder>,
    query_instruction: String,
}

/// Runs the first-stage (and optionally reranked) evaluation over a labeled
/// query set. The first stage is BM25 unless an embedder is attached.
pub struct Evaluator {
    catalog: Arc<ToolCatalog>,
    tokenizer: Arc<dyn TextTokenizer>,
    synonyms: Arc<SynonymTable>,
    dense: Option<DenseSetup>,
    reranker: Option<Reranker>,
    settings: EvalSettings,
}

impl Evaluator {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        tokenizer: Arc<dyn TextTokenizer>,
        synonyms: Arc<SynonymTable>,
        mut settings: EvalSettings,
    ) -> Result<Self> {
        settings.k_values.sort_unstable();
        settings.k_values.dedup();
        settings.validate()?;

        Ok(Self {
            catalog,
            tokenizer,
            synonyms,
            dense: None,
            reranker: None,
            settings,
        })
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Use dense retrieval as the first stage. BM25 tuning is skipped.
    pub fn with_embedder(
        mut self,
        embedder: Arc<dyn TextEmbedder>,
        query_instruction: impl Into<String>,
    ) -> Self {
        self.dense = Some(DenseSetup {
            embedder,
            query_instruction: query_instruction.into(),
        });
        self
    }

    /// Build a retriever whose corpus comes from `train` only.
    pub fn build_retriever(
        &self,
        train: &[LabeledQuery],
        params: Bm25Params,
    ) -> Result<ToolRetriever> {
        let corpus = build_corpus(&self.catalog, train, &self.synonyms);
        ToolRetriever::build(
            Arc::clone(&self.catalog),
            Arc::new(corpus),
            Arc::clone(&self.tokenizer),
            params,
        )
    }

    /// First stage over a corpus built from `train`: BM25 with `params`, or
    /// the dense index when an embedder is attached.
    pub async fn build_first_stage(
        &self,
        train: &[LabeledQuery],
        params: Bm25Params,
    ) -> Result<FirstStage> {
        let Some(dense) = &self.dense else {
            return Ok(FirstStage::Lexical(self.build_retriever(train, params)?));
        };

        let catalog = Arc::clone(&self.catalog);
        let corpus = Arc::new(build_corpus(&self.catalog, train, &self.synonyms));
        let embedder = Arc::clone(&dense.embedder);
        let instruction = dense.query_instruction.clone();

        let retriever = tokio::task::spawn_blocking(move || {
            DenseRetriever::build(catalog, corpus, embedder, instruction)
        })
        .await
        .map_err(|e| AppError::ModelError(format!("encoder task join error: {}", e)))??;
        Ok(FirstStage::Dense(Arc::new(retriever)))
    }

    /// Pick BM25 parameters on a validation split carved from `train`.
    ///
    /// Returns `None` when tuning is off, the first stage is dense, or the
    /// training slice is too small to hold out a validation split.
    pub fn tune(&self, train: &[LabeledQuery]) -> Result<(Option<TuningOutcome>, usize)> {
        if !self.settings.tune {
            return Ok((None, 0));
        }
        if self.dense.is_some() {
            tracing::info!("Dense first stage has no BM25 parameters, skipping tuning");
            return Ok((None, 0));
        }

        let (tune_train, validation) = validation_split(
            train,
            self.settings.validation_fraction,
            self.settings.split_seed,
        );
        if validation.is_empty() {
            tracing::warn!(
                train = train.len(),
                k1 = self.settings.params.k1,
                b = self.settings.params.b,
                "Not enough training queries for a validation split, using default BM25 parameters"
            );
            return Ok((None, 0));
        }

        let corpus: Arc<Corpus> =
            Arc::new(build_corpus(&self.catalog, &tune_train, &self.synonyms));
        let outcome = tune(
            &self.catalog,
            &corpus,
            &self.tokenizer,
            &validation,
            &self.settings.grid,
        )?;
        Ok((Some(outcome), validation.len()))
    }

    /// Evaluate `queries`. Records flagged for evaluation form the test
    /// split; everything else builds the corpus (and the validation split
    /// when tuning).
    pub async fn run(&self, queries: Vec<LabeledQuery>) -> Result<EvaluationReport> {
        let split = partition(queries);
        if split.evaluation.is_empty() {
            return Err(AppError::DatasetError(
                "query set has no evaluation records".into(),
            ));
        }

        tracing::info!(
            train = split.train.len(),
            evaluation = split.evaluation.len(),
            tools = self.catalog.len(),
            "Starting evaluation"
        );

        let (tuning, validation_len) = self.tune(&split.train)?;
        let params = tuning
            .as_ref()
            .map(|t| t.params)
            .unwrap_or(self.settings.params);

        // final corpus uses train + validation; the test split never enters it
        let first_stage = self.build_first_stage(&split.train, params).await?;
        let corpus = Arc::clone(first_stage.corpus());

        let max_k = self.settings.max_k();
        let k_values = &self.settings.k_values;
        let tool_names: Vec<&str> = self.catalog.iter().map(|t| t.name.as_str()).collect();

        let mut accumulator = MetricAccumulator::new(k_values);
        let mut rows = Vec::with_capacity(split.evaluation.len());
        let mut misses = Vec::new();
        let mut misses_total = 0usize;
        let mut rerank_failures = 0usize;
        let mut latency_sum_ms = 0.0f64;

        let run_started = Instant::now();
        for query in &split.evaluation {
            let started = Instant::now();
            let (result, scores, fallback) =
                self.rank(&first_stage, &corpus, &query.text, max_k).await?;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            latency_sum_ms += latency_ms;

            metrics::counter!("eval_queries_total").increment(1);
            metrics::histogram!("eval_query_latency_ms").record(latency_ms);
            if fallback {
                rerank_failures += 1;
            }

            let names = result.names();
            let auc = catalog_auc(&scores, tool_names.iter().copied(), &query.ground_truth);
            accumulator.push(&MetricSample::compute(
                &names,
                &query.ground_truth,
                k_values,
                auc,
            ));

            let top1 = names.first().copied();
            let top1_hit = top1.is_some_and(|n| query.ground_truth.contains(n));
            if !top1_hit && !query.ground_truth.is_empty() {
                misses_total += 1;
                if misses.len() < self.settings.max_error_cases {
                    misses.push(MissCase {
                        query: query.text.clone(),
                        expected: query.primary_tool().unwrap_or_default().to_string(),
                        predicted_top1: top1.map(str::to_string),
                        predicted_top_k: names.iter().map(|n| n.to_string()).collect(),
                    });
                }
            }

            rows.push(QueryRow {
                query: query.text.clone(),
                ground_truth: query.ground_truth.iter().cloned().collect(),
                retrieved: names.iter().map(|n| n.to_string()).collect(),
                top1_hit,
                auc,
                latency_ms,
                fallback,
            });
        }
        let total_secs = run_started.elapsed().as_secs_f64();

        let summary = accumulator.summary();
        let throughput = Throughput::new(rows.len(), total_secs, latency_sum_ms);

        tracing::info!(
            queries = rows.len(),
            auc = summary.auc,
            misses = misses_total,
            rerank_failures,
            total_secs,
            "Evaluation completed"
        );

        let train_len = split.train.len();
        Ok(EvaluationReport {
            run_id: Uuid::new_v4(),
            retriever: match &self.reranker {
                Some(_) => format!("{} + Reranker", first_stage.label()),
                None => first_stage.label().to_string(),
            },
            embedder: self.dense.as_ref().map(|d| d.embedder.name().to_string()),
            scorer: self.reranker.as_ref().map(|r| r.scorer_name().to_string()),
            params: match &first_stage {
                FirstStage::Lexical(_) => Some(params),
                FirstStage::Dense(_) => None,
            },
            tuning,
            splits: SplitSizes {
                train: train_len,
                validation: validation_len,
                evaluation: rows.len(),
            },
            corpus_fingerprint: corpus.fingerprint(),
            skipped_references: corpus.skipped_references,
            metrics: EvaluationReport::metric_rows(&summary),
            auc: summary.auc,
            summary,
            throughput,
            rerank_failures,
            misses_total,
            misses,
            queries: rows,
        })
    }

    /// Rank one query, through the reranker when configured. The flag is set
    /// when the reranker fell back to first-stage order. A first-stage
    /// failure (dense encoding) is fatal.
    async fn rank(
        &self,
        first_stage: &FirstStage,
        corpus: &Corpus,
        query: &str,
        top_k: usize,
    ) -> Result<(RetrievalResult, Vec<f32>, bool)> {
        match &self.reranker {
            None => {
                let (result, scores) = first_stage.retrieve_with_scores(query, top_k).await?;
                Ok((result, scores, false))
            }
            Some(reranker) => {
                let (candidates, candidate_scores) = first_stage
                    .retrieve_with_scores(query, reranker.candidates())
                    .await?;
                let output = reranker
                    .rerank(query, &candidates, &candidate_scores, corpus, top_k)
                    .await;
                let fallback = output.fallback.is_some();
                Ok((output.result, output.scores, fallback))
            }
        }
    }
}

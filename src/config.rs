use crate::dataset::{QueryFormat, SplitConvention};
use crate::eval::{EvalSettings, TuningGrid};
use crate::inference::Pooling;
use crate::retrieval::{Bm25Params, DEFAULT_QUERY_INSTRUCTION};
use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Second-stage reranking preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankMode {
    /// Lexical retrieval only.
    Off,
    /// Rerank the lexical top-N with the ONNX cross-encoder.
    CrossEncoder,
}

impl FromStr for RerankMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "off" | "none" | "bm25" => Ok(Self::Off),
            "cross-encoder" | "cross_encoder" | "crossencoder" | "on" => Ok(Self::CrossEncoder),
            other => anyhow::bail!("unknown RERANK_MODE '{}' (expected off or cross-encoder)", other),
        }
    }
}

/// First-stage retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieverKind {
    /// Okapi BM25 over the tokenized corpus, with optional tuning
    Bm25,
    /// ONNX bi-encoder embeddings with cosine similarity
    Dense,
}

impl FromStr for RetrieverKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "bm25" | "lexical" => Ok(Self::Bm25),
            "dense" | "bi-encoder" | "embedding" => Ok(Self::Dense),
            other => anyhow::bail!("unknown RETRIEVER '{}' (expected bm25 or dense)", other),
        }
    }
}

pub struct Config {
    /// Tool catalog JSON (plain array or MCP `list_tools` response).
    pub catalog_path: PathBuf,
    /// Labeled queries, JSON Lines.
    pub queries_path: PathBuf,
    pub query_format: QueryFormat,
    pub split_convention: SplitConvention,
    pub synonyms_path: Option<PathBuf>,
    /// Newline-delimited words kept whole by the lexical tokenizer.
    pub dictionary_path: Option<PathBuf>,
    /// HuggingFace `tokenizer.json` replacing the built-in lexical tokenizer.
    pub lexical_tokenizer_path: Option<PathBuf>,
    pub retriever: RetrieverKind,
    pub embedding_model_path: PathBuf,
    pub embedding_tokenizer_path: PathBuf,
    pub embedding_pooling: Pooling,
    /// Prepended to each query before dense encoding.
    pub query_instruction: String,
    pub k_values: Vec<usize>,
    pub bm25: Bm25Params,
    pub tune: bool,
    pub k1_grid: Vec<f32>,
    pub b_grid: Vec<f32>,
    pub validation_fraction: f64,
    pub split_seed: u64,
    pub rerank_mode: RerankMode,
    /// Lexical candidates handed to the reranker (N).
    pub rerank_candidates: usize,
    pub reranker_model_path: PathBuf,
    pub reranker_tokenizer_path: PathBuf,
    pub max_sequence_length: usize,
    /// Optional override for session pool size. If None, uses physical cores.
    pub pool_size: Option<usize>,
    /// Batch size for internal chunking during inference.
    pub batch_size: usize,
    pub scorer_timeout: Duration,
    pub max_error_cases: usize,
    pub report_path: Option<PathBuf>,
    /// Where the Prometheus text snapshot is written after the run.
    pub metrics_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// `CATALOG_PATH` and `QUERIES_PATH` are required.
    pub fn from_env() -> anyhow::Result<Self> {
        let rerank_mode: RerankMode = env::var("RERANK_MODE").unwrap_or_default().parse()?;

        Ok(Self {
            catalog_path: PathBuf::from(
                env::var("CATALOG_PATH").context("CATALOG_PATH must point to the tool catalog")?,
            ),
            queries_path: PathBuf::from(
                env::var("QUERIES_PATH").context("QUERIES_PATH must point to the labeled queries")?,
            ),
            query_format: env::var("QUERY_FORMAT")
                .unwrap_or_else(|_| "canonical".to_string())
                .parse()?,
            split_convention: env::var("SPLIT_CONVENTION")
                .unwrap_or_else(|_| "standard".to_string())
                .parse()?,
            synonyms_path: optional_path("SYNONYMS_PATH"),
            dictionary_path: optional_path("DICTIONARY_PATH"),
            lexical_tokenizer_path: optional_path("LEXICAL_TOKENIZER_PATH"),
            retriever: env::var("RETRIEVER").unwrap_or_default().parse()?,
            embedding_model_path: PathBuf::from(
                env::var("EMBEDDING_MODEL_PATH")
                    .unwrap_or_else(|_| "./models/bi_encoder.onnx".to_string()),
            ),
            embedding_tokenizer_path: PathBuf::from(
                env::var("EMBEDDING_TOKENIZER_PATH")
                    .unwrap_or_else(|_| "./models/bi_encoder_tokenizer.json".to_string()),
            ),
            embedding_pooling: env::var("EMBEDDING_POOLING").unwrap_or_default().parse()?,
            query_instruction: env::var("QUERY_INSTRUCTION")
                .unwrap_or_else(|_| DEFAULT_QUERY_INSTRUCTION.to_string()),
            k_values: parse_list(
                "K_VALUES",
                &env::var("K_VALUES").unwrap_or_else(|_| "1,2,3,4,5".to_string()),
            )?,
            bm25: Bm25Params::new(
                env::var("BM25_K1")
                    .unwrap_or_else(|_| "1.5".to_string())
                    .parse()
                    .context("BM25_K1")?,
                env::var("BM25_B")
                    .unwrap_or_else(|_| "0.75".to_string())
                    .parse()
                    .context("BM25_B")?,
            ),
            tune: env::var("TUNE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("TUNE must be true or false")?,
            k1_grid: parse_list(
                "K1_GRID",
                &env::var("K1_GRID").unwrap_or_else(|_| "1.2,1.5,1.8,2.0".to_string()),
            )?,
            b_grid: parse_list(
                "B_GRID",
                &env::var("B_GRID").unwrap_or_else(|_| "0.6,0.75,0.9".to_string()),
            )?,
            validation_fraction: env::var("VALIDATION_FRACTION")
                .unwrap_or_else(|_| "0.2".to_string())
                .parse()
                .context("VALIDATION_FRACTION")?,
            split_seed: env::var("SPLIT_SEED")
                .unwrap_or_else(|_| "42".to_string())
                .parse()
                .context("SPLIT_SEED")?,
            rerank_mode,
            rerank_candidates: env::var("RERANK_CANDIDATES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("RERANK_CANDIDATES")?,
            reranker_model_path: PathBuf::from(
                env::var("RERANKER_MODEL_PATH")
                    .unwrap_or_else(|_| "./models/model_int8.onnx".to_string()),
            ),
            reranker_tokenizer_path: PathBuf::from(
                env::var("RERANKER_TOKENIZER_PATH")
                    .unwrap_or_else(|_| "./models/tokenizer.json".to_string()),
            ),
            max_sequence_length: env::var("MAX_SEQ_LENGTH")
                .unwrap_or_else(|_| "512".to_string())
                .parse()
                .context("MAX_SEQ_LENGTH")?,
            pool_size: env::var("POOL_SIZE").ok().and_then(|s| s.parse().ok()),
            batch_size: env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "32".to_string())
                .parse()
                .context("BATCH_SIZE")?,
            scorer_timeout: Duration::from_millis(
                env::var("SCORER_TIMEOUT_MS")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .context("SCORER_TIMEOUT_MS")?,
            ),
            max_error_cases: env::var("MAX_ERROR_CASES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("MAX_ERROR_CASES")?,
            report_path: optional_path("REPORT_PATH"),
            metrics_path: optional_path("METRICS_PATH"),
        })
    }

    /// Harness settings derived from this configuration.
    pub fn eval_settings(&self) -> EvalSettings {
        EvalSettings {
            k_values: self.k_values.clone(),
            params: self.bm25,
            tune: self.tune,
            grid: TuningGrid::new(self.k1_grid.clone(), self.b_grid.clone()),
            validation_fraction: self.validation_fraction,
            split_seed: self.split_seed,
            max_error_cases: self.max_error_cases,
        }
    }
}

fn optional_path(var: &str) -> Option<PathBuf> {
    env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Parse a comma-separated list, ignoring blanks.
fn parse_list<T>(var: &str, raw: &str) -> anyhow::Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .with_context(|| format!("{} contains invalid value '{}'", var, s))
        })
        .collect()
}

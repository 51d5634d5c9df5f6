//! Evaluation report: console rendering and JSON persistence.

use crate::error::{AppError, Result};
use crate::eval::metrics::{MetricName, MetricSummary};
use crate::eval::tuner::TuningOutcome;
use crate::retrieval::Bm25Params;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use uuid::Uuid;

/// Metrics rendered in the main table; Precision and F1 get their own.
const RANKING_METRICS: [MetricName; 6] = [
    MetricName::Recall,
    MetricName::HitRatio,
    MetricName::Completeness,
    MetricName::Ndcg,
    MetricName::Map,
    MetricName::Mrr,
];

const SET_METRICS: [MetricName; 2] = [MetricName::Precision, MetricName::F1];

/// Mean of one metric at every evaluated K.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub metric: String,
    pub by_k: BTreeMap<usize, f64>,
}

impl MetricRow {
    fn from_summary(name: MetricName, summary: &MetricSummary) -> Self {
        let by_k = summary
            .k_values
            .iter()
            .zip(&summary.means)
            .map(|(&k, m)| (k, name.value(m)))
            .collect();
        Self {
            metric: name.label().to_string(),
            by_k,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SplitSizes {
    /// Training records used for the reported corpus (validation included)
    pub train: usize,
    pub validation: usize,
    pub evaluation: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Throughput {
    pub queries: usize,
    pub total_secs: f64,
    pub mean_latency_ms: f64,
    pub queries_per_sec: f64,
}

impl Throughput {
    /// `total_secs` is the wall time of the query loop; `latency_sum_ms` is
    /// the sum of the per-query latencies.
    pub fn new(queries: usize, total_secs: f64, latency_sum_ms: f64) -> Self {
        let mean_latency_ms = if queries == 0 {
            0.0
        } else {
            latency_sum_ms / queries as f64
        };
        let queries_per_sec = if queries == 0 || total_secs <= 0.0 {
            0.0
        } else {
            queries as f64 / total_secs
        };
        Self {
            queries,
            total_secs,
            mean_latency_ms,
            queries_per_sec,
        }
    }
}

/// A query whose top-ranked tool is not in its ground truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissCase {
    pub query: String,
    pub expected: String,
    pub predicted_top1: Option<String>,
    pub predicted_top_k: Vec<String>,
}

/// Outcome for one evaluation query, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRow {
    pub query: String,
    pub ground_truth: Vec<String>,
    pub retrieved: Vec<String>,
    pub top1_hit: bool,
    pub auc: f64,
    pub latency_ms: f64,
    /// Reranker failed and lexical order was kept
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub run_id: Uuid,
    pub retriever: String,
    /// Embedding model of a dense first stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scorer: Option<String>,
    /// Final BM25 parameters; absent for a dense first stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Bm25Params>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuning: Option<TuningOutcome>,
    pub splits: SplitSizes,
    pub corpus_fingerprint: String,
    /// Ground-truth references to tools missing from the catalog
    pub skipped_references: usize,
    pub summary: MetricSummary,
    pub metrics: Vec<MetricRow>,
    pub auc: f64,
    pub throughput: Throughput,
    pub rerank_failures: usize,
    pub misses_total: usize,
    pub misses: Vec<MissCase>,
    pub queries: Vec<QueryRow>,
}

impl EvaluationReport {
    /// Metric rows in display order (ranking metrics, then Precision and F1).
    pub fn metric_rows(summary: &MetricSummary) -> Vec<MetricRow> {
        RANKING_METRICS
            .iter()
            .chain(SET_METRICS.iter())
            .map(|&name| MetricRow::from_summary(name, summary))
            .collect()
    }

    pub fn row(&self, metric: MetricName) -> Option<&MetricRow> {
        self.metrics.iter().find(|r| r.metric == metric.label())
    }

    /// Write the report as pretty-printed JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::ReportError(format!(
                        "failed to create report directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let file = File::create(path).map_err(|e| {
            AppError::ReportError(format!(
                "failed to create report file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| AppError::ReportError(format!("failed to serialize report: {}", e)))?;
        writer.flush()?;

        tracing::info!(
            path = %path.display(),
            queries = self.queries.len(),
            "Evaluation report written"
        );
        Ok(())
    }

    fn write_table(
        &self,
        f: &mut fmt::Formatter<'_>,
        title: &str,
        names: &[MetricName],
    ) -> fmt::Result {
        let k_values = &self.summary.k_values;
        writeln!(f, "{}", title)?;
        write!(f, "{:<14}", "Metric")?;
        for k in k_values {
            write!(f, "{:>10}", format!("K={}", k))?;
        }
        writeln!(f)?;
        writeln!(f, "{}", "-".repeat(14 + 10 * k_values.len()))?;

        for &name in names {
            let Some(row) = self.row(name) else { continue };
            write!(f, "{:<14}", row.metric)?;
            for k in k_values {
                let value = row.by_k.get(k).copied().unwrap_or(0.0);
                write!(f, "{:>10.4}", value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} evaluation (run {}) ===", self.retriever, self.run_id)?;
        match (&self.params, &self.embedder) {
            (Some(params), _) => write!(f, "BM25 k1={:.2} b={:.2}", params.k1, params.b)?,
            (None, Some(embedder)) => write!(f, "Embedder: {}", embedder)?,
            (None, None) => {}
        }
        if let Some(tuning) = &self.tuning {
            write!(
                f,
                " (tuned over {} points, validation Recall@1 {:.4})",
                tuning.points.len(),
                tuning.validation_recall_at_1
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "Splits: train={} validation={} evaluation={}",
            self.splits.train, self.splits.validation, self.splits.evaluation
        )?;
        writeln!(f, "Corpus fingerprint: {}", self.corpus_fingerprint)?;
        writeln!(f)?;

        self.write_table(f, "Ranking metrics", &RANKING_METRICS)?;
        writeln!(f)?;
        self.write_table(f, "Set metrics", &SET_METRICS)?;
        writeln!(f)?;

        writeln!(f, "AUC: {:.4}", self.auc)?;
        writeln!(
            f,
            "Throughput: {} queries in {:.2}s, mean {:.2} ms/query, {:.2} QPS",
            self.throughput.queries,
            self.throughput.total_secs,
            self.throughput.mean_latency_ms,
            self.throughput.queries_per_sec
        )?;
        if let Some(scorer) = &self.scorer {
            writeln!(f, "Reranker ({}) failures: {}", scorer, self.rerank_failures)?;
        }
        writeln!(f)?;

        writeln!(f, "Top-1 misses: {}", self.misses_total)?;
        for (i, miss) in self.misses.iter().enumerate() {
            writeln!(f, "{}. query: {}", i + 1, miss.query)?;
            writeln!(f, "   expected: {}", miss.expected)?;
            writeln!(
                f,
                "   predicted: {} | top-k: [{}]",
                miss.predicted_top1.as_deref().unwrap_or("<none>"),
                miss.predicted_top_k.join(", ")
            )?;
        }
        if self.misses_total > self.misses.len() {
            writeln!(
                f,
                "... {} more not shown",
                self.misses_total - self.misses.len()
            )?;
        }
        Ok(())
    }
}

//! Per-query retrieval quality metrics and their aggregation.
//!
//! Every metric takes the ranked tool names and the ground-truth set. Degenerate
//! inputs never error; they resolve to fixed values:
//! - empty truth: Recall, Completeness, NDCG and MAP are 1.0; Hit-Ratio and MRR 0.0
//! - K = 0: Precision is 0.0
//! - single-class AUC: 0.5

use serde::Serialize;
use std::collections::BTreeSet;

/// Number of ground-truth tools among the first `k` results.
fn hits_at_k(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> usize {
    let top: BTreeSet<&str> = retrieved.iter().take(k).copied().collect();
    top.iter().filter(|name| truth.contains(**name)).count()
}

pub fn recall_at_k(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> f64 {
    if truth.is_empty() {
        return 1.0;
    }
    hits_at_k(retrieved, truth, k) as f64 / truth.len() as f64
}

/// Divides by K, not by the number retrieved, so short result lists are penalized.
pub fn precision_at_k(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_at_k(retrieved, truth, k) as f64 / k as f64
}

pub fn f1_at_k(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> f64 {
    let p = precision_at_k(retrieved, truth, k);
    let r = recall_at_k(retrieved, truth, k);
    if p + r == 0.0 {
        0.0
    } else {
        2.0 * p * r / (p + r)
    }
}

pub fn hit_ratio_at_k(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> f64 {
    if hits_at_k(retrieved, truth, k) > 0 {
        1.0
    } else {
        0.0
    }
}

/// All-or-nothing recall: 1.0 only when every ground-truth tool is in the top K.
pub fn completeness_at_k(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> f64 {
    if hits_at_k(retrieved, truth, k) == truth.len() {
        1.0
    } else {
        0.0
    }
}

pub fn ndcg_at_k(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> f64 {
    if truth.is_empty() {
        return 1.0;
    }

    let dcg: f64 = retrieved
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, name)| truth.contains(**name))
        .map(|(rank, _)| discount(rank))
        .sum();
    let idcg: f64 = (0..truth.len().min(k)).map(discount).sum();

    if idcg > 0.0 {
        dcg / idcg
    } else {
        0.0
    }
}

/// `1 / log2(rank + 2)` for a zero-based rank.
fn discount(rank: usize) -> f64 {
    1.0 / ((rank + 2) as f64).log2()
}

/// Average precision at K, normalized by the size of the ground truth.
pub fn average_precision_at_k(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> f64 {
    if truth.is_empty() {
        return 1.0;
    }

    let mut hits = 0usize;
    let mut precision_sum = 0.0;
    for (rank, name) in retrieved.iter().take(k).enumerate() {
        if truth.contains(*name) {
            hits += 1;
            precision_sum += hits as f64 / (rank + 1) as f64;
        }
    }
    precision_sum / truth.len() as f64
}

pub fn reciprocal_rank_at_k(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> f64 {
    retrieved
        .iter()
        .take(k)
        .position(|name| truth.contains(*name))
        .map_or(0.0, |rank| 1.0 / (rank + 1) as f64)
}

/// ROC AUC of `scores` as a predictor of `labels`, ties sharing their average rank.
///
/// Returns 0.5 when only one class is present.
pub fn roc_auc(scores: &[f32], labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 || scores.len() != labels.len() {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Mann-Whitney U from 1-based average ranks
    let mut positive_rank_sum = 0.0f64;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        let average_rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            if labels[idx] {
                positive_rank_sum += average_rank;
            }
        }
        start = end;
    }

    let p = positives as f64;
    let n = negatives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n)
}

/// Whole-catalog AUC for one query: every tool is a candidate labeled by
/// ground-truth membership.
pub fn catalog_auc<'a>(
    scores: &[f32],
    tool_names: impl IntoIterator<Item = &'a str>,
    truth: &BTreeSet<String>,
) -> f64 {
    let labels: Vec<bool> = tool_names.into_iter().map(|n| truth.contains(n)).collect();
    roc_auc(scores, &labels)
}

/// All cutoff metrics for one query at one K.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsAtK {
    pub recall: f64,
    pub precision: f64,
    pub f1: f64,
    pub hit_ratio: f64,
    pub completeness: f64,
    pub ndcg: f64,
    pub map: f64,
    pub mrr: f64,
}

impl MetricsAtK {
    pub fn compute(retrieved: &[&str], truth: &BTreeSet<String>, k: usize) -> Self {
        Self {
            recall: recall_at_k(retrieved, truth, k),
            precision: precision_at_k(retrieved, truth, k),
            f1: f1_at_k(retrieved, truth, k),
            hit_ratio: hit_ratio_at_k(retrieved, truth, k),
            completeness: completeness_at_k(retrieved, truth, k),
            ndcg: ndcg_at_k(retrieved, truth, k),
            map: average_precision_at_k(retrieved, truth, k),
            mrr: reciprocal_rank_at_k(retrieved, truth, k),
        }
    }

    fn add(&mut self, other: &Self) {
        self.recall += other.recall;
        self.precision += other.precision;
        self.f1 += other.f1;
        self.hit_ratio += other.hit_ratio;
        self.completeness += other.completeness;
        self.ndcg += other.ndcg;
        self.map += other.map;
        self.mrr += other.mrr;
    }

    fn scaled(&self, factor: f64) -> Self {
        Self {
            recall: self.recall * factor,
            precision: self.precision * factor,
            f1: self.f1 * factor,
            hit_ratio: self.hit_ratio * factor,
            completeness: self.completeness * factor,
            ndcg: self.ndcg * factor,
            map: self.map * factor,
            mrr: self.mrr * factor,
        }
    }
}

/// Metrics for one query across the configured K values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// Parallel to the K values the sample was computed for
    pub at_k: Vec<MetricsAtK>,
    pub auc: f64,
}

impl MetricSample {
    pub fn compute(
        retrieved: &[&str],
        truth: &BTreeSet<String>,
        k_values: &[usize],
        auc: f64,
    ) -> Self {
        Self {
            at_k: k_values
                .iter()
                .map(|&k| MetricsAtK::compute(retrieved, truth, k))
                .collect(),
            auc,
        }
    }
}

/// Named metric rows for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricName {
    Recall,
    Precision,
    F1,
    HitRatio,
    Completeness,
    Ndcg,
    Map,
    Mrr,
}

impl MetricName {
    pub const ALL: [MetricName; 8] = [
        MetricName::Recall,
        MetricName::Precision,
        MetricName::F1,
        MetricName::HitRatio,
        MetricName::Completeness,
        MetricName::Ndcg,
        MetricName::Map,
        MetricName::Mrr,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MetricName::Recall => "Recall@K",
            MetricName::Precision => "Precision@K",
            MetricName::F1 => "F1@K",
            MetricName::HitRatio => "HR@K",
            MetricName::Completeness => "COMP@K",
            MetricName::Ndcg => "NDCG@K",
            MetricName::Map => "MAP@K",
            MetricName::Mrr => "MRR@K",
        }
    }

    pub fn value(self, m: &MetricsAtK) -> f64 {
        match self {
            MetricName::Recall => m.recall,
            MetricName::Precision => m.precision,
            MetricName::F1 => m.f1,
            MetricName::HitRatio => m.hit_ratio,
            MetricName::Completeness => m.completeness,
            MetricName::Ndcg => m.ndcg,
            MetricName::Map => m.map,
            MetricName::Mrr => m.mrr,
        }
    }
}

/// Unweighted means over an evaluation split.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub k_values: Vec<usize>,
    pub means: Vec<MetricsAtK>,
    pub auc: f64,
    pub queries: usize,
}

impl MetricSummary {
    /// Mean of `metric` at cutoff `k`, if `k` was evaluated.
    pub fn mean(&self, metric: MetricName, k: usize) -> Option<f64> {
        let pos = self.k_values.iter().position(|&v| v == k)?;
        self.means.get(pos).map(|m| metric.value(m))
    }
}

/// Running sums for `MetricSummary`.
#[derive(Debug, Clone)]
pub struct MetricAccumulator {
    k_values: Vec<usize>,
    sums: Vec<MetricsAtK>,
    auc_sum: f64,
    count: usize,
}

impl MetricAccumulator {
    pub fn new(k_values: &[usize]) -> Self {
        Self {
            k_values: k_values.to_vec(),
            sums: vec![MetricsAtK::default(); k_values.len()],
            auc_sum: 0.0,
            count: 0,
        }
    }

    pub fn push(&mut self, sample: &MetricSample) {
        for (sum, value) in self.sums.iter_mut().zip(&sample.at_k) {
            sum.add(value);
        }
        self.auc_sum += sample.auc;
        self.count += 1;
    }

    /// Means over pushed samples; all zeros (AUC 0.5) when nothing was pushed.
    pub fn summary(&self) -> MetricSummary {
        if self.count == 0 {
            return MetricSummary {
                k_values: self.k_values.clone(),
                means: vec![MetricsAtK::default(); self.k_values.len()],
                auc: 0.5,
                queries: 0,
            };
        }
        let factor = 1.0 / self.count as f64;
        MetricSummary {
            k_values: self.k_values.clone(),
            means: self.sums.iter().map(|s| s.scaled(factor)).collect(),
            auc: self.auc_sum * factor,
            queries: self.count,
        }
    }
}

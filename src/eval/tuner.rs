//! Grid search over BM25 `(k1, b)` on a validation split.

use crate::catalog::ToolCatalog;
use crate::corpus::Corpus;
use crate::dataset::LabeledQuery;
use crate::error::{AppError, Result};
use crate::eval::metrics::recall_at_k;
use crate::retrieval::{Bm25Params, TextTokenizer, ToolRetriever};
use serde::Serialize;
use std::sync::Arc;

/// Candidate values for each BM25 parameter. Points are visited k1-major.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningGrid {
    pub k1: Vec<f32>,
    pub b: Vec<f32>,
}

impl Default for TuningGrid {
    fn default() -> Self {
        Self {
            k1: vec![1.2, 1.5, 1.8, 2.0],
            b: vec![0.6, 0.75, 0.9],
        }
    }
}

impl TuningGrid {
    pub fn new(k1: Vec<f32>, b: Vec<f32>) -> Self {
        Self { k1, b }
    }

    /// Every combination in first-seen order.
    pub fn points(&self) -> Vec<Bm25Params> {
        self.k1
            .iter()
            .flat_map(|&k1| self.b.iter().map(move |&b| Bm25Params::new(k1, b)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridPoint {
    pub params: Bm25Params,
    pub recall_at_1: f64,
}

/// Winning parameters and every evaluated point, in grid order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningOutcome {
    pub params: Bm25Params,
    pub validation_recall_at_1: f64,
    pub points: Vec<GridPoint>,
}

/// Mean Recall@1 of `retriever` over `queries`.
pub fn mean_recall_at_1(retriever: &ToolRetriever, queries: &[LabeledQuery]) -> f64 {
    if queries.is_empty() {
        return 0.0;
    }
    let total: f64 = queries
        .iter()
        .map(|q| {
            let result = retriever.retrieve(&q.text, 1);
            recall_at_k(&result.names(), &q.ground_truth, 1)
        })
        .sum();
    total / queries.len() as f64
}

/// Score every grid point on `validation` and pick the best.
///
/// `corpus` must be built from training data only. Points are evaluated on
/// scoped worker threads; the highest Recall@1 wins and ties go to the point
/// that comes first in the grid.
pub fn tune(
    catalog: &Arc<ToolCatalog>,
    corpus: &Arc<Corpus>,
    tokenizer: &Arc<dyn TextTokenizer>,
    validation: &[LabeledQuery],
    grid: &TuningGrid,
) -> Result<TuningOutcome> {
    let points = grid.points();
    if points.is_empty() {
        return Err(AppError::ConfigError("tuning grid is empty".into()));
    }
    for params in &points {
        params.validate()?;
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(points.len());

    let evaluate = |params: Bm25Params| -> Result<f64> {
        let retriever = ToolRetriever::build(
            Arc::clone(catalog),
            Arc::clone(corpus),
            Arc::clone(tokenizer),
            params,
        )?;
        let recall = mean_recall_at_1(&retriever, validation);
        metrics::counter!("tuner_grid_points_total").increment(1);
        tracing::debug!(k1 = params.k1, b = params.b, recall_at_1 = recall, "Grid point evaluated");
        Ok(recall)
    };

    let mut scores: Vec<Option<f64>> = vec![None; points.len()];
    crossbeam::thread::scope(|s| -> Result<()> {
        let points = &points;
        let evaluate = &evaluate;
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                s.spawn(move |_| {
                    (worker..points.len())
                        .step_by(workers)
                        .map(|idx| evaluate(points[idx]).map(|recall| (idx, recall)))
                        .collect::<Result<Vec<(usize, f64)>>>()
                })
            })
            .collect();

        for handle in handles {
            let evaluated = handle
                .join()
                .map_err(|_| AppError::ValidationError("grid search worker panicked".into()))??;
            for (idx, recall) in evaluated {
                scores[idx] = Some(recall);
            }
        }
        Ok(())
    })
    .map_err(|_| AppError::ValidationError("grid search worker panicked".into()))??;

    let mut evaluated = Vec::with_capacity(points.len());
    for (params, score) in points.iter().zip(scores) {
        let recall_at_1 = score.ok_or_else(|| {
            AppError::ValidationError("grid search left a point unevaluated".into())
        })?;
        evaluated.push(GridPoint {
            params: *params,
            recall_at_1,
        });
    }

    let mut best = evaluated[0];
    for point in &evaluated[1..] {
        if point.recall_at_1 > best.recall_at_1 {
            best = *point;
        }
    }

    tracing::info!(
        k1 = best.params.k1,
        b = best.params.b,
        recall_at_1 = best.recall_at_1,
        grid_points = evaluated.len(),
        validation_queries = validation.len(),
        "Grid search completed"
    );

    Ok(TuningOutcome {
        params: best.params,
        validation_recall_at_1: best.recall_at_1,
        points: evaluated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolDefinition;
    use crate::corpus::{build_corpus, SynonymTable};
    use crate::retrieval::LexicalTokenizer;

    #[test]
    fn test_grid_points_are_k1_major() {
        let grid = TuningGrid::new(vec![1.2, 1.5], vec![0.6, 0.75]);
        let points = grid.points();
        assert_eq!(
            points,
            vec![
                Bm25Params::new(1.2, 0.6),
                Bm25Params::new(1.2, 0.75),
                Bm25Params::new(1.5, 0.6),
                Bm25Params::new(1.5, 0.75),
            ]
        );
    }

    #[test]
    fn test_empty_grid_is_config_error() {
        let catalog = Arc::new(ToolCatalog::new(vec![ToolDefinition::new("a", "alpha")]).unwrap());
        let corpus = Arc::new(build_corpus(&catalog, &[], &SynonymTable::default()));
        let tokenizer: Arc<dyn TextTokenizer> = Arc::new(LexicalTokenizer::new());

        let result = tune(&catalog, &corpus, &tokenizer, &[], &TuningGrid::new(vec![], vec![0.75]));
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    /// Only length normalization separates the two tools: `long_form` repeats
    /// the shared term in a much longer document. Without normalization
    /// (b = 0) its higher term frequency wins; with full normalization the
    /// short document wins. Validation asks for the short tool, so only the
    /// b = 1.0 points reach Recall@1 = 1.
    #[test]
    fn test_selects_dominating_configuration() {
        let catalog = Arc::new(
            ToolCatalog::new(vec![
                ToolDefinition::new(
                    "long_form",
                    "invoice invoice invoice pad pad pad pad pad pad pad pad pad pad pad pad pad pad pad pad pad",
                ),
                ToolDefinition::new("short_form", "invoice"),
                ToolDefinition::new("weather", "forecast"),
                ToolDefinition::new("music", "playlist"),
                ToolDefinition::new("maps", "route"),
                ToolDefinition::new("timer", "alarm"),
            ])
            .unwrap(),
        );
        let corpus = Arc::new(build_corpus(&catalog, &[], &SynonymTable::default()));
        let tokenizer: Arc<dyn TextTokenizer> = Arc::new(LexicalTokenizer::new());
        let validation = vec![LabeledQuery::new("invoice", ["short_form"], false)];

        let grid = TuningGrid::new(vec![1.2, 1.5], vec![0.0, 1.0]);
        let outcome = tune(&catalog, &corpus, &tokenizer, &validation, &grid).unwrap();

        assert_eq!(outcome.points.len(), 4);
        assert_eq!(outcome.params, Bm25Params::new(1.2, 1.0));
        assert_eq!(outcome.validation_recall_at_1, 1.0);
        assert_eq!(outcome.points[0].recall_at_1, 0.0);
    }

    /// Default-sized grid where only (1.5, 0.75) ranks `alpha_heavy` first:
    /// the larger k1 lets its repeated `alpha` outweigh `long_mix`, and the
    /// larger b penalizes `long_mix` for its padding.
    #[test]
    fn test_selects_unique_best_on_small_grid() {
        let catalog = Arc::new(
            ToolCatalog::new(vec![
                ToolDefinition::new("short_mix", "beta beta gamma"),
                ToolDefinition::new("alpha_heavy", "alpha alpha alpha alpha beta f1"),
                ToolDefinition::new(
                    "long_mix",
                    "alpha beta beta beta beta gamma gamma f2 f2 f2 f2 f2 f2 f2 f2",
                ),
                ToolDefinition::new("weather", "zz0"),
                ToolDefinition::new("music", "zz1"),
                ToolDefinition::new("maps", "zz2"),
            ])
            .unwrap(),
        );
        let corpus = Arc::new(build_corpus(&catalog, &[], &SynonymTable::default()));
        let tokenizer: Arc<dyn TextTokenizer> = Arc::new(LexicalTokenizer::new());
        let validation = vec![LabeledQuery::new("gamma beta alpha", ["alpha_heavy"], false)];

        let grid = TuningGrid::new(vec![1.2, 1.5], vec![0.6, 0.75]);
        let outcome = tune(&catalog, &corpus, &tokenizer, &validation, &grid).unwrap();

        let recalls: Vec<f64> = outcome.points.iter().map(|p| p.recall_at_1).collect();
        assert_eq!(recalls, vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(outcome.params, Bm25Params::new(1.5, 0.75));
        assert_eq!(outcome.validation_recall_at_1, 1.0);
    }

    #[test]
    fn test_ties_keep_first_point() {
        let catalog = Arc::new(
            ToolCatalog::new(vec![
                ToolDefinition::new("open_cart", "cart"),
                ToolDefinition::new("sign_in", "login"),
                ToolDefinition::new("open_orders", "orders"),
                ToolDefinition::new("search", "lookup"),
            ])
            .unwrap(),
        );
        let corpus = Arc::new(build_corpus(&catalog, &[], &SynonymTable::default()));
        let tokenizer: Arc<dyn TextTokenizer> = Arc::new(LexicalTokenizer::new());
        let validation = vec![LabeledQuery::new("cart", ["open_cart"], false)];

        let grid = TuningGrid::new(vec![1.8, 1.2], vec![0.9, 0.6]);
        let outcome = tune(&catalog, &corpus, &tokenizer, &validation, &grid).unwrap();

        assert_eq!(outcome.params, Bm25Params::new(1.8, 0.9));
        assert!(outcome.points.iter().all(|p| p.recall_at_1 == 1.0));
    }
}

//! Second-stage reranking of first-stage candidates with a pairwise scorer.
//!
//! The reranker only reorders the first-stage top-N; it never adds a tool the
//! first stage missed. Scorer calls run on the blocking pool under a timeout,
//! and a failed or timed-out call degrades that one query to first-stage order.

pub mod cross_encoder;

pub use cross_encoder::{sigmoid, CrossEncoderScorer};

use crate::corpus::Corpus;
use crate::error::{AppError, Result};
use crate::retrieval::{RetrievalResult, ScoredTool};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Score given to tools outside the reranked candidate set in the full score
/// vector. Strictly below any finite reranker score.
pub const UNRANKED_SCORE: f32 = f32::NEG_INFINITY;

/// Pairwise relevance model: `score(query, candidate_text) -> relevance`.
///
/// Implementations may be local models or remote services; the reranker only
/// relies on this contract. Calls are synchronous and may block.
pub trait PairScorer: Send + Sync {
    fn score(&self, query: &str, candidate: &str) -> Result<f32>;

    /// Score several candidates for one query. Each pair is scored
    /// independently of the others.
    fn score_batch(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        candidates.iter().map(|c| self.score(query, c)).collect()
    }

    fn name(&self) -> &str {
        "pairwise"
    }

    /// Maximum number of concurrent `score_batch` calls, e.g. the size of a
    /// session pool. `None` means unbounded.
    fn concurrency_limit(&self) -> Option<usize> {
        None
    }
}

/// Reranked ranking plus the score vector used for whole-catalog metrics.
#[derive(Debug)]
pub struct RerankOutput {
    pub result: RetrievalResult,
    /// One score per catalog tool; `UNRANKED_SCORE` outside the candidates.
    pub scores: Vec<f32>,
    /// Set when the scorer failed and lexical order was kept.
    pub fallback: Option<AppError>,
}

pub struct Reranker {
    scorer: Arc<dyn PairScorer>,
    /// One permit per concurrent scorer call the scorer can serve
    permits: Arc<Semaphore>,
    candidates: usize,
    timeout: Duration,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn PairScorer>, candidates: usize, timeout: Duration) -> Self {
        let permits = scorer
            .concurrency_limit()
            .unwrap_or(Semaphore::MAX_PERMITS)
            .clamp(1, Semaphore::MAX_PERMITS);
        Self {
            scorer,
            permits: Arc::new(Semaphore::new(permits)),
            candidates: candidates.max(1),
            timeout,
        }
    }

    /// Number of lexical candidates (N) taken from the first stage.
    pub fn candidates(&self) -> usize {
        self.candidates
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Rescore the lexical candidates and return the top `top_k`.
    ///
    /// `lexical` must be the first stage's ranking (at most N entries are
    /// considered) and `lexical_scores` its full score vector, used as the
    /// fallback predictor when the scorer fails.
    pub async fn rerank(
        &self,
        query: &str,
        lexical: &RetrievalResult,
        lexical_scores: &[f32],
        corpus: &Corpus,
        top_k: usize,
    ) -> RerankOutput {
        let mut candidates: Vec<ScoredTool> =
            lexical.iter().take(self.candidates).cloned().collect();

        if candidates.is_empty() {
            return RerankOutput {
                result: RetrievalResult::default(),
                scores: vec![UNRANKED_SCORE; lexical_scores.len()],
                fallback: None,
            };
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|c| corpus.text(c.index).unwrap_or_default().to_string())
            .collect();

        let started = Instant::now();
        let outcome = self.call_scorer(query, texts).await;
        metrics::counter!("rerank_calls_total").increment(1);
        metrics::histogram!("rerank_latency_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        let new_scores = match outcome {
            Ok(scores) => scores,
            Err(e) => {
                metrics::counter!("rerank_failures_total").increment(1);
                tracing::warn!(query, error = %e, "Reranker failed, keeping lexical order for this query");
                candidates.truncate(top_k);
                return RerankOutput {
                    result: RetrievalResult::new(candidates),
                    scores: lexical_scores.to_vec(),
                    fallback: Some(e),
                };
            }
        };

        let mut full_scores = vec![UNRANKED_SCORE; lexical_scores.len()];
        for (candidate, score) in candidates.iter_mut().zip(&new_scores) {
            candidate.score = *score;
            if let Some(slot) = full_scores.get_mut(candidate.index) {
                *slot = *score;
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        candidates.truncate(top_k);

        tracing::debug!(
            query,
            candidates = new_scores.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rerank completed"
        );

        RerankOutput {
            result: RetrievalResult::new(candidates),
            scores: full_scores,
            fallback: None,
        }
    }

    /// One scorer call for all candidate pairs of a query, on the blocking
    /// pool and bounded by the per-call timeout.
    ///
    /// The call first waits for a permit; that wait counts against the same
    /// timeout. A timed-out call keeps running on its thread, holding its
    /// permit until it returns, and its result is discarded.
    async fn call_scorer(&self, query: &str, texts: Vec<String>) -> Result<Vec<f32>> {
        let expected = texts.len();
        let scorer = Arc::clone(&self.scorer);
        let permits = Arc::clone(&self.permits);
        let query = query.to_string();

        let scores = tokio::time::timeout(self.timeout, async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| AppError::ScorerError("scorer semaphore closed".into()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                scorer.score_batch(&query, &texts)
            })
            .await
            .map_err(|e| AppError::ScorerError(format!("scorer task join error: {}", e)))?
        })
        .await
        .map_err(|_| AppError::ScorerTimeout(self.timeout))?
        .map_err(|e| {
            if e.is_per_query() {
                e
            } else {
                AppError::ScorerError(e.to_string())
            }
        })?;

        if scores.len() != expected {
            return Err(AppError::ScorerError(format!(
                "expected {} scores, scorer returned {}",
                expected,
                scores.len()
            )));
        }
        if scores.iter().any(|s| s.is_nan()) {
            return Err(AppError::ScorerError("scorer returned NaN".into()));
        }

        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ToolCatalog, ToolDefinition};
    use crate::corpus::{build_corpus, SynonymTable};
    use crate::retrieval::rank_scores;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores candidates by how many times `needle` appears in them.
    struct NeedleScorer(&'static str);

    impl PairScorer for NeedleScorer {
        fn score(&self, _query: &str, candidate: &str) -> Result<f32> {
            Ok(candidate.matches(self.0).count() as f32)
        }
    }

    struct FailingScorer;

    impl PairScorer for FailingScorer {
        fn score(&self, _query: &str, _candidate: &str) -> Result<f32> {
            Err(AppError::ScorerError("model unavailable".into()))
        }
    }

    struct SlowScorer;

    impl PairScorer for SlowScorer {
        fn score(&self, _query: &str, _candidate: &str) -> Result<f32> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(1.0)
        }
    }

    fn fixture() -> (ToolCatalog, Corpus) {
        let catalog = ToolCatalog::new(vec![
            ToolDefinition::new("a", "alpha"),
            ToolDefinition::new("b", "beta target"),
            ToolDefinition::new("c", "gamma target target"),
            ToolDefinition::new("d", "delta target target target"),
        ])
        .unwrap();
        let corpus = build_corpus(&catalog, &[], &SynonymTable::default());
        (catalog, corpus)
    }

    fn reranker(scorer: impl PairScorer + 'static, n: usize) -> Reranker {
        Reranker::new(Arc::new(scorer), n, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_rerank_reorders_candidates() {
        let (catalog, corpus) = fixture();
        let lexical_scores = vec![4.0, 3.0, 2.0, 1.0];
        let lexical = rank_scores(&catalog, &lexical_scores, 4);

        let output = reranker(NeedleScorer("target"), 3)
            .rerank("q", &lexical, &lexical_scores, &corpus, 3)
            .await;

        assert!(output.fallback.is_none());
        assert_eq!(output.result.names(), vec!["c", "b", "a"]);
        assert_eq!(output.scores[3], UNRANKED_SCORE);
        assert_eq!(output.scores[2], 2.0);
    }

    #[tokio::test]
    async fn test_rerank_never_adds_tools() {
        let (catalog, corpus) = fixture();
        let lexical_scores = vec![4.0, 3.0, 2.0, 1.0];
        let lexical = rank_scores(&catalog, &lexical_scores, 4);

        // "d" would win under the scorer but lies outside the top-2 candidates
        let output = reranker(NeedleScorer("target"), 2)
            .rerank("q", &lexical, &lexical_scores, &corpus, 5)
            .await;

        let names = output.result.names();
        assert_eq!(names, vec!["b", "a"]);
        assert!(output.scores[2] < 0.0 && output.scores[3] < 0.0);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_catalog_order() {
        let (catalog, corpus) = fixture();
        let lexical_scores = vec![1.0, 3.0, 2.0, 0.0];
        let lexical = rank_scores(&catalog, &lexical_scores, 4);

        let output = reranker(NeedleScorer("zzz"), 3)
            .rerank("q", &lexical, &lexical_scores, &corpus, 3)
            .await;

        assert_eq!(output.result.names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_scorer_failure_falls_back_to_lexical() {
        let (catalog, corpus) = fixture();
        let lexical_scores = vec![4.0, 3.0, 2.0, 1.0];
        let lexical = rank_scores(&catalog, &lexical_scores, 4);

        let output = reranker(FailingScorer, 3)
            .rerank("q", &lexical, &lexical_scores, &corpus, 2)
            .await;

        assert!(matches!(output.fallback, Some(AppError::ScorerError(_))));
        assert_eq!(output.result.names(), vec!["a", "b"]);
        assert_eq!(output.scores, lexical_scores);
    }

    #[tokio::test]
    async fn test_scorer_timeout_falls_back() {
        let (catalog, corpus) = fixture();
        let lexical_scores = vec![4.0, 3.0, 2.0, 1.0];
        let lexical = rank_scores(&catalog, &lexical_scores, 4);

        let output = Reranker::new(Arc::new(SlowScorer), 2, Duration::from_millis(20))
            .rerank("q", &lexical, &lexical_scores, &corpus, 2)
            .await;

        assert!(matches!(output.fallback, Some(AppError::ScorerTimeout(_))));
        assert_eq!(output.result.names(), vec!["a", "b"]);
    }

    /// Sleeps on its first call and rejects overlapping calls, like a session
    /// pool of one.
    struct SingleSessionScorer {
        in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl PairScorer for SingleSessionScorer {
        fn score(&self, _query: &str, _candidate: &str) -> Result<f32> {
            Ok(1.0)
        }

        fn score_batch(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::ScorerError("no available sessions in pool".into()));
            }
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(Duration::from_millis(200));
            }
            let scores = candidates.iter().map(|c| self.score(query, c)).collect();
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            scores
        }

        fn concurrency_limit(&self) -> Option<usize> {
            Some(1)
        }
    }

    #[tokio::test]
    async fn test_call_waits_for_busy_scorer() {
        let (catalog, corpus) = fixture();
        let lexical_scores = vec![4.0, 3.0, 2.0, 1.0];
        let lexical = rank_scores(&catalog, &lexical_scores, 4);
        let scorer = SingleSessionScorer {
            in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        };
        let reranker = Reranker::new(Arc::new(scorer), 2, Duration::from_millis(150));

        // first call times out while its blocking task still holds the scorer
        let first = reranker.rerank("q", &lexical, &lexical_scores, &corpus, 2).await;
        assert!(matches!(first.fallback, Some(AppError::ScorerTimeout(_))));

        // second call waits for the permit instead of failing on a busy scorer
        let second = reranker.rerank("q", &lexical, &lexical_scores, &corpus, 2).await;
        assert!(second.fallback.is_none());
        assert_eq!(second.scores[0], 1.0);
    }

    #[tokio::test]
    async fn test_empty_candidates_skip_scorer() {
        let (_, corpus) = fixture();
        let output = reranker(FailingScorer, 3)
            .rerank("q", &RetrievalResult::default(), &[0.0; 4], &corpus, 3)
            .await;

        assert!(output.result.is_empty());
        assert!(output.fallback.is_none());
        assert!(output.scores.iter().all(|&s| s == UNRANKED_SCORE));
    }
}

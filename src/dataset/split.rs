//! Train / validation / test partitioning.
//!
//! The validation split is drawn from the training slice by ranking records on
//! a SHA-256 digest of `(seed, index, text)`. This is reproducible across runs
//! and platforms without an RNG, and disjoint from the remaining training data
//! by construction.

use crate::dataset::types::LabeledQuery;
use sha2::{Digest, Sha256};

/// Queries separated by their evaluation flag, input order preserved.
#[derive(Debug, Clone, Default)]
pub struct DatasetSplit {
    pub train: Vec<LabeledQuery>,
    pub evaluation: Vec<LabeledQuery>,
}

/// Separate training and evaluation records.
pub fn partition(queries: Vec<LabeledQuery>) -> DatasetSplit {
    let (evaluation, train) = queries.into_iter().partition(|q| q.is_evaluation);
    DatasetSplit { train, evaluation }
}

/// Split training records into `(train, validation)`.
///
/// Validation receives `ceil(n * fraction)` records, clamped to `1..=n-1` so
/// both sides are non-empty. With fewer than two records no split is possible
/// and validation is empty. Both outputs keep the input's relative order.
pub fn validation_split(
    train: &[LabeledQuery],
    fraction: f64,
    seed: u64,
) -> (Vec<LabeledQuery>, Vec<LabeledQuery>) {
    let n = train.len();
    if n < 2 || fraction <= 0.0 {
        return (train.to_vec(), Vec::new());
    }

    let target = ((n as f64) * fraction.min(1.0)).ceil() as usize;
    let validation_len = target.clamp(1, n - 1);

    let mut ranked: Vec<(usize, [u8; 32])> = train
        .iter()
        .enumerate()
        .map(|(idx, query)| (idx, split_digest(seed, idx, &query.text)))
        .collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

    let mut in_validation = vec![false; n];
    for (idx, _) in ranked.into_iter().take(validation_len) {
        in_validation[idx] = true;
    }

    let mut kept = Vec::with_capacity(n - validation_len);
    let mut validation = Vec::with_capacity(validation_len);
    for (query, selected) in train.iter().zip(in_validation) {
        if selected {
            validation.push(query.clone());
        } else {
            kept.push(query.clone());
        }
    }

    tracing::debug!(
        train = kept.len(),
        validation = validation.len(),
        seed,
        "Validation split drawn"
    );

    (kept, validation)
}

fn split_digest(seed: u64, index: usize, text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queries(n: usize) -> Vec<LabeledQuery> {
        (0..n)
            .map(|i| LabeledQuery::new(format!("query {i}"), ["tool"], false))
            .collect()
    }

    #[test]
    fn test_partition_by_flag() {
        let split = partition(vec![
            LabeledQuery::new("a", ["t"], false),
            LabeledQuery::new("b", ["t"], true),
            LabeledQuery::new("c", ["t"], false),
        ]);
        assert_eq!(split.train.len(), 2);
        assert_eq!(split.evaluation.len(), 1);
        assert_eq!(split.train[1].text, "c");
    }

    #[test]
    fn test_validation_split_sizes_and_disjoint() {
        let data = queries(50);
        let (train, validation) = validation_split(&data, 0.2, 42);

        assert_eq!(validation.len(), 10);
        assert_eq!(train.len(), 40);
        for v in &validation {
            assert!(!train.iter().any(|t| t.text == v.text));
        }
    }

    #[test]
    fn test_validation_split_is_deterministic() {
        let data = queries(30);
        assert_eq!(validation_split(&data, 0.2, 7), validation_split(&data, 0.2, 7));
    }

    #[test]
    fn test_seed_changes_selection() {
        let data = queries(40);
        let (_, a) = validation_split(&data, 0.25, 1);
        let (_, b) = validation_split(&data, 0.25, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tiny_sets() {
        let (train, validation) = validation_split(&queries(1), 0.2, 42);
        assert_eq!(train.len(), 1);
        assert!(validation.is_empty());

        let (train, validation) = validation_split(&queries(2), 0.9, 42);
        assert_eq!((train.len(), validation.len()), (1, 1));
    }
}

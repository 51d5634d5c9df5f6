use crate::catalog::{ToolCatalog, ToolDefinition};
use serde::Serialize;

/// One ranked tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTool {
    /// Catalog index of the tool
    pub index: usize,
    pub tool: ToolDefinition,
    pub score: f32,
}

/// Ranked tools, scores non-increasing, ties broken by lower catalog index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    items: Vec<ScoredTool>,
}

impl RetrievalResult {
    pub fn new(items: Vec<ScoredTool>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ScoredTool] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredTool> {
        self.items.iter()
    }

    pub fn first(&self) -> Option<&ScoredTool> {
        self.items.first()
    }

    /// Tool names in rank order.
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|s| s.tool.name.as_str()).collect()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.items.iter().map(|s| s.index).collect()
    }

    pub fn truncate(&mut self, k: usize) {
        self.items.truncate(k);
    }
}

/// Order catalog indices by score, highest first, lower index winning ties.
///
/// Only scores strictly above zero are kept; at most `top_k` entries.
pub fn rank_scores(catalog: &ToolCatalog, scores: &[f32], top_k: usize) -> RetrievalResult {
    rank_by(catalog, scores, top_k, |score| score > 0.0)
}

/// Like [`rank_scores`] but keeps every finite score. Similarity scores
/// (cosine) have no "no match" zero, so every tool is a candidate.
pub fn rank_all_scores(catalog: &ToolCatalog, scores: &[f32], top_k: usize) -> RetrievalResult {
    rank_by(catalog, scores, top_k, f32::is_finite)
}

fn rank_by(
    catalog: &ToolCatalog,
    scores: &[f32],
    top_k: usize,
    keep: impl Fn(f32) -> bool,
) -> RetrievalResult {
    let mut ranked: Vec<(usize, f32)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, score)| keep(score))
        .collect();

    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let items = ranked
        .into_iter()
        .take(top_k)
        .filter_map(|(index, score)| {
            catalog.get(index).map(|tool| ScoredTool {
                index,
                tool: tool.clone(),
                score,
            })
        })
        .collect();

    RetrievalResult::new(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(
            ["a", "b", "c", "d"]
                .into_iter()
                .map(|n| ToolDefinition::new(n, ""))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_rank_orders_desc_with_index_tiebreak() {
        let result = rank_scores(&catalog(), &[0.5, 2.0, 0.5, 1.0], 4);
        assert_eq!(result.names(), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_rank_drops_non_positive_scores() {
        let result = rank_scores(&catalog(), &[0.0, 1.0, -3.0, 0.0], 4);
        assert_eq!(result.names(), vec!["b"]);
    }

    #[test]
    fn test_rank_all_keeps_negative_similarity() {
        let result = rank_all_scores(&catalog(), &[-0.2, 0.4, f32::NEG_INFINITY, -0.2], 4);
        assert_eq!(result.names(), vec!["b", "a", "d"]);
    }

    #[test]
    fn test_rank_truncates_to_k() {
        let result = rank_scores(&catalog(), &[4.0, 3.0, 2.0, 1.0], 2);
        assert_eq!(result.indices(), vec![0, 1]);
        assert!(rank_scores(&catalog(), &[4.0, 3.0, 2.0, 1.0], 0).is_empty());
    }
}

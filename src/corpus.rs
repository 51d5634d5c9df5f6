//! Corpus construction: one enriched text document per catalog tool.
//!
//! A document joins the tool's description, synonym alternates triggered by
//! keywords in that description, and the deduplicated historical phrasings
//! that training labels map to the tool. Documents are index-aligned with the
//! catalog; a tool without history still gets a document so it stays
//! retrievable.

use crate::catalog::ToolCatalog;
use crate::dataset::LabeledQuery;
use crate::error::{AppError, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;
use std::path::Path;

/// Trigger substring -> alternate phrasings. Iterated in sorted key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynonymTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl SynonymTable {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, vs)| (k.into(), vs.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Load a JSON object of `trigger -> [alternates]`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("failed to read synonyms '{}': {}", path.display(), e))
        })?;
        let entries: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&content).map_err(|e| {
                AppError::ConfigError(format!(
                    "synonyms '{}' must be an object of string arrays: {}",
                    path.display(),
                    e
                ))
            })?;

        tracing::info!(path = %path.display(), triggers = entries.len(), "Synonym table loaded");
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Alternates for every trigger contained in `text`, first occurrence kept.
    pub fn expand(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|(trigger, _)| !trigger.is_empty() && text.contains(trigger.as_str()))
            .flat_map(|(_, alternates)| alternates.iter())
            .filter(|alt| seen.insert(alt.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusDocument {
    pub tool_name: String,
    pub text: String,
}

/// Documents in catalog order: `documents[i]` describes `catalog.tools()[i]`.
#[derive(Debug, Clone)]
pub struct Corpus {
    documents: Vec<CorpusDocument>,
    /// Training contributions dropped because they named unknown tools.
    pub skipped_references: usize,
}

impl Corpus {
    pub fn documents(&self) -> &[CorpusDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        self.documents.get(index).map(|d| d.text.as_str())
    }

    /// SHA-256 over all documents, hex encoded. Identical corpora share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for doc in &self.documents {
            hasher.update(doc.tool_name.as_bytes());
            hasher.update(b"|");
            hasher.update(doc.text.as_bytes());
            hasher.update(b"\n");
        }
        let digest: [u8; 32] = hasher.finalize().into();
        digest.iter().fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
    }
}

/// Build the corpus from training-split labels only.
///
/// Ground-truth names absent from the catalog are logged and that
/// contribution is skipped; the build itself never fails on them.
pub fn build_corpus(
    catalog: &ToolCatalog,
    training: &[LabeledQuery],
    synonyms: &SynonymTable,
) -> Corpus {
    let mut phrasings: Vec<Vec<&str>> = vec![Vec::new(); catalog.len()];
    let mut seen: Vec<HashSet<&str>> = vec![HashSet::new(); catalog.len()];
    let mut skipped_references = 0usize;

    for query in training {
        for name in &query.ground_truth {
            let Some(idx) = catalog.index_of(name) else {
                tracing::warn!(tool = %name, query = %query.text, "Ground truth names unknown tool, skipping corpus contribution");
                skipped_references += 1;
                continue;
            };

            for text in query.template.as_deref().into_iter().chain([query.text.as_str()]) {
                let text = text.trim();
                if !text.is_empty() && seen[idx].insert(text) {
                    phrasings[idx].push(text);
                }
            }
        }
    }

    let documents: Vec<CorpusDocument> = catalog
        .iter()
        .zip(&phrasings)
        .map(|(tool, examples)| CorpusDocument {
            tool_name: tool.name.clone(),
            text: compose_document(
                &tool.description,
                &synonyms.expand(&tool.description).join(" "),
                &examples.join(" "),
            ),
        })
        .collect();

    tracing::info!(
        documents = documents.len(),
        training_queries = training.len(),
        with_history = phrasings.iter().filter(|p| !p.is_empty()).count(),
        skipped_references,
        "Corpus built"
    );

    Corpus {
        documents,
        skipped_references,
    }
}

fn compose_document(description: &str, synonym_block: &str, examples: &str) -> String {
    format!(
        "tool purpose: {} synonyms: {} example phrasings: {}",
        description, synonym_block, examples
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolDefinition;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![
            ToolDefinition::new("open_cart", "查看购物车里的商品"),
            ToolDefinition::new("open_orders", "查看订单列表"),
            ToolDefinition::new("sign_in", "每日签到领积分"),
        ])
        .unwrap()
    }

    #[test]
    fn test_one_document_per_tool_in_order() {
        let corpus = build_corpus(&catalog(), &[], &SynonymTable::default());

        assert_eq!(corpus.len(), 3);
        let names: Vec<_> = corpus.documents().iter().map(|d| d.tool_name.as_str()).collect();
        assert_eq!(names, ["open_cart", "open_orders", "sign_in"]);
        assert_eq!(
            corpus.text(2).unwrap(),
            "tool purpose: 每日签到领积分 synonyms:  example phrasings: "
        );
    }

    #[test]
    fn test_history_aggregated_and_deduplicated() {
        let training = vec![
            LabeledQuery::new("查看购物车", ["open_cart"], false).with_template("打开购物车"),
            LabeledQuery::new("查看购物车", ["open_cart"], false),
            LabeledQuery::new("购物车和订单", ["open_cart", "open_orders"], false),
        ];

        let corpus = build_corpus(&catalog(), &training, &SynonymTable::default());

        assert!(corpus
            .text(0)
            .unwrap()
            .ends_with("example phrasings: 打开购物车 查看购物车 购物车和订单"));
        assert!(corpus.text(1).unwrap().ends_with("example phrasings: 购物车和订单"));
    }

    #[test]
    fn test_synonyms_triggered_by_description() {
        let synonyms = SynonymTable::new([
            ("购物车", vec!["采购车"]),
            ("收藏", vec!["喜欢", "关注"]),
            ("签到", vec!["打卡", "采购车"]),
        ]);

        let corpus = build_corpus(&catalog(), &[], &synonyms);

        assert!(corpus.text(0).unwrap().contains("synonyms: 采购车 example"));
        assert!(corpus.text(1).unwrap().contains("synonyms:  example"));
        assert!(corpus.text(2).unwrap().contains("synonyms: 打卡 采购车 example"));
    }

    #[test]
    fn test_unknown_tool_reference_skipped() {
        let training = vec![LabeledQuery::new("找不到", ["missing_tool", "sign_in"], false)];

        let corpus = build_corpus(&catalog(), &training, &SynonymTable::default());

        assert_eq!(corpus.skipped_references, 1);
        assert!(corpus.text(2).unwrap().ends_with("找不到"));
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = build_corpus(&catalog(), &[], &SynonymTable::default());
        let b = build_corpus(&catalog(), &[], &SynonymTable::default());
        let c = build_corpus(
            &catalog(),
            &[LabeledQuery::new("签到", ["sign_in"], false)],
            &SynonymTable::default(),
        );

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_synonym_load_rejects_bad_shape() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"a": "not-a-list"}"#).unwrap();
        assert!(SynonymTable::load(file.path()).is_err());
    }
}

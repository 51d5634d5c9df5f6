//! Okapi BM25 over tokenized corpus documents.
//!
//! IDF follows the Okapi form `ln((N - n + 0.5) / (n + 0.5))`. Terms occurring
//! in more than half the documents would get a negative weight; those are
//! floored at `IDF_EPSILON * mean_idf`.

use crate::catalog::ToolCatalog;
use crate::corpus::Corpus;
use crate::error::{AppError, Result};
use crate::retrieval::tokenize::TextTokenizer;
use crate::retrieval::types::{rank_scores, RetrievalResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Fraction of the mean IDF assigned to terms with negative IDF.
const IDF_EPSILON: f32 = 0.25;

/// Tunable BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f32,
    /// Length-normalization strength, 0 (none) to 1 (full)
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn new(k1: f32, b: f32) -> Self {
        Self { k1, b }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(AppError::ValidationError(format!(
                "k1 must be a non-negative number, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(AppError::ValidationError(format!(
                "b must be within [0, 1], got {}",
                self.b
            )));
        }
        Ok(())
    }
}

/// Inverted index with per-term postings in document order.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    params: Bm25Params,
    postings: HashMap<String, Vec<(usize, u32)>>,
    idf: HashMap<String, f32>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f32,
}

impl Bm25Index {
    pub fn build(tokenized_docs: &[Vec<String>], params: Bm25Params) -> Result<Self> {
        params.validate()?;

        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(tokenized_docs.len());

        for (doc_idx, tokens) in tokenized_docs.iter().enumerate() {
            doc_lengths.push(tokens.len() as u32);

            let mut term_freqs: HashMap<&str, u32> = HashMap::new();
            for token in tokens {
                *term_freqs.entry(token.as_str()).or_insert(0) += 1;
            }
            for (term, freq) in term_freqs {
                postings
                    .entry(term.to_string())
                    .or_default()
                    .push((doc_idx, freq));
            }
        }

        let num_docs = tokenized_docs.len() as f32;
        let total_len: u64 = doc_lengths.iter().map(|&l| l as u64).sum();
        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            total_len as f32 / num_docs
        };

        // sorted so the floating-point sum is identical across rebuilds
        let mut terms: Vec<&String> = postings.keys().collect();
        terms.sort();

        let mut idf = HashMap::with_capacity(postings.len());
        let mut idf_sum = 0.0f32;
        let mut negative = Vec::new();
        for term in terms {
            let df = postings[term].len() as f32;
            let value = ((num_docs - df + 0.5) / (df + 0.5)).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }
        if !idf.is_empty() {
            let floor = IDF_EPSILON * idf_sum / idf.len() as f32;
            for term in negative {
                idf.insert(term, floor);
            }
        }

        tracing::debug!(
            k1 = params.k1,
            b = params.b,
            documents = doc_lengths.len(),
            vocabulary = postings.len(),
            avg_doc_length,
            "BM25 index built"
        );

        Ok(Self {
            params,
            postings,
            idf,
            doc_lengths,
            avg_doc_length,
        })
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn num_docs(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Score every document. Absent terms contribute zero; a repeated query
    /// term contributes once per occurrence.
    pub fn score_tokens(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_lengths.len()];
        if self.avg_doc_length <= 0.0 {
            return scores;
        }

        let Bm25Params { k1, b } = self.params;
        for token in query_tokens {
            let (Some(docs), Some(&idf)) = (self.postings.get(token), self.idf.get(token)) else {
                continue;
            };
            for &(doc_idx, freq) in docs {
                let tf = freq as f32;
                let length_ratio = self.doc_lengths[doc_idx] as f32 / self.avg_doc_length;
                let norm = k1 * (1.0 - b + b * length_ratio);
                scores[doc_idx] += idf * (tf * (k1 + 1.0)) / (tf + norm);
            }
        }

        scores
    }
}

/// BM25 retriever over the catalog's corpus.
///
/// Catalog, corpus and index are shared read-only once built, so one
/// retriever can serve any number of concurrent queries.
pub struct ToolRetriever {
    catalog: Arc<ToolCatalog>,
    corpus: Arc<Corpus>,
    tokenizer: Arc<dyn TextTokenizer>,
    index: Bm25Index,
}

impl ToolRetriever {
    /// Tokenize the corpus and build the index.
    ///
    /// Fails if the corpus is not index-aligned with the catalog.
    pub fn build(
        catalog: Arc<ToolCatalog>,
        corpus: Arc<Corpus>,
        tokenizer: Arc<dyn TextTokenizer>,
        params: Bm25Params,
    ) -> Result<Self> {
        let aligned = corpus.len() == catalog.len()
            && corpus
                .documents()
                .iter()
                .zip(catalog.iter())
                .all(|(doc, tool)| doc.tool_name == tool.name);
        if !aligned {
            return Err(AppError::ValidationError(format!(
                "corpus ({} documents) is not aligned with catalog ({} tools)",
                corpus.len(),
                catalog.len()
            )));
        }

        let tokenized: Vec<Vec<String>> = corpus
            .documents()
            .iter()
            .map(|doc| tokenizer.tokenize(&doc.text))
            .collect();
        let index = Bm25Index::build(&tokenized, params)?;

        Ok(Self {
            catalog,
            corpus,
            tokenizer,
            index,
        })
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    pub fn params(&self) -> Bm25Params {
        self.index.params()
    }

    /// Every tool's score, indexed like the catalog.
    pub fn score_all(&self, query: &str) -> Vec<f32> {
        let tokens = self.tokenizer.tokenize(query);
        self.index.score_tokens(&tokens)
    }

    /// Up to `top_k` tools with positive score.
    pub fn retrieve(&self, query: &str, top_k: usize) -> RetrievalResult {
        self.retrieve_with_scores(query, top_k).0
    }

    /// Ranked top-K together with the full score vector.
    pub fn retrieve_with_scores(&self, query: &str, top_k: usize) -> (RetrievalResult, Vec<f32>) {
        let scores = self.score_all(query);
        let ranked = rank_scores(&self.catalog, &scores, top_k);
        (ranked, scores)
    }
}

//! Okapi BM25 over an in-memory corpus.
//!
//! Used by [`InMemoryStore`](crate::store::memory::InMemoryStore) so that
//! keyword ranking in tests behaves like the FTS5 `bm25()` ranking used
//! by the SQLite backend.

use std::collections::HashMap;

pub const K1: f64 = 1.5;
pub const B: f64 = 0.75;

/// Lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Precomputed term statistics for a fixed set of documents.
#[derive(Debug, Default)]
pub struct Bm25Index {
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25Index {
    pub fn new<S: AsRef<str>>(docs: &[S]) -> Self {
        let mut term_freqs = Vec::with_capacity(docs.len());
        let mut doc_lens = Vec::with_capacity(docs.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in docs {
            let tokens = tokenize(doc.as_ref());
            doc_lens.push(tokens.len());
            let mut tf: HashMap<String, usize> = HashMap::new();
            for t in tokens {
                *tf.entry(t).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / doc_lens.len() as f64
        };

        Self {
            term_freqs,
            doc_lens,
            doc_freq,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Smoothed IDF; always positive so rare and common terms both add score.
    fn idf(&self, term: &str) -> f64 {
        let n = self.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 score of document `idx` for the tokenized query.
    pub fn score(&self, query_terms: &[String], idx: usize) -> f64 {
        let Some(tf) = self.term_freqs.get(idx) else {
            return 0.0;
        };
        let len = self.doc_lens[idx] as f64;
        let norm = if self.avg_len > 0.0 {
            len / self.avg_len
        } else {
            0.0
        };

        query_terms
            .iter()
            .filter_map(|term| tf.get(term).map(|&f| (term, f as f64)))
            .map(|(term, f)| self.idf(term) * f * (K1 + 1.0) / (f + K1 * (1.0 - B + B * norm)))
            .sum()
    }

    /// Scores for every document containing at least one query term,
    /// as `(index, score)` sorted by score descending.
    pub fn rank(&self, query: &str) -> Vec<(usize, f64)> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f64)> = (0..self.len())
            .filter(|&i| terms.iter().any(|t| self.term_freqs[i].contains_key(t)))
            .map(|i| (i, self.score(&terms, i)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }
}

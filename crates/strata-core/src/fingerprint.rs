//! Content Fingerprinting
//!
//! Derives a compact similarity signature from conversational text:
//! a coarse hash bucket for O(1) candidate filtering, up to five TF-IDF
//! key terms, and a calendar-day temporal bucket.
//!
//! The document-frequency table backing term scoring is explicit state
//! owned by one [`FingerprintIndex`] instance. Hash and bucket assignment
//! never depend on it, so identical inputs always land in the same bucket;
//! key terms may drift as the corpus grows. Callers needing reproducible
//! terms across runs snapshot and restore the corpus state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Number of coarse hash buckets
pub const HASH_BUCKETS: u32 = 1000;

/// Maximum key terms extracted per fingerprint
pub const MAX_KEY_TERMS: usize = 5;

/// Milliseconds per day, the temporal bucket width
const DAY_MILLIS: i64 = 86_400_000;

/// Temporal proximity window (days) for the similarity bonus
const TEMPORAL_WINDOW_DAYS: i64 = 7;

/// Bucket radius for the widened similarity search pass
const WIDENED_BUCKET_RADIUS: u32 = 10;

// ============================================================================
// FINGERPRINT
// ============================================================================

/// Compact similarity signature for one piece of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    /// Coarse hash bucket in `[0, 1000)`
    pub hash_bucket: u32,
    /// Up to five TF-IDF-ranked key terms, highest score first
    pub key_terms: Vec<String>,
    /// Day index of the source timestamp
    pub temporal_bucket: i64,
    /// Timestamp the fingerprint was derived from
    pub source_timestamp: DateTime<Utc>,
}

/// A match produced by [`FingerprintIndex::find_similar`]
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMatch {
    /// Index into the corpus slice passed to the search
    pub index: usize,
    /// Similarity score in `[0, 1]`
    pub score: f64,
}

// ============================================================================
// CORPUS STATE
// ============================================================================

/// Document-frequency table backing TF-IDF scoring
///
/// Grows monotonically with each `generate` call and is serializable so a
/// caller can persist it for reproducible key terms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusState {
    /// How many documents each term has appeared in
    pub doc_freq: HashMap<String, u64>,
    /// Total documents observed
    pub doc_count: u64,
}

// ============================================================================
// FINGERPRINT INDEX
// ============================================================================

/// Fingerprint generator and similarity ranker
///
/// One instance owns one corpus; independent corpora are independent
/// instances, never shared process-wide state.
#[derive(Debug, Clone, Default)]
pub struct FingerprintIndex {
    corpus: CorpusState,
}

impl FingerprintIndex {
    /// Create an index with an empty corpus
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index seeded from a previously snapshotted corpus
    pub fn with_corpus(corpus: CorpusState) -> Self {
        Self { corpus }
    }

    /// Snapshot the corpus state for persistence
    pub fn snapshot_corpus(&self) -> CorpusState {
        self.corpus.clone()
    }

    /// Replace the corpus state, e.g. after restoring from disk
    pub fn restore_corpus(&mut self, corpus: CorpusState) {
        self.corpus = corpus;
    }

    /// Total documents this index has observed
    pub fn doc_count(&self) -> u64 {
        self.corpus.doc_count
    }

    /// Generate a fingerprint from text, optional context, and a timestamp.
    ///
    /// Total over all inputs: empty text yields empty key terms and a valid
    /// hash. Updates the corpus document-frequency table as a side effect.
    pub fn generate(
        &mut self,
        text: &str,
        context: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Fingerprint {
        let normalized = match context {
            Some(c) if !c.is_empty() => normalize(&format!("{} {}", text, c)),
            _ => normalize(text),
        };

        let temporal_bucket = timestamp.timestamp_millis().div_euclid(DAY_MILLIS);
        let hash_bucket =
            multiplicative_hash(&format!("{}|{}", normalized, temporal_bucket)) % HASH_BUCKETS;

        let tokens = tokenize(&normalized);

        // Corpus grows once per generate call
        self.corpus.doc_count += 1;
        let unique: HashSet<&String> = tokens.iter().collect();
        for token in &unique {
            *self.corpus.doc_freq.entry((*token).clone()).or_insert(0) += 1;
        }

        let key_terms = self.rank_terms(&tokens);

        Fingerprint {
            hash_bucket,
            key_terms,
            temporal_bucket,
            source_timestamp: timestamp,
        }
    }

    /// Score two fingerprints for similarity, in `[0, 1]`.
    ///
    /// 0.7 for an exact bucket match, 0.3 weighted Jaccard over key terms,
    /// and a 0.05 bonus when the temporal buckets are within a week.
    pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
        let mut score = if a.hash_bucket == b.hash_bucket { 0.7 } else { 0.0 };
        score += 0.3 * jaccard(&a.key_terms, &b.key_terms);
        if (a.temporal_bucket - b.temporal_bucket).abs() <= TEMPORAL_WINDOW_DAYS {
            score += 0.05;
        }
        score.min(1.0)
    }

    /// Rank a corpus of fingerprints against a query.
    ///
    /// First pass filters to fingerprints sharing the query's bucket. If
    /// fewer than `limit` results clear `threshold`, the search widens to
    /// the 21 buckets centered on the query bucket (wrapping mod 1000).
    /// Results are sorted descending by score; ties keep corpus order.
    pub fn find_similar(
        query: &Fingerprint,
        corpus: &[Fingerprint],
        threshold: f64,
        limit: usize,
    ) -> Vec<SimilarMatch> {
        let exact = Self::rank_pass(query, corpus, threshold, |bucket| {
            bucket == query.hash_bucket
        });
        if exact.len() >= limit {
            return exact.into_iter().take(limit).collect();
        }

        let widened = Self::rank_pass(query, corpus, threshold, |bucket| {
            bucket_distance(bucket, query.hash_bucket) <= WIDENED_BUCKET_RADIUS
        });
        widened.into_iter().take(limit).collect()
    }

    fn rank_pass(
        query: &Fingerprint,
        corpus: &[Fingerprint],
        threshold: f64,
        filter: impl Fn(u32) -> bool,
    ) -> Vec<SimilarMatch> {
        let mut matches: Vec<SimilarMatch> = corpus
            .iter()
            .enumerate()
            .filter(|(_, fp)| filter(fp.hash_bucket))
            .map(|(index, fp)| SimilarMatch {
                index,
                score: Self::similarity(query, fp),
            })
            .filter(|m| m.score >= threshold)
            .collect();

        // Stable sort keeps original corpus order on equal scores
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }

    /// TF-IDF rank tokens against the corpus, returning the top terms
    fn rank_terms(&self, tokens: &[String]) -> Vec<String> {
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut tf: HashMap<&String, u64> = HashMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0) += 1;
        }

        let docs = self.corpus.doc_count as f64;
        let mut scored: Vec<(&String, f64)> = tf
            .into_iter()
            .map(|(term, count)| {
                let df = *self.corpus.doc_freq.get(term).unwrap_or(&0) as f64;
                let idf = ((docs + 1.0) / (df + 1.0)).ln() + 1.0;
                (term, count as f64 * idf)
            })
            .collect();

        // Alphabetical tiebreak keeps extraction deterministic
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        scored
            .into_iter()
            .take(MAX_KEY_TERMS)
            .map(|(term, _)| term.clone())
            .collect()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Lowercase and collapse runs of whitespace to single spaces
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 32-bit multiplicative hash, seed 0, factor 31
fn multiplicative_hash(input: &str) -> u32 {
    let mut hash: u32 = 0;
    for byte in input.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u32);
    }
    hash
}

/// Shortest wrapping distance between two buckets mod 1000
fn bucket_distance(a: u32, b: u32) -> u32 {
    let d = a.abs_diff(b) % HASH_BUCKETS;
    d.min(HASH_BUCKETS - d)
}

/// Jaccard similarity over term sets.
///
/// Two empty sets are identical (1.0); one empty set shares nothing (0.0).
fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let sa: HashSet<&String> = a.iter().collect();
    let sb: HashSet<&String> = b.iter().collect();
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

/// Split normalized text into scoreable tokens
fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_string()
        })
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Common English stop words excluded from key-term extraction
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "been", "being", "have", "has", "had", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
    "ought", "used", "this", "that", "these", "those", "with", "from", "into", "through",
    "during", "before", "after", "above", "below", "between", "under", "again", "further",
    "then", "once", "here", "there", "when", "where", "why", "how", "all", "each", "few",
    "more", "most", "other", "some", "such", "nor", "not", "only", "own", "same", "than",
    "too", "very", "just", "because", "until", "while", "about", "but", "you", "your",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_generate_deterministic_for_fixed_corpus() {
        let when = ts("2026-08-30T12:00:00Z");
        let mut a = FingerprintIndex::new();
        let mut b = FingerprintIndex::new();
        let fa = a.generate("Started a new Rust project today", None, when);
        let fb = b.generate("Started a new Rust project today", None, when);
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_hash_bucket_ignores_corpus_growth() {
        let when = ts("2026-08-30T12:00:00Z");
        let mut index = FingerprintIndex::new();
        let first = index.generate("dependency resolution failed", None, when);
        for i in 0..50 {
            index.generate(&format!("unrelated filler text number {}", i), None, when);
        }
        let again = index.generate("dependency resolution failed", None, when);
        assert_eq!(first.hash_bucket, again.hash_bucket);
        assert_eq!(first.temporal_bucket, again.temporal_bucket);
    }

    #[test]
    fn test_empty_text_yields_valid_fingerprint() {
        let mut index = FingerprintIndex::new();
        let fp = index.generate("", None, ts("2026-08-30T00:00:01Z"));
        assert!(fp.key_terms.is_empty());
        assert!(fp.hash_bucket < HASH_BUCKETS);
    }

    #[test]
    fn test_key_terms_capped_at_five() {
        let mut index = FingerprintIndex::new();
        let fp = index.generate(
            "alpha bravo charlie delta echo foxtrot golf hotel india juliet",
            None,
            Utc::now(),
        );
        assert_eq!(fp.key_terms.len(), MAX_KEY_TERMS);
    }

    #[test]
    fn test_similarity_identity_and_bounds() {
        let mut index = FingerprintIndex::new();
        let a = index.generate("refactored the storage layer", None, Utc::now());
        let b = index.generate("completely different topic entirely", None, Utc::now());
        assert!((FingerprintIndex::similarity(&a, &a) - 1.0).abs() < 1e-9);
        let cross = FingerprintIndex::similarity(&a, &b);
        assert!((0.0..=1.0).contains(&cross));
    }

    #[test]
    fn test_similarity_empty_term_rules() {
        let when = Utc::now();
        let mut index = FingerprintIndex::new();
        let empty = index.generate("", None, when);
        let full = index.generate("storage layer refactor", None, when);
        // Jaccard(empty, empty) contributes the full 0.3
        let self_score = FingerprintIndex::similarity(&empty, &empty);
        assert!((self_score - 1.0).abs() < 1e-9);
        // One empty set contributes nothing from terms
        let cross = FingerprintIndex::similarity(&empty, &full);
        assert!(cross <= 0.05 + 1e-9);
    }

    #[test]
    fn test_find_similar_exact_bucket_first() {
        let when = ts("2026-08-30T12:00:00Z");
        let mut index = FingerprintIndex::new();
        let query = index.generate("database migration plan", None, when);
        let same = query.clone();
        let mut other = index.generate("totally unrelated content", None, when);
        other.hash_bucket = (query.hash_bucket + 500) % HASH_BUCKETS;

        let corpus = vec![other, same];
        let results = FingerprintIndex::find_similar(&query, &corpus, 0.5, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, 1);
        assert!((results[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_find_similar_widens_to_neighbor_buckets() {
        let when = ts("2026-08-30T12:00:00Z");
        let mut index = FingerprintIndex::new();
        let query = index.generate("database migration plan", None, when);
        let mut neighbor = query.clone();
        neighbor.hash_bucket = (query.hash_bucket + 3) % HASH_BUCKETS;

        // No exact-bucket occupants, neighbor clears threshold on terms alone
        let results = FingerprintIndex::find_similar(&query, &[neighbor], 0.3, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, 0);
    }

    #[test]
    fn test_bucket_distance_wraps() {
        assert_eq!(bucket_distance(999, 2), 3);
        assert_eq!(bucket_distance(2, 999), 3);
        assert_eq!(bucket_distance(10, 10), 0);
    }

    #[test]
    fn test_corpus_snapshot_restore() {
        let mut index = FingerprintIndex::new();
        index.generate("memorable text about storage", None, Utc::now());
        let snap = index.snapshot_corpus();

        let restored = FingerprintIndex::with_corpus(snap.clone());
        assert_eq!(restored.doc_count(), 1);
        assert_eq!(snap.doc_freq.get("storage"), Some(&1));
    }
}

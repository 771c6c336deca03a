//! Lexical similarity primitives shared by the round manager and the
//! post-debate analytics.
//!
//! Everything here is deterministic term-frequency arithmetic; no model
//! is consulted.

use std::collections::HashMap;

/// Minimum token length considered a content word.
const MIN_WORD_LEN: usize = 3;

/// Lowercased content-word frequency map of a text.
#[must_use]
pub fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut freqs: HashMap<String, f64> = HashMap::new();
    for word in tokenize(text) {
        *freqs.entry(word).or_insert(0.0) += 1.0;
    }
    freqs
}

/// Lowercased content words of a text.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= MIN_WORD_LEN)
        .map(str::to_lowercase)
}

/// Cosine similarity between two term-frequency maps, in [0, 1].
#[must_use]
pub fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .filter_map(|(word, &weight)| b.get(word).map(|&other| weight * other))
        .sum();
    let norm_a: f64 = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|v| v * v).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

/// Fraction of `text`'s content words that also occur in `other`.
#[must_use]
pub fn overlap_ratio(text: &str, other: &str) -> f64 {
    let words: Vec<String> = tokenize(text).collect();
    if words.is_empty() {
        return 0.0;
    }
    let other_words: std::collections::HashSet<String> = tokenize(other).collect();
    let shared = words.iter().filter(|w| other_words.contains(*w)).count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = shared as f64 / words.len() as f64;
    ratio
}

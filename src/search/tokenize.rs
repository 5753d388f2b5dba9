//! Tokenization shared by indexing, querying, and similarity scoring.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::memory::Memory;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9_]+").expect("invalid regex"));

/// Shortest token kept.
pub const MIN_TOKEN_LEN: usize = 2;

/// Lowercase word tokens of at least [`MIN_TOKEN_LEN`] characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_PATTERN
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

/// Term frequencies over a memory's title, content, observations, and tags.
pub fn memory_terms(memory: &Memory) -> HashMap<String, u32> {
    let mut terms: HashMap<String, u32> = HashMap::new();
    let fields = memory
        .title
        .iter()
        .chain(std::iter::once(&memory.content))
        .chain(&memory.observations)
        .chain(&memory.tags);
    for field in fields {
        for token in tokenize(field) {
            *terms.entry(token).or_default() += 1;
        }
    }
    terms
}

/// Cosine similarity of two term-frequency vectors, in `[0, 1]`.
pub fn cosine(a: &HashMap<String, u32>, b: &HashMap<String, u32>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(t, x)| large.get(t).map(|y| f64::from(*x) * f64::from(*y)))
        .sum();
    let norm = |v: &HashMap<String, u32>| {
        v.values()
            .map(|x| f64::from(*x) * f64::from(*x))
            .sum::<f64>()
            .sqrt()
    };
    (dot / (norm(a) * norm(b))).clamp(0.0, 1.0)
}

//! A small, dependency-free tokenizer shared by indexing and querying.
//!
//! Tokenization must be identical on both sides of the inverted index, so
//! this is the single place either path calls into.

/// Splits text into lowercase alphanumeric tokens.
///
/// Punctuation and whitespace are treated as separators; tokens shorter
/// than two characters are dropped (they dominate postings lists without
/// adding much discriminating power).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.len() >= 2)
        .collect()
}

/// Counts term frequencies within a token stream.
///
/// Returns `(term, frequency)` pairs in first-seen order, which keeps the
/// output deterministic for tests without needing a sort.
pub fn term_frequencies(tokens: &[String]) -> Vec<(String, u32)> {
    let mut order = Vec::new();
    let mut counts = std::collections::HashMap::new();
    for token in tokens {
        if !counts.contains_key(token) {
            order.push(token.clone());
        }
        *counts.entry(token.clone()).or_insert(0u32) += 1;
    }
    order.into_iter().map(|t| { let c = counts[&t]; (t, c) }).collect()
}

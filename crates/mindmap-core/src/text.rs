//! Tokenization and set similarity shared by seeding, caching and learning.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being",
    "have", "has", "had", "do", "does", "did", "will", "would", "could",
    "should", "may", "might", "shall", "can", "need", "to", "of", "in",
    "for", "on", "with", "at", "by", "from", "as", "into", "through",
    "during", "before", "after", "out", "off", "over", "under", "again",
    "then", "once", "here", "there", "when", "where", "why", "how", "all",
    "each", "every", "both", "few", "more", "most", "other", "some", "such",
    "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very",
    "and", "but", "or", "if", "while", "what", "which", "who", "this",
    "that", "these", "those", "it", "its", "find", "show", "get", "about",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Split an identifier on lower-to-upper case transitions.
///
/// `parseConfigFile` becomes `parse`, `Config`, `File`.
fn camel_parts(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_lower = false;
    for (i, c) in word.char_indices() {
        if c.is_uppercase() && prev_lower {
            parts.push(&word[start..i]);
            start = i;
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    parts.push(&word[start..]);
    parts
}

/// Lowercase tokens of a text or identifier, in first-seen order, deduplicated.
///
/// Splits on anything that is not alphanumeric (so paths and snake_case
/// break apart), additionally emits camelCase parts, and drops stopwords
/// and tokens shorter than three characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut push = |t: String| {
        if t.len() >= 3 && !is_stopword(&t) && seen.insert(t.clone()) {
            out.push(t);
        }
    };

    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        push(word.to_lowercase());
        let parts = camel_parts(word);
        if parts.len() > 1 {
            for part in parts {
                push(part.to_lowercase());
            }
        }
    }
    out
}

/// Tokens of a text as an ordered set.
pub fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity of two token sets. Two empty sets are identical.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_filters_stopwords() {
        let tokens = tokenize("the cell is a membrane");
        assert_eq!(tokens, vec!["cell".to_string(), "membrane".to_string()]);
    }

    #[test]
    fn tokenizer_splits_paths_and_identifiers() {
        let tokens = tokenize("src/auth/loginHandler.rs");
        assert!(tokens.contains(&"src".to_string()));
        assert!(tokens.contains(&"auth".to_string()));
        assert!(tokens.contains(&"loginhandler".to_string()));
        assert!(tokens.contains(&"login".to_string()));
        assert!(tokens.contains(&"handler".to_string()));
        assert!(!tokens.contains(&"rs".to_string()));
    }

    #[test]
    fn tokenizer_deduplicates() {
        assert_eq!(tokenize("cache Cache CACHE"), vec!["cache".to_string()]);
    }

    #[test]
    fn jaccard_bounds() {
        let a = token_set("payment service timeout");
        let b = token_set("payment service timeout");
        let c = token_set("render dashboard charts");
        assert_eq!(jaccard(&a, &b), 1.0);
        assert_eq!(jaccard(&a, &c), 0.0);
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 1.0);
        let d = token_set("payment gateway");
        let j = jaccard(&a, &d);
        assert!(j > 0.0 && j < 1.0);
    }
}

//! Cheap textual similarity used to pre-filter merge candidates

use std::collections::HashSet;

use crate::models::KnowledgePoint;

pub const TITLE_WEIGHT: f64 = 0.6;
pub const CONTENT_WEIGHT: f64 = 0.4;
/// Only the opening of the content is compared
pub const CONTENT_PREFIX_CHARS: usize = 200;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "of", "and", "or", "to", "in", "on", "for", "with", "is", "are", "its", "by", "as", "at",
    "from", "what", "how", "why", "vs", "versus",
];

/// Weighted title + content similarity in `[0, 1]`
pub fn similarity(a: &KnowledgePoint, b: &KnowledgePoint) -> f64 {
    TITLE_WEIGHT * title_similarity(&a.title, &b.title) + CONTENT_WEIGHT * content_similarity(&a.content, &b.content)
}

/// Larger of word-set overlap and character-bigram overlap
///
/// Word overlap catches reordered titles ("Definition of Derivative"),
/// bigrams catch inflections and titles in unspaced scripts.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    token_dice(&a, &b).max(strsim::sorensen_dice(&a, &b))
}

pub fn content_similarity(a: &str, b: &str) -> f64 {
    let a: String = a.chars().take(CONTENT_PREFIX_CHARS).collect::<String>().to_lowercase();
    let b: String = b.chars().take(CONTENT_PREFIX_CHARS).collect::<String>().to_lowercase();
    strsim::sorensen_dice(&a, &b)
}

fn tokens(text: &str) -> HashSet<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .collect()
}

fn token_dice(a: &str, b: &str) -> f64 {
    let a = tokens(a);
    let b = tokens(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    2.0 * a.intersection(&b).count() as f64 / (a.len() + b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceId;

    #[test]
    fn test_reordered_titles_match() {
        assert_eq!(title_similarity("Derivative Definition", "Definition of Derivative"), 1.0);
    }

    #[test]
    fn test_unrelated_titles_low() {
        assert!(title_similarity("Limit Concept", "Derivative Definition") < 0.3);
    }

    #[test]
    fn test_weighted_score() {
        let source = SourceId::new("a.srt");
        let a = KnowledgePoint::new(&source, 0, "Chain Rule", "Differentiate composite functions.", 3);
        let b = KnowledgePoint::new(&source, 1, "chain rule", "Differentiate composite functions.", 3);
        assert!((similarity(&a, &b) - 1.0).abs() < 1e-9);

        let c = KnowledgePoint::new(&source, 2, "Taylor Series", "Approximate with polynomials.", 3);
        assert!(similarity(&a, &c) < 0.6);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(title_similarity("", ""), strsim::sorensen_dice("", ""));
        assert_eq!(token_dice("the of", "a"), 0.0);
    }
}

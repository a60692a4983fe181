//! Text normalization and trigram similarity shared by the lexical matchers.

use std::collections::HashSet;

/// Minimum token length (in chars) considered meaningful for matching.
pub const MIN_TOKEN_CHARS: usize = 3;

/// Lowercase, fold `ё` to `е`, turn punctuation into spaces and collapse
/// whitespace.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        let ch = if ch == 'ё' { 'е' } else { ch };
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Split normalized text into words.
pub fn words(normalized: &str) -> Vec<&str> {
    normalized.split_whitespace().collect()
}

/// Words long enough to carry meaning (drops prepositions and the like).
pub fn content_words(normalized: &str) -> Vec<&str> {
    normalized
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_TOKEN_CHARS)
        .collect()
}

/// Padded trigram set of a single word, `pg_trgm` style (two leading
/// spaces, one trailing).
pub fn trigrams(word: &str) -> HashSet<[char; 3]> {
    let padded: Vec<char> = "  "
        .chars()
        .chain(word.chars())
        .chain(std::iter::once(' '))
        .collect();
    padded.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
}

/// Jaccard overlap of two words' trigram sets, in [0, 1].
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let ta = trigrams(a);
    let tb = trigrams(b);
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

/// Whether `phrase` occurs in `text` as a contiguous word sequence.
/// Both inputs must already be normalized.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    let phrase_words = words(phrase);
    if phrase_words.is_empty() {
        return false;
    }
    let text_words = words(text);
    text_words
        .windows(phrase_words.len())
        .any(|w| w == phrase_words.as_slice())
}

/// Similarity of a (normalized) phrase against (normalized) text.
///
/// Exact phrase containment scores 1.0; otherwise each meaningful phrase
/// word is matched to its closest text word and the scores are averaged.
pub fn phrase_similarity(text: &str, phrase: &str) -> f64 {
    if contains_phrase(text, phrase) {
        return 1.0;
    }
    let mut phrase_words = content_words(phrase);
    if phrase_words.is_empty() {
        phrase_words = words(phrase);
    }
    let text_words = content_words(text);
    if phrase_words.is_empty() || text_words.is_empty() {
        return 0.0;
    }
    let total: f64 = phrase_words
        .iter()
        .map(|pw| {
            text_words
                .iter()
                .map(|tw| trigram_similarity(pw, tw))
                .fold(0.0, f64::max)
        })
        .sum();
    total / phrase_words.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_case_yo_and_punctuation() {
        assert_eq!(normalize("Течёт  КРАН, в ванной!!"), "течет кран в ванной");
        assert_eq!(normalize("  ул. Ленина, д.5 "), "ул ленина д 5");
        assert_eq!(normalize("..."), "");
    }

    #[test]
    fn test_content_words_drop_short_tokens() {
        assert_eq!(content_words("течет кран в ванной"), vec!["течет", "кран", "ванной"]);
    }

    #[test]
    fn test_trigram_similarity_inflection() {
        let sim = trigram_similarity("подъезд", "подъезде");
        assert!((sim - 0.7).abs() < 1e-9, "got {}", sim);
        assert_eq!(trigram_similarity("лифт", "лифт"), 1.0);
        assert!(trigram_similarity("лифт", "батарея") < 0.1);
    }

    #[test]
    fn test_contains_phrase_needs_word_boundaries() {
        assert!(contains_phrase("течет кран в ванной", "течет кран"));
        assert!(!contains_phrase("краны текут", "кран"));
        assert!(!contains_phrase("течет кран", ""));
    }

    #[test]
    fn test_phrase_similarity_exact_and_fuzzy() {
        assert_eq!(phrase_similarity("не работает лифт", "лифт"), 1.0);
        let fuzzy = phrase_similarity("проблема в подъезде", "подъезд");
        assert!(fuzzy > 0.6 && fuzzy < 1.0);
        assert_eq!(phrase_similarity("", "лифт"), 0.0);
    }
}

pub mod analysis;
pub mod features;
pub mod similarity;

pub use analysis::*;
pub use features::*;
pub use similarity::*;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"\b\w+\b").unwrap();
}

/// Lowercase word tokens (`\b\w+\b`) of `text`
pub(crate) fn word_tokens(text: &str) -> Vec<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// True when `term` occurs in `words` as a whole word, or as a run of whole
/// words for multi-word terms
pub(crate) fn contains_term(words: &[String], term: &str) -> bool {
    let parts: Vec<&str> = term.split_whitespace().collect();
    match parts.len() {
        0 => false,
        1 => words.iter().any(|w| w == term),
        n => words
            .windows(n)
            .any(|window| window.iter().zip(&parts).all(|(w, p)| w == p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_term_whole_words_only() {
        let words = word_tokens("Show revenue over time for customers");
        assert!(contains_term(&words, "over time"));
        assert!(contains_term(&words, "show"));
        assert!(!contains_term(&words, "custom"));
        assert!(!contains_term(&words, "time for revenue"));
    }
}

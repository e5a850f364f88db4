//! Feature Extractor
//!
//! Turns a natural-language question into the symbolic features the
//! similarity matcher compares: intent, question type, vocabulary hits
//! (entities, operations, time, aggregation, comparison), key phrases and
//! normalized tokens. Pure and deterministic; features are never persisted.

use super::{contains_term, word_tokens};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Coarse request intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Retrieve,
    Count,
    Sum,
    Average,
    Compare,
    Trend,
    Top,
    Bottom,
    Filter,
    Group,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Retrieve => "RETRIEVE",
            Intent::Count => "COUNT",
            Intent::Sum => "SUM",
            Intent::Average => "AVERAGE",
            Intent::Compare => "COMPARE",
            Intent::Trend => "TREND",
            Intent::Top => "TOP",
            Intent::Bottom => "BOTTOM",
            Intent::Filter => "FILTER",
            Intent::Group => "GROUP",
            Intent::General => "GENERAL",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grammatical shape of the question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    What,
    HowMany,
    How,
    When,
    Where,
    Who,
    Why,
    Command,
    Statement,
}

/// Symbolic description of one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionFeatures {
    pub intent: Intent,
    pub question_type: QuestionType,
    pub entities: BTreeSet<String>,
    pub operations: BTreeSet<String>,
    pub time_references: BTreeSet<String>,
    pub aggregation_terms: BTreeSet<String>,
    pub comparison_terms: BTreeSet<String>,
    pub key_phrases: BTreeSet<String>,
    /// Candidate table names: the first five alphabetic words longer than three characters
    pub table_hints: BTreeSet<String>,
    pub normalized_tokens: Vec<String>,
}

/// Ordered trigger table; the first intent with a matching trigger wins
const INTENT_TRIGGERS: &[(Intent, &[&str])] = &[
    (Intent::Retrieve, &["show", "list", "display", "get", "find"]),
    (Intent::Count, &["count", "how many", "number of"]),
    (Intent::Sum, &["total", "sum", "add up"]),
    (Intent::Average, &["average", "mean", "avg"]),
    (Intent::Compare, &["compare", "versus", "vs", "difference"]),
    (Intent::Trend, &["trend", "over time", "by month", "by year"]),
    (Intent::Top, &["top", "highest", "best", "maximum"]),
    (Intent::Bottom, &["bottom", "lowest", "worst", "minimum"]),
    (Intent::Filter, &["filter", "where", "with", "having"]),
    (Intent::Group, &["group", "by", "category", "segment"]),
];

const QUESTION_TYPE_PREFIXES: &[(QuestionType, &[&str])] = &[
    (QuestionType::What, &["what", "which"]),
    (QuestionType::HowMany, &["how many", "how much"]),
    (QuestionType::How, &["how"]),
    (QuestionType::When, &["when"]),
    (QuestionType::Where, &["where", "in which"]),
    (QuestionType::Who, &["who"]),
    (QuestionType::Why, &["why"]),
    (QuestionType::Command, &["show", "display", "list"]),
];

fn word_set(words: &[&'static str]) -> HashSet<&'static str> {
    words.iter().copied().collect()
}

lazy_static! {
    static ref BUSINESS_ENTITIES: HashSet<&'static str> = word_set(&[
        "sales", "revenue", "profit", "income", "cost", "expense", "margin",
        "customer", "client", "user", "account", "contact",
        "product", "item", "sku", "inventory", "stock",
        "order", "transaction", "purchase", "payment", "invoice",
        "region", "territory", "country", "state", "city", "location",
        "category", "type", "group", "segment", "division",
        "employee", "staff", "person", "team", "department",
    ]);

    static ref OPERATIONS: HashSet<&'static str> = word_set(&[
        "show", "display", "list", "get", "find", "search", "lookup",
        "count", "sum", "total", "average", "mean", "max", "min",
        "compare", "analyze", "calculate", "compute", "measure",
        "filter", "where", "having", "group", "sort", "order",
    ]);

    static ref TIME_REFERENCES: HashSet<&'static str> = word_set(&[
        "today", "yesterday", "tomorrow", "week", "month", "year", "quarter",
        "daily", "weekly", "monthly", "yearly", "annual", "quarterly",
        "current", "last", "previous", "next", "recent", "latest",
        "january", "february", "march", "april", "may", "june",
        "july", "august", "september", "october", "november", "december",
        "2023", "2024", "2025",
    ]);

    static ref AGGREGATION_TERMS: HashSet<&'static str> = word_set(&[
        "total", "sum", "count", "average", "mean", "median", "mode",
        "max", "maximum", "min", "minimum", "highest", "lowest",
        "top", "bottom", "best", "worst", "most", "least",
    ]);

    static ref COMPARISON_TERMS: HashSet<&'static str> = word_set(&[
        "greater", "less", "more", "fewer", "above", "below", "over", "under",
        "between", "within", "outside", "equals", "different", "same",
        "versus", "vs", "compared", "against", "than",
    ]);

    /// Words ignored when building normalized tokens
    static ref TOKEN_STOP_WORDS: HashSet<&'static str> = word_set(&[
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "from", "up", "about", "into", "through", "during",
        "this", "that", "these", "those", "am", "is", "are", "was", "were",
        "be", "been", "being", "have", "has", "had", "do", "does", "did",
        "will", "would", "should", "could", "may", "might", "must", "can",
        "shall", "me", "my", "give",
    ]);

    static ref KEY_PHRASE_PATTERNS: Vec<Regex> = [
        r"sales by \w+",
        r"total \w+",
        r"top \d+ \w+",
        r"average \w+",
        r"count of \w+",
        r"\w+ by month",
        r"\w+ by year",
        r"\w+ by category",
        r"last \w+ \w+",
        r"current \w+",
        r"\w+ trends?",
        r"\w+ performance",
        r"\w+ analysis",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect();

    static ref NON_WORD: Regex = Regex::new(r"[^\w]").unwrap();
}

/// Stateless extractor; all vocabularies are process-wide constants
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, question: &str) -> QuestionFeatures {
        let lowered = question.trim().to_lowercase();
        let words = word_tokens(&lowered);

        let mut features = QuestionFeatures {
            intent: classify_intent(&words),
            question_type: classify_question_type(&words),
            entities: BTreeSet::new(),
            operations: BTreeSet::new(),
            time_references: BTreeSet::new(),
            aggregation_terms: BTreeSet::new(),
            comparison_terms: BTreeSet::new(),
            key_phrases: extract_key_phrases(&lowered),
            table_hints: BTreeSet::new(),
            normalized_tokens: normalized_tokens(&lowered),
        };

        let raw_words: Vec<&str> = lowered.split_whitespace().collect();
        for raw in &raw_words {
            let clean = NON_WORD.replace_all(raw, "").to_string();
            if clean.is_empty() {
                continue;
            }
            let vocabularies: [(&HashSet<&str>, &mut BTreeSet<String>); 5] = [
                (&*BUSINESS_ENTITIES, &mut features.entities),
                (&*OPERATIONS, &mut features.operations),
                (&*TIME_REFERENCES, &mut features.time_references),
                (&*AGGREGATION_TERMS, &mut features.aggregation_terms),
                (&*COMPARISON_TERMS, &mut features.comparison_terms),
            ];
            for (vocabulary, bucket) in vocabularies {
                if vocabulary.contains(clean.as_str()) {
                    bucket.insert(clean.clone());
                }
            }
        }

        features.table_hints = raw_words
            .iter()
            .filter(|w| w.chars().count() > 3 && w.chars().all(char::is_alphabetic))
            .take(5)
            .map(|w| w.to_string())
            .collect();

        features
    }
}

fn classify_intent(words: &[String]) -> Intent {
    INTENT_TRIGGERS
        .iter()
        .find(|(_, triggers)| triggers.iter().any(|t| contains_term(words, t)))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::General)
}

fn classify_question_type(words: &[String]) -> QuestionType {
    for (question_type, prefixes) in QUESTION_TYPE_PREFIXES {
        for prefix in *prefixes {
            let parts: Vec<&str> = prefix.split_whitespace().collect();
            if words.len() >= parts.len() && words.iter().zip(&parts).all(|(w, p)| w == p) {
                return *question_type;
            }
        }
    }
    QuestionType::Statement
}

fn extract_key_phrases(lowered: &str) -> BTreeSet<String> {
    KEY_PHRASE_PATTERNS
        .iter()
        .flat_map(|pattern| pattern.find_iter(lowered).map(|m| m.as_str().to_string()))
        .collect()
}

/// `\b\w+\b` words minus stop words, three or more characters
pub fn normalized_tokens(question: &str) -> Vec<String> {
    word_tokens(&question.to_lowercase())
        .into_iter()
        .filter(|w| !TOKEN_STOP_WORDS.contains(w.as_str()) && w.chars().count() > 2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_total_sales_by_year() {
        let features = FeatureExtractor::new().extract("What were total sales by year?");
        assert_eq!(features.intent, Intent::Sum);
        assert_eq!(features.question_type, QuestionType::What);
        assert_eq!(features.entities, set(&["sales"]));
        assert_eq!(features.operations, set(&["total"]));
        assert_eq!(features.time_references, set(&["year"]));
        assert_eq!(features.aggregation_terms, set(&["total"]));
        assert!(features.key_phrases.contains("total sales"));
        assert!(features.key_phrases.contains("sales by year"));
        assert_eq!(features.normalized_tokens, vec!["what", "total", "sales", "year"]);
    }

    #[test]
    fn test_intent_triggers_are_whole_words() {
        let extractor = FeatureExtractor::new();
        // "stockholders" contains "to" and "overview" contains "over"
        assert_eq!(extractor.extract("stockholders overview").intent, Intent::General);
        assert_eq!(extractor.extract("Which customers have the highest revenue").intent, Intent::Top);
        assert_eq!(extractor.extract("how many orders shipped").intent, Intent::Count);
        assert_eq!(extractor.extract("revenue over time").intent, Intent::Trend);
        assert_eq!(extractor.extract("revenue per segment").intent, Intent::Group);
    }

    #[test]
    fn test_question_type_prefixes() {
        let extractor = FeatureExtractor::new();
        assert_eq!(extractor.extract("How many customers?").question_type, QuestionType::HowMany);
        assert_eq!(extractor.extract("How do regions compare").question_type, QuestionType::How);
        assert_eq!(extractor.extract("In which city is revenue highest").question_type, QuestionType::Where);
        assert_eq!(extractor.extract("List all products").question_type, QuestionType::Command);
        assert_eq!(extractor.extract("Revenue for 2024").question_type, QuestionType::Statement);
    }

    #[test]
    fn test_table_hints_limited_to_five() {
        let features = FeatureExtractor::new()
            .extract("show customers orders products regions employees invoices");
        assert_eq!(features.table_hints.len(), 5);
        assert!(!features.table_hints.contains("invoices"));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = FeatureExtractor::new();
        let q = "Compare sales versus cost for each region last quarter";
        assert_eq!(extractor.extract(q), extractor.extract(q));
    }
}

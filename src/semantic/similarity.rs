//! Similarity Matcher
//!
//! Scores a stored knowledge entry against the features of an incoming
//! question. The score is a weighted blend of intent, entity, operation,
//! text, structure and key-phrase similarity, clamped to [0, 1]. A candidate
//! whose stored hash equals the incoming question's hash short-circuits to 1.0.

use super::features::{FeatureExtractor, Intent, QuestionFeatures};
use crate::knowledge::{question_hash, KnowledgeEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Exact,
    VerySimilar,
    Similar,
    SomewhatSimilar,
    LooselyRelated,
}

/// Per-component weights; they sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    pub intent: f64,
    pub entities: f64,
    pub operations: f64,
    pub text: f64,
    pub structure: f64,
    pub phrases: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            intent: 0.25,
            entities: 0.25,
            operations: 0.20,
            text: 0.15,
            structure: 0.10,
            phrases: 0.05,
        }
    }
}

/// Symmetric partial credit between distinct intents
const RELATED_INTENTS: &[(Intent, Intent, f64)] = &[
    (Intent::Retrieve, Intent::Filter, 0.7),
    (Intent::Count, Intent::Sum, 0.6),
    (Intent::Top, Intent::Bottom, 0.5),
    (Intent::Average, Intent::Sum, 0.6),
    (Intent::Compare, Intent::Trend, 0.5),
];

#[derive(Debug, Default, Clone)]
pub struct SimilarityMatcher {
    extractor: FeatureExtractor,
    weights: SimilarityWeights,
}

impl SimilarityMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: SimilarityWeights) -> Self {
        Self {
            extractor: FeatureExtractor::new(),
            weights,
        }
    }

    /// Similarity of `candidate` to `question` (whose features are `features`)
    pub fn score(&self, features: &QuestionFeatures, question: &str, candidate: &KnowledgeEntry) -> f64 {
        if question_hash(candidate.category.category(), question) == candidate.question_hash {
            return 1.0;
        }

        let other = self.extractor.extract(&candidate.question);
        self.score_features(features, &other)
    }

    /// Weighted blend over two feature sets
    pub fn score_features(&self, a: &QuestionFeatures, b: &QuestionFeatures) -> f64 {
        let w = &self.weights;
        let text = normalized_levenshtein(&a.normalized_tokens.join(" "), &b.normalized_tokens.join(" "));

        let total = w.intent * intent_similarity(a.intent, b.intent)
            + w.entities * jaccard_or(&a.entities, &b.entities, 0.0)
            + w.operations * jaccard_or(&a.operations, &b.operations, 0.3)
            + w.text * text
            + w.structure * structural_similarity(a, b)
            + w.phrases * jaccard_or(&a.key_phrases, &b.key_phrases, 0.0);

        total.clamp(0.0, 1.0)
    }

    pub fn classify(&self, score: f64) -> MatchType {
        classify(score)
    }
}

pub fn classify(score: f64) -> MatchType {
    match score {
        s if s >= 0.95 => MatchType::Exact,
        s if s >= 0.85 => MatchType::VerySimilar,
        s if s >= 0.75 => MatchType::Similar,
        s if s >= 0.65 => MatchType::SomewhatSimilar,
        _ => MatchType::LooselyRelated,
    }
}

fn intent_similarity(a: Intent, b: Intent) -> f64 {
    if a == b {
        return 1.0;
    }
    RELATED_INTENTS
        .iter()
        .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
        .map(|(_, _, score)| *score)
        .unwrap_or(0.0)
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Jaccard index; both empty scores 1.0, exactly one empty scores `one_empty`
fn jaccard_or(a: &BTreeSet<String>, b: &BTreeSet<String>, one_empty: f64) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => one_empty,
        (false, false) => jaccard(a, b),
    }
}

fn structural_similarity(a: &QuestionFeatures, b: &QuestionFeatures) -> f64 {
    let mut score = 0.0;
    if a.question_type == b.question_type {
        score += 0.4;
    }
    score += 0.3 * jaccard_or(&a.time_references, &b.time_references, 0.0);
    score += 0.3 * jaccard_or(&a.aggregation_terms, &b.aggregation_terms, 0.0);
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::knowledge::normalize_question;
    use chrono::Utc;

    fn entry(question: &str, dialect: Dialect) -> KnowledgeEntry {
        let now = Utc::now();
        KnowledgeEntry {
            id: 1,
            category: dialect,
            question: question.to_string(),
            normalized_question: normalize_question(question),
            question_hash: question_hash(dialect.category(), question),
            context: None,
            query_text: "SELECT 1".to_string(),
            answer: String::new(),
            response_type: "text".to_string(),
            success_count: 1,
            failure_count: 0,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
            last_used: now,
        }
    }

    #[test]
    fn test_reordered_question_short_circuits_to_exact() {
        let matcher = SimilarityMatcher::new();
        let question = "sales by year total";
        let features = FeatureExtractor::new().extract(question);
        let candidate = entry("total sales by year", Dialect::Sql);

        let score = matcher.score(&features, question, &candidate);
        assert_eq!(score, 1.0);
        assert_eq!(matcher.classify(score), MatchType::Exact);
    }

    #[test]
    fn test_hash_is_category_scoped() {
        let matcher = SimilarityMatcher::new();
        let question = "total sales by year";
        let features = FeatureExtractor::new().extract(question);
        let candidate = entry(question, Dialect::Dax);

        // Same text, hashed under the other category, so the weighted path runs
        let score = matcher.score(&features, question, &candidate);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_related_intents_are_symmetric() {
        assert_eq!(intent_similarity(Intent::Count, Intent::Sum), 0.6);
        assert_eq!(intent_similarity(Intent::Sum, Intent::Count), 0.6);
        assert_eq!(intent_similarity(Intent::Filter, Intent::Retrieve), 0.7);
        assert_eq!(intent_similarity(Intent::Trend, Intent::Top), 0.0);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let matcher = SimilarityMatcher::new();
        let extractor = FeatureExtractor::new();
        let questions = [
            "What were total sales by year?",
            "How many customers per region",
            "List products",
            "",
            "Compare revenue versus cost over time for 2024",
        ];
        for a in &questions {
            for b in &questions {
                let score = matcher.score_features(&extractor.extract(a), &extractor.extract(b));
                assert!((0.0..=1.0).contains(&score), "{} vs {} = {}", a, b, score);
            }
        }
    }

    #[test]
    fn test_unrelated_questions_score_low() {
        let matcher = SimilarityMatcher::new();
        let extractor = FeatureExtractor::new();
        let score = matcher.score_features(
            &extractor.extract("What were total sales by year?"),
            &extractor.extract("List employees in each department"),
        );
        assert!(score < 0.65);
        assert_eq!(classify(score), MatchType::LooselyRelated);
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify(0.95), MatchType::Exact);
        assert_eq!(classify(0.85), MatchType::VerySimilar);
        assert_eq!(classify(0.75), MatchType::Similar);
        assert_eq!(classify(0.65), MatchType::SomewhatSimilar);
        assert_eq!(classify(0.6499), MatchType::LooselyRelated);
    }
}

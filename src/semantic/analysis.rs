//! Question complexity analysis used to pick prompt templates and to tune
//! row limits after generation.

use super::{contains_term, word_tokens};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalyticalIntent {
    TrendAnalysis,
    Comparison,
    Ranking,
    Distribution,
    Performance,
    Relationship,
    Anomaly,
    Forecast,
    GeneralInquiry,
}

impl AnalyticalIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticalIntent::TrendAnalysis => "TREND_ANALYSIS",
            AnalyticalIntent::Comparison => "COMPARISON",
            AnalyticalIntent::Ranking => "RANKING",
            AnalyticalIntent::Distribution => "DISTRIBUTION",
            AnalyticalIntent::Performance => "PERFORMANCE",
            AnalyticalIntent::Relationship => "RELATIONSHIP",
            AnalyticalIntent::Anomaly => "ANOMALY",
            AnalyticalIntent::Forecast => "FORECAST",
            AnalyticalIntent::GeneralInquiry => "GENERAL_INQUIRY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationType {
    Sum,
    Count,
    Average,
    Max,
    Min,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Sum => "SUM",
            AggregationType::Count => "COUNT",
            AggregationType::Average => "AVERAGE",
            AggregationType::Max => "MAX",
            AggregationType::Min => "MIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeDimension {
    Year,
    Month,
    Quarter,
}

impl TimeDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeDimension::Year => "YEAR",
            TimeDimension::Month => "MONTH",
            TimeDimension::Quarter => "QUARTER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnalysis {
    pub intent: AnalyticalIntent,
    pub complexity: Complexity,
    pub requires_joins: bool,
    pub requires_aggregation: bool,
    pub requires_time_analysis: bool,
    pub requires_filtering: bool,
    pub aggregation_type: Option<AggregationType>,
    pub time_dimension: Option<TimeDimension>,
    /// Words following "by", "per", "for each" or preceding "breakdown"
    pub grouping_requirements: Vec<String>,
}

const INTENT_PATTERNS: &[(AnalyticalIntent, &[&str])] = &[
    (AnalyticalIntent::TrendAnalysis, &["trend", "over time", "progression", "growth", "decline"]),
    (AnalyticalIntent::Comparison, &["compare", "versus", "vs", "difference", "better", "worse"]),
    (AnalyticalIntent::Ranking, &["top", "bottom", "best", "worst", "highest", "lowest", "rank"]),
    (AnalyticalIntent::Distribution, &["breakdown", "distribution", "split", "allocation"]),
    (AnalyticalIntent::Performance, &["performance", "kpi", "metric", "achievement", "target"]),
    (AnalyticalIntent::Relationship, &["relationship", "correlation", "related", "connected"]),
    (AnalyticalIntent::Anomaly, &["unusual", "strange", "outlier", "anomaly", "exception"]),
    (AnalyticalIntent::Forecast, &["predict", "forecast", "future", "projection", "estimate"]),
];

const JOIN_INDICATORS: &[&str] = &["customer", "product", "order", "between", "and", "with", "from"];
const AGGREGATION_INDICATORS: &[&str] = &["total", "sum", "count", "average", "max", "min", "by"];
const TIME_INDICATORS: &[&str] = &["year", "month", "quarter", "daily", "weekly", "trend", "over time"];
const FILTER_INDICATORS: &[&str] = &["where", "filter", "only", "specific", "particular", "certain"];

const AGGREGATION_RULES: &[(AggregationType, &[&str])] = &[
    (AggregationType::Sum, &["total", "sum"]),
    (AggregationType::Count, &["count", "how many"]),
    (AggregationType::Average, &["average", "mean"]),
    (AggregationType::Max, &["max", "highest"]),
    (AggregationType::Min, &["min", "lowest"]),
];

const TIME_RULES: &[(TimeDimension, &[&str])] = &[
    (TimeDimension::Year, &["year", "yearly", "annual"]),
    (TimeDimension::Month, &["month", "monthly"]),
    (TimeDimension::Quarter, &["quarter", "quarterly"]),
];

lazy_static! {
    static ref GROUP_PATTERNS: Vec<Regex> = [
        r"\bby (\w+)",
        r"\bper (\w+)",
        r"\bfor each (\w+)",
        r"(\w+) breakdown\b",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect();
}

fn any_term(words: &[String], terms: &[&str]) -> bool {
    terms.iter().any(|t| contains_term(words, t))
}

impl QuestionAnalysis {
    pub fn analyze(question: &str) -> Self {
        let lowered = question.to_lowercase();
        let words = word_tokens(&lowered);

        let intent = INTENT_PATTERNS
            .iter()
            .find(|(_, patterns)| any_term(&words, patterns))
            .map(|(intent, _)| *intent)
            .unwrap_or(AnalyticalIntent::GeneralInquiry);

        let aggregation_type = AGGREGATION_RULES
            .iter()
            .find(|(_, terms)| any_term(&words, terms))
            .map(|(kind, _)| *kind);

        let time_dimension = TIME_RULES
            .iter()
            .find(|(_, terms)| any_term(&words, terms))
            .map(|(dimension, _)| *dimension);

        let grouping_requirements: Vec<String> = GROUP_PATTERNS
            .iter()
            .flat_map(|pattern| {
                pattern
                    .captures_iter(&lowered)
                    .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let requires_joins = any_term(&words, JOIN_INDICATORS);
        let requires_aggregation = any_term(&words, AGGREGATION_INDICATORS);
        let requires_time_analysis = any_term(&words, TIME_INDICATORS);
        let requires_filtering = any_term(&words, FILTER_INDICATORS);

        let mut score = 0;
        if requires_joins {
            score += 2;
        }
        score += [requires_aggregation, requires_time_analysis, requires_filtering]
            .iter()
            .filter(|flag| **flag)
            .count();
        if grouping_requirements.len() > 1 {
            score += 1;
        }

        let complexity = match score {
            s if s >= 4 => Complexity::Complex,
            s if s >= 2 => Complexity::Moderate,
            _ => Complexity::Simple,
        };

        Self {
            intent,
            complexity,
            requires_joins,
            requires_aggregation,
            requires_time_analysis,
            requires_filtering,
            aggregation_type,
            time_dimension,
            grouping_requirements,
        }
    }

    pub fn is_ranking(&self) -> bool {
        self.intent == AnalyticalIntent::Ranking
    }
}

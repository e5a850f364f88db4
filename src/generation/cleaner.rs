//! Completion cleaning and dialect normalisation.
//!
//! Everything a model returns passes through [`clean_completion`] before it
//! is validated or executed. The row-limit helpers are shared with the
//! repair strategies.

use crate::dialect::Dialect;
use crate::semantic::{AggregationType, Complexity, QuestionAnalysis};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

pub const DEFAULT_ROW_LIMIT: u64 = 100;
pub const MAX_ROW_LIMIT: u64 = 1000;
pub const FIX_ROW_LIMIT: u64 = 50;

lazy_static! {
    static ref FENCED: Regex = Regex::new(r"(?is)```(?:sql|dax|tsql|t-sql)?\s*(.*?)\s*```").unwrap();
    static ref LANGUAGE_PREFIX: Regex = Regex::new(r"(?i)^(sql|dax|t-sql|tsql):\s*").unwrap();
    static ref LEADING_SELECT: Regex = Regex::new(r"(?i)^\s*SELECT\s+(DISTINCT\s+)?").unwrap();
    static ref FIRST_SELECT: Regex = Regex::new(r"(?i)\bSELECT\s+(DISTINCT\s+)?").unwrap();
    static ref TOP_WORD: Regex = Regex::new(r"(?i)\bTOP\b").unwrap();
    static ref TOP_N: Regex = Regex::new(r"(?i)\b(TOP\s*\(?\s*)(\d+)").unwrap();
    static ref TRAILING_LIMIT: Regex = Regex::new(r"(?i)\s+LIMIT\s+(\d+)\s*;?\s*$").unwrap();
    static ref ANY_LIMIT: Regex = Regex::new(r"(?i)\s+LIMIT\s+(\d+)").unwrap();
    static ref ILIKE: Regex = Regex::new(r"(?i)\bILIKE\b").unwrap();
    static ref ORDER_BY: Regex = Regex::new(r"(?i)\bORDER\s+BY\b").unwrap();
    static ref EVALUATE_PREFIX: Regex = Regex::new(r"(?i)^\s*EVALUATE\b\s*").unwrap();
    static ref DAX_TABLE_FUNCTION: Regex =
        Regex::new(r"(?i)\b(SUMMARIZE|SUMMARIZECOLUMNS|FILTER|CALCULATE|CALCULATETABLE|TOPN|ADDCOLUMNS)\s*\(").unwrap();
    static ref SQL_SELECT: Regex = Regex::new(r"(?i)\bSELECT\s+").unwrap();
    static ref SQL_FROM: Regex = Regex::new(r"(?i)\bFROM\s+").unwrap();
    static ref SQL_SELECT_FROM: Regex = Regex::new(r"(?is)\bSELECT\b.*?\bFROM\b").unwrap();
    static ref SQL_WHERE: Regex = Regex::new(r"(?i)\bWHERE\b").unwrap();
    static ref TOPN_CALL: Regex = Regex::new(r"(?i)\bTOPN\s*\(").unwrap();
    static ref TOPN_N: Regex = Regex::new(r"(?i)\bTOPN\s*\(\s*(\d+)").unwrap();
    static ref SUMMARIZE_CALL: Regex = Regex::new(r"(?i)\bSUMMARIZE(COLUMNS)?\s*\(").unwrap();
    static ref SIMPLE_TABLE: Regex = Regex::new(r"(?i)^EVALUATE\s+('[^']+'|\w+)\s*$").unwrap();
}

/// Strip markup from a completion and normalise it for `dialect`.
///
/// Returns an empty string when nothing query-like is left.
pub fn clean_completion(response: &str, dialect: Dialect) -> String {
    let stripped = strip_markup(response);
    if stripped.is_empty() {
        return stripped;
    }
    let cleaned = match dialect {
        Dialect::Sql => clean_sql(&stripped),
        Dialect::Dax => clean_dax(&stripped),
    };
    cap_row_limits(&cleaned, dialect)
}

fn strip_markup(response: &str) -> String {
    let mut text = response.trim().to_string();
    if text.contains("```") {
        text = match FENCED.captures(&text) {
            Some(caps) => caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            None => text.replace("```", ""),
        };
    }
    let text = text.replace('`', "");
    let text = LANGUAGE_PREFIX.replace(text.trim(), "");

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn has_row_limit(query: &str) -> bool {
    TOP_WORD.is_match(query)
}

/// Insert `TOP n` after the first SELECT (after DISTINCT when present)
fn insert_top(query: &str, n: u64) -> String {
    FIRST_SELECT
        .replacen(query, 1, |caps: &Captures| {
            let distinct = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            format!("SELECT {}TOP {} ", distinct, n)
        })
        .into_owned()
}

/// Move a `LIMIT n` into the select list as `TOP n`
fn limit_to_top(query: &str) -> String {
    let Some(n) = ANY_LIMIT
        .captures(query)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
    else {
        return query.to_string();
    };
    let without = if TRAILING_LIMIT.is_match(query) {
        TRAILING_LIMIT.replace(query, "").into_owned()
    } else {
        ANY_LIMIT.replacen(query, 1, "").into_owned()
    };
    if has_row_limit(&without) {
        without
    } else {
        insert_top(&without, n)
    }
}

pub fn clean_sql(query: &str) -> String {
    let mut cleaned = limit_to_top(query.trim());
    if LEADING_SELECT.is_match(&cleaned) && !has_row_limit(&cleaned) {
        cleaned = insert_top(&cleaned, DEFAULT_ROW_LIMIT);
    }
    ILIKE.replace_all(&cleaned, "LIKE").trim().to_string()
}

pub fn clean_dax(query: &str) -> String {
    let mut cleaned = query.trim().to_string();
    if !EVALUATE_PREFIX.is_match(&cleaned) && !cleaned.is_empty() {
        let separator = if DAX_TABLE_FUNCTION.is_match(&cleaned) { "\n" } else { " " };
        cleaned = format!("EVALUATE{}{}", separator, cleaned);
    }
    let cleaned = SQL_SELECT.replace_all(&cleaned, "");
    let cleaned = SQL_FROM.replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

/// Bound the size of a result: SQL `TOP` values above the maximum are
/// capped, and a bare DAX table evaluation is wrapped in `TOPN`.
pub fn cap_row_limits(query: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Sql => reduce_top(query, MAX_ROW_LIMIT),
        Dialect::Dax => match SIMPLE_TABLE.captures(query.trim()) {
            Some(caps) if !TOPN_CALL.is_match(query) => {
                format!("EVALUATE\nTOPN({}, {})", DEFAULT_ROW_LIMIT, &caps[1])
            }
            _ => query.to_string(),
        },
    }
}

fn reduce_top(query: &str, max: u64) -> String {
    TOP_N
        .replace_all(query, |caps: &Captures| {
            let n = caps[2].parse::<u64>().unwrap_or(u64::MAX);
            format!("{}{}", &caps[1], n.min(max))
        })
        .into_owned()
}

fn dax_body(query: &str) -> &str {
    match EVALUATE_PREFIX.find(query) {
        Some(m) => query[m.end()..].trim(),
        None => query.trim(),
    }
}

/// Restrict a query to at most `max` rows: existing limits are reduced,
/// missing ones are added.
pub fn limit_rows(query: &str, dialect: Dialect, max: u64) -> String {
    match dialect {
        Dialect::Sql => {
            if has_row_limit(query) {
                reduce_top(query, max)
            } else {
                insert_top(query, max)
            }
        }
        Dialect::Dax => {
            if TOPN_CALL.is_match(query) {
                TOPN_N
                    .replace_all(query, |caps: &Captures| {
                        let n = caps[1].parse::<u64>().unwrap_or(u64::MAX);
                        format!("TOPN({}", n.min(max))
                    })
                    .into_owned()
            } else {
                format!("EVALUATE\nTOPN({}, {})", max, dax_body(query))
            }
        }
    }
}

/// Tune row limits and ordering of a freshly generated query to the
/// question's shape.
pub fn optimize_for_analysis(query: &str, dialect: Dialect, analysis: &QuestionAnalysis) -> String {
    match dialect {
        Dialect::Sql => optimize_sql(query, analysis),
        Dialect::Dax => optimize_dax(query, analysis),
    }
}

fn optimize_sql(query: &str, analysis: &QuestionAnalysis) -> String {
    let mut optimized = if has_row_limit(query) || !FIRST_SELECT.is_match(query) {
        query.to_string()
    } else {
        insert_top(query, DEFAULT_ROW_LIMIT)
    };

    optimized = match analysis.complexity {
        Complexity::Complex => reduce_top(&optimized, 50),
        Complexity::Moderate => reduce_top(&optimized, 100),
        Complexity::Simple => optimized,
    };

    let orders_by_value = matches!(
        analysis.aggregation_type,
        Some(AggregationType::Sum | AggregationType::Count | AggregationType::Max)
    );
    if analysis.is_ranking() && orders_by_value && !ORDER_BY.is_match(&optimized) {
        optimized = format!("{}\nORDER BY 2 DESC", optimized.trim_end().trim_end_matches(';'));
    }
    optimized
}

fn optimize_dax(query: &str, analysis: &QuestionAnalysis) -> String {
    if TOPN_CALL.is_match(query) || !EVALUATE_PREFIX.is_match(query) {
        return query.to_string();
    }
    let body = dax_body(query);

    if analysis.complexity == Complexity::Complex && !body.contains('\n') {
        return format!("EVALUATE\nTOPN(50, {})", body);
    }
    if analysis.is_ranking() && SUMMARIZE_CALL.is_match(body) {
        return format!("EVALUATE\nTOPN(10, {})", body);
    }
    query.to_string()
}

/// Minimal deterministic repair used when a targeted fix produced nothing
pub fn simple_fix(query: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Sql => {
            let mut fixed = limit_to_top(query.trim());
            if FIRST_SELECT.is_match(&fixed) && !has_row_limit(&fixed) {
                fixed = insert_top(&fixed, FIX_ROW_LIMIT);
            }
            ILIKE.replace_all(&fixed, "LIKE").into_owned()
        }
        Dialect::Dax => {
            let without_sql = SQL_SELECT_FROM.replace_all(query.trim(), "");
            let filtered = SQL_WHERE.replace_all(without_sql.trim(), "FILTER(");
            if EVALUATE_PREFIX.is_match(&filtered) {
                filtered.into_owned()
            } else {
                format!("EVALUATE {}", filtered)
            }
        }
    }
}

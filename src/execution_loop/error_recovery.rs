//! Error Recovery
//!
//! Applies a fix strategy chosen by error category. Schema errors are
//! first repaired deterministically against the known identifiers and
//! timeouts only shrink the result; everything else is regenerated by the
//! model with an error analysis attached. A fix that produces nothing
//! falls back to [`simple_fix`].

use crate::dialect::Dialect;
use crate::execution_loop::error_classifier::ErrorCategory;
use crate::generation::cleaner::{clean_completion, limit_rows, simple_fix};
use crate::generation::prompts::{build_general_fix_prompt, build_schema_fix_prompt, build_syntax_fix_prompt};
use crate::llm::CompletionProvider;
use crate::schema::{SchemaContext, SchemaVocabulary};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer, Word};
use std::collections::HashSet;
use std::sync::Arc;
use strsim::normalized_levenshtein;
use tracing::{debug, info, warn};

/// Minimum similarity for replacing an unknown identifier
pub const IDENTIFIER_SIMILARITY: f64 = 0.6;
/// Row cap applied to queries that timed out
pub const TIMEOUT_ROW_LIMIT: u64 = 25;

const BUSINESS_TERMS: &[&str] = &["sales", "customer", "product", "order", "revenue", "date", "amount"];
const TYPO_SIMILARITY: f64 = 0.8;

lazy_static! {
    static ref NAMED_IN_ERROR: Regex =
        Regex::new(r"(?i)(?:column name|object name|column|table|measure)\s+'([^']+)'").unwrap();
    static ref COLUMN_IN_ERROR: Regex = Regex::new(r"(?i)column name '([^']+)'").unwrap();
    static ref OBJECT_IN_ERROR: Regex = Regex::new(r"(?i)object name '([^']+)'").unwrap();
    static ref EXPECTED: Regex = Regex::new(r"(?i)\bexpected '([^']+)'").unwrap();
    static ref UNEXPECTED: Regex = Regex::new(r"(?i)\bunexpected '([^']+)'").unwrap();
    static ref WORD: Regex = Regex::new(r"\b\w+\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    /// Unknown identifiers swapped for their nearest schema names
    IdentifierRepair,
    /// Row limits reduced, no model call
    RowLimitReduction,
    /// Model asked to repair identifiers against the schema
    SchemaRegeneration,
    /// Model asked to repair grammar with the dialect rules
    GrammarRegeneration,
    /// Model asked to repair with the generic template
    GuidedRegeneration,
    /// Deterministic minimal rewrite
    SimpleFix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFix {
    pub query: String,
    pub strategy: FixStrategy,
}

/// A failed attempt to repair
pub struct FixRequest<'a> {
    pub failed_query: &'a str,
    pub error: &'a str,
    pub category: ErrorCategory,
    pub schema: &'a SchemaContext,
}

/// Fix strategy dispatcher
pub struct ErrorRecovery {
    provider: Arc<dyn CompletionProvider>,
}

impl ErrorRecovery {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Produce the next query to try after a failure
    pub async fn fix(&self, request: &FixRequest<'_>) -> AppliedFix {
        let dialect = request.schema.dialect;
        let analysis = analyze_error(request.error, request.category, request.failed_query);
        debug!("Error analysis for {}: {}", request.category, analysis);

        let (prompt, strategy) = match request.category {
            ErrorCategory::SchemaError => {
                if let Some(query) =
                    repair_identifiers(request.failed_query, request.error, &request.schema.vocabulary, dialect)
                {
                    info!("Repaired unknown identifiers without regeneration");
                    return AppliedFix {
                        query,
                        strategy: FixStrategy::IdentifierRepair,
                    };
                }
                (
                    build_schema_fix_prompt(request.failed_query, request.error, &analysis, request.schema),
                    FixStrategy::SchemaRegeneration,
                )
            }
            ErrorCategory::TimeoutError => {
                return AppliedFix {
                    query: limit_rows(request.failed_query, dialect, TIMEOUT_ROW_LIMIT),
                    strategy: FixStrategy::RowLimitReduction,
                };
            }
            ErrorCategory::SyntaxError | ErrorCategory::DialectSpecificError => (
                build_syntax_fix_prompt(request.failed_query, request.error, &analysis, dialect),
                FixStrategy::GrammarRegeneration,
            ),
            ErrorCategory::PermissionError
            | ErrorCategory::CalculationError
            | ErrorCategory::GeneralError
            | ErrorCategory::UnknownError => (
                build_general_fix_prompt(
                    request.failed_query,
                    request.error,
                    request.category,
                    &analysis,
                    request.schema,
                ),
                FixStrategy::GuidedRegeneration,
            ),
        };

        match self.provider.complete(&prompt).await {
            Ok(response) => {
                let query = clean_completion(&response, dialect);
                if !query.is_empty() {
                    info!("Applied {} fix ({} chars)", request.category, query.len());
                    return AppliedFix { query, strategy };
                }
                warn!("{} fix returned an empty query", request.category);
            }
            Err(e) => warn!("Targeted fix failed: {}", e),
        }

        AppliedFix {
            query: simple_fix(request.failed_query, dialect),
            strategy: FixStrategy::SimpleFix,
        }
    }
}

/// Specific hints pulled from the error text and the failed query
pub fn analyze_error(error: &str, category: ErrorCategory, failed_query: &str) -> String {
    let mut analysis = Vec::new();
    let lowered = error.to_lowercase();
    let captured = |pattern: &Regex| -> Vec<String> {
        pattern
            .captures_iter(error)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    };

    match category {
        ErrorCategory::SchemaError => {
            let columns = captured(&*COLUMN_IN_ERROR);
            if !columns.is_empty() {
                analysis.push(format!("Problematic columns: {}", columns.join(", ")));
            }
            let tables = captured(&*OBJECT_IN_ERROR);
            if !tables.is_empty() {
                analysis.push(format!("Problematic tables: {}", tables.join(", ")));
            }

            let query_lowered = failed_query.to_lowercase();
            let words: Vec<&str> = WORD.find_iter(&query_lowered).map(|m| m.as_str()).collect();
            for term in BUSINESS_TERMS.iter().copied() {
                let typo = words
                    .iter()
                    .copied()
                    .find(|w| *w != term && w.len() >= 3 && normalized_levenshtein(w, term) >= TYPO_SIMILARITY);
                if let Some(word) = typo {
                    analysis.push(format!("Possible typo: '{}' might be '{}'", word, term));
                }
            }
        }
        ErrorCategory::SyntaxError => {
            let expected = captured(&*EXPECTED);
            if !expected.is_empty() {
                analysis.push(format!("Missing or incorrect: {}", expected.join(", ")));
            }
            let unexpected = captured(&*UNEXPECTED);
            if !unexpected.is_empty() {
                analysis.push(format!("Unexpected tokens: {}", unexpected.join(", ")));
            }
        }
        ErrorCategory::CalculationError => {
            if lowered.contains("division by zero") || lowered.contains("divide by zero") {
                analysis.push("Division by zero detected - need NULLIF() protection".to_string());
            }
            if lowered.contains("overflow") {
                analysis.push("Arithmetic overflow - need data type casting".to_string());
            }
        }
        _ => {}
    }

    if analysis.is_empty() {
        "General error - apply standard fixes".to_string()
    } else {
        analysis.join("; ")
    }
}

fn is_function_call(tokens: &[Token], index: usize) -> bool {
    tokens[index + 1..]
        .iter()
        .find(|t| !matches!(t, Token::Whitespace(_)))
        .map_or(false, |t| matches!(t, Token::LParen))
}

/// Lowercased names the query declares as aliases: anything after `AS`,
/// and a bare word following a table name in `FROM`/`JOIN` (including
/// comma-separated `FROM` lists)
fn declared_aliases(tokens: &[Token]) -> HashSet<String> {
    let significant: Vec<&Token> = tokens.iter().filter(|t| !matches!(t, Token::Whitespace(_))).collect();
    let word_at = |i: usize| match significant.get(i) {
        Some(Token::Word(w)) => Some(w),
        _ => None,
    };
    let mut aliases = HashSet::new();

    for (i, token) in significant.iter().enumerate() {
        let Token::Word(w) = token else { continue };
        match w.keyword {
            Keyword::AS => {
                if let Some(alias) = word_at(i + 1) {
                    aliases.insert(alias.value.to_lowercase());
                }
            }
            Keyword::FROM | Keyword::JOIN => {
                let mut j = i + 1;
                while word_at(j).is_some() {
                    j += 1;
                    while matches!(significant.get(j), Some(Token::Period)) && word_at(j + 1).is_some() {
                        j += 2;
                    }
                    if let Some(alias) = word_at(j).filter(|a| a.quote_style.is_some() || a.keyword == Keyword::NoKeyword) {
                        aliases.insert(alias.value.to_lowercase());
                        j += 1;
                    }
                    if w.keyword == Keyword::FROM && matches!(significant.get(j), Some(Token::Comma)) {
                        j += 1;
                    } else {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    aliases
}

/// `name` escaped for use between `quote` and its closing character
fn requote(name: &str, quote: char) -> String {
    let close = if quote == '[' { ']' } else { quote };
    name.replace(close, &format!("{}{}", close, close))
}

/// Replace identifiers the schema does not know (or that the error names)
/// with their nearest known names.
///
/// Returns `None` when the query cannot be tokenized, the vocabulary is
/// empty, or nothing was replaced.
pub fn repair_identifiers(query: &str, error: &str, vocabulary: &SchemaVocabulary, dialect: Dialect) -> Option<String> {
    if vocabulary.is_empty() {
        return None;
    }
    let suspects: HashSet<String> = NAMED_IN_ERROR
        .captures_iter(error)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect();

    // Literals keep their original escaping so the rebuilt text matches the input
    let mut tokens = Tokenizer::new(&MsSqlDialect {}, query)
        .with_unescape(false)
        .tokenize()
        .ok()?;
    let aliases = declared_aliases(&tokens);
    let nearest = |name: &str| vocabulary.nearest(name, IDENTIFIER_SIMILARITY);
    let needs_repair = |name: &str| name.len() >= 3 && (!vocabulary.contains(name) || suspects.contains(&name.to_lowercase()));

    let mut replaced = 0;
    for index in 0..tokens.len() {
        let replacement = match &tokens[index] {
            Token::Word(w) if w.quote_style.is_none() && w.keyword != Keyword::NoKeyword => None,
            Token::Word(w) => {
                let skip = (w.quote_style.is_none() && is_function_call(&tokens, index))
                    || aliases.contains(&w.value.to_lowercase());
                if !skip && needs_repair(w.value.as_str()) {
                    nearest(w.value.as_str()).map(|known| {
                        Token::Word(Word {
                            value: w.quote_style.map_or_else(|| known.to_string(), |q| requote(known, q)),
                            quote_style: w.quote_style,
                            keyword: Keyword::NoKeyword,
                        })
                    })
                } else {
                    None
                }
            }
            Token::SingleQuotedString(s) if dialect == Dialect::Dax && needs_repair(s.as_str()) => {
                nearest(s.as_str()).map(|known| Token::SingleQuotedString(requote(known, '\'')))
            }
            _ => None,
        };
        if let Some(token) = replacement {
            debug!("Replacing identifier {} with {}", tokens[index], token);
            tokens[index] = token;
            replaced += 1;
        }
    }

    if replaced == 0 {
        return None;
    }
    Some(tokens.iter().map(|t| t.to_string()).collect())
}

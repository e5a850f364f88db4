//! Safety Guardrails
//!
//! Pre-execution checks applied to every generated or repaired query.
//! Rejects mutating/administrative statements, stacked statements, unbounded
//! `SELECT *` in SQL, and DAX that does not start with `EVALUATE`.
//!
//! Keywords are found on the SQL token stream so that string literals and
//! quoted identifiers never trigger a rejection; if the tokenizer cannot
//! handle the text, a whole-word regex scan is used instead.

use crate::dialect::Dialect;
use crate::error::{EngineError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::{debug, warn};

pub const DANGEROUS_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "EXEC", "EXECUTE", "INSERT", "UPDATE", "MERGE", "GRANT",
    "REVOKE",
];

lazy_static! {
    static ref DANGEROUS_WORD: Regex = Regex::new(&format!(
        r"(?i)\b({})\b",
        DANGEROUS_KEYWORDS.join("|")
    ))
    .unwrap();
    static ref SELECT_STAR: Regex = Regex::new(r"(?i)\bSELECT\s+(DISTINCT\s+)?\*").unwrap();
    static ref ROW_LIMIT: Regex = Regex::new(r"(?i)\b(TOP|LIMIT)\b").unwrap();
}

/// Per-request validation switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationContext {
    /// Permit DML/DDL keywords
    pub allow_mutations: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub safe: bool,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    pub fn safe() -> Self {
        Self {
            safe: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: Some(reason.into()),
        }
    }

    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or("unsafe query")
    }

    pub fn into_result(self) -> Result<()> {
        if self.safe {
            Ok(())
        } else {
            Err(EngineError::Validation(self.reason_or_default().to_string()))
        }
    }
}

/// Unquoted words and statement boundaries of a query
struct QueryShape {
    words: Vec<String>,
    statements: usize,
    select_star: bool,
}

impl QueryShape {
    fn tokenize(query: &str) -> Option<Self> {
        let tokens = Tokenizer::new(&MsSqlDialect {}, query).tokenize().ok()?;
        let significant: Vec<&Token> = tokens
            .iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .collect();

        let words = significant
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_uppercase()),
                _ => None,
            })
            .collect();

        let statements = significant
            .split(|t| matches!(t, Token::SemiColon))
            .filter(|segment| !segment.is_empty())
            .count();

        let select_star = significant.windows(2).any(|pair| {
            matches!(pair[0], Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case("SELECT"))
                && matches!(pair[1], Token::Mul)
        }) || significant.windows(3).any(|triple| {
            matches!(triple[0], Token::Word(w) if w.value.eq_ignore_ascii_case("SELECT"))
                && matches!(triple[1], Token::Word(w) if w.value.eq_ignore_ascii_case("DISTINCT"))
                && matches!(triple[2], Token::Mul)
        });

        Some(Self {
            words,
            statements,
            select_star,
        })
    }

    fn has_word(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SafetyValidator;

impl SafetyValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, query: &str, dialect: Dialect, context: &ValidationContext) -> ValidationOutcome {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return ValidationOutcome::rejected("Empty query");
        }

        let shape = QueryShape::tokenize(trimmed);
        if shape.is_none() {
            debug!("Tokenizer rejected query text, using regex checks");
        }

        if !context.allow_mutations {
            let found = match &shape {
                Some(shape) => DANGEROUS_KEYWORDS
                    .iter()
                    .find(|k| shape.has_word(k))
                    .map(|k| k.to_string()),
                None => DANGEROUS_WORD
                    .find(trimmed)
                    .map(|m| m.as_str().to_uppercase()),
            };
            if let Some(keyword) = found {
                warn!("Blocked query containing {}", keyword);
                return ValidationOutcome::rejected(format!("Dangerous operation detected: {}", keyword));
            }
        }

        match dialect {
            Dialect::Sql => {
                let (statements, select_star, limited) = match &shape {
                    Some(shape) => (
                        shape.statements,
                        shape.select_star,
                        shape.has_word("TOP") || shape.has_word("LIMIT"),
                    ),
                    None => (
                        1,
                        SELECT_STAR.is_match(trimmed),
                        ROW_LIMIT.is_match(trimmed),
                    ),
                };
                if statements > 1 {
                    return ValidationOutcome::rejected("Multiple statements are not allowed");
                }
                if select_star && !limited {
                    return ValidationOutcome::rejected(
                        "SELECT * without TOP/LIMIT clause can cause performance issues",
                    );
                }
            }
            Dialect::Dax => {
                if !trimmed.to_uppercase().starts_with("EVALUATE") {
                    return ValidationOutcome::rejected("DAX queries must start with EVALUATE");
                }
            }
        }

        ValidationOutcome::safe()
    }
}

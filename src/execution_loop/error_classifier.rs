//! Error Classifier
//!
//! Maps a backend error message onto the category that selects a fix
//! strategy. Rules are checked in order and the first match wins, so a
//! message mentioning both "not found" and "syntax" is a schema error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    SchemaError,
    SyntaxError,
    PermissionError,
    TimeoutError,
    CalculationError,
    DialectSpecificError,
    GeneralError,
    UnknownError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::SchemaError => "SCHEMA_ERROR",
            ErrorCategory::SyntaxError => "SYNTAX_ERROR",
            ErrorCategory::PermissionError => "PERMISSION_ERROR",
            ErrorCategory::TimeoutError => "TIMEOUT_ERROR",
            ErrorCategory::CalculationError => "CALCULATION_ERROR",
            ErrorCategory::DialectSpecificError => "DIALECT_SPECIFIC_ERROR",
            ErrorCategory::GeneralError => "GENERAL_ERROR",
            ErrorCategory::UnknownError => "UNKNOWN_ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Ordered classification rules; substrings are matched case-insensitively
pub const CLASSIFICATION_RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::SchemaError,
        &["invalid column name", "invalid object name", "cannot be found", "not found", "does not exist"],
    ),
    (
        ErrorCategory::SyntaxError,
        &["syntax error", "incorrect syntax", "expected", "unexpected"],
    ),
    (
        ErrorCategory::PermissionError,
        &["permission", "access", "denied", "unauthorized"],
    ),
    (
        ErrorCategory::TimeoutError,
        &["timeout", "timed out", "cancelled", "aborted"],
    ),
    (
        ErrorCategory::CalculationError,
        &["division by zero", "divide by zero", "arithmetic overflow", "conversion failed"],
    ),
    (
        ErrorCategory::DialectSpecificError,
        &["evaluate", "dax", "measure", "table expression"],
    ),
];

/// Error classifier
#[derive(Debug, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an error message into the taxonomy
    pub fn classify(&self, error: &str) -> ErrorCategory {
        if error.trim().is_empty() {
            return ErrorCategory::UnknownError;
        }

        let error_msg = error.to_lowercase();
        CLASSIFICATION_RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| error_msg.contains(n)))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::GeneralError)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_invalid_column() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify("Invalid column name 'Amt'."),
            ErrorCategory::SchemaError
        );
    }

    #[test]
    fn test_first_rule_wins() {
        let classifier = ErrorClassifier::new();
        // Mentions both a missing object and a syntax problem
        assert_eq!(
            classifier.classify("Syntax error: table 'Foo' not found"),
            ErrorCategory::SchemaError
        );
        assert_eq!(
            classifier.classify("Incorrect syntax near 'FROM'"),
            ErrorCategory::SyntaxError
        );
    }

    #[test]
    fn test_classify_each_category() {
        let classifier = ErrorClassifier::new();
        let cases = [
            ("The SELECT permission was denied on object", ErrorCategory::PermissionError),
            ("Query timed out after 120 seconds", ErrorCategory::TimeoutError),
            ("Divide by zero error encountered.", ErrorCategory::CalculationError),
            ("The DAX expression cannot be used here", ErrorCategory::DialectSpecificError),
            ("Connection reset by peer", ErrorCategory::GeneralError),
            ("", ErrorCategory::UnknownError),
            ("   ", ErrorCategory::UnknownError),
        ];
        for (message, expected) in cases {
            assert_eq!(classifier.classify(message), expected, "{}", message);
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = ErrorClassifier::new();
        let message = "Arithmetic overflow error converting expression";
        assert_eq!(classifier.classify(message), classifier.classify(message));
        assert_eq!(classifier.classify(message), ErrorCategory::CalculationError);
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Knowledge store error: {0}")]
    Knowledge(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("All {0} attempts failed")]
    Exhausted(u8),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

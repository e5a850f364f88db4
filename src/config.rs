//! Engine configuration.
//!
//! Defaults mirror the production constants; `EngineConfig::from_env` layers a
//! `.env` file and `NLQ_*` / `OPENAI_*` variables on top.

use crate::dialect::Dialect;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Hard upper bound on self-correction attempts
pub const MAX_ATTEMPTS: u8 = 3;

/// Longest TTL or sweep interval accepted for a cache (ten years)
pub const MAX_CACHE_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// TTL + LRU cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL given to freshly inserted entries
    pub default_ttl_secs: u64,
    /// TTL granted once an entry becomes hot
    pub hot_ttl_secs: u64,
    /// Entries accessed more than this many times are promoted
    pub promotion_threshold: u64,
    /// Capacity bound; inserting past it evicts the least recently accessed entry
    pub max_entries: usize,
    /// Minimum spacing between expiry sweeps
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            hot_ttl_secs: 7200,
            promotion_threshold: 5,
            max_entries: 50,
            cleanup_interval_secs: 1800,
        }
    }
}

impl CacheConfig {
    /// Configuration for the knowledge-search result cache: short-lived, no promotion
    pub fn search_results() -> Self {
        Self {
            default_ttl_secs: 300,
            hot_ttl_secs: 300,
            promotion_threshold: u64::MAX,
            max_entries: 100,
            cleanup_interval_secs: 300,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.max_entries == 0 {
            return Err(EngineError::Config(format!(
                "{} capacity must be at least 1",
                name
            )));
        }
        for (field, secs) in [
            ("default TTL", self.default_ttl_secs),
            ("hot TTL", self.hot_ttl_secs),
            ("cleanup interval", self.cleanup_interval_secs),
        ] {
            if secs > MAX_CACHE_DURATION_SECS {
                return Err(EngineError::Config(format!(
                    "{} {} ({}s) exceeds {}s",
                    name, field, secs, MAX_CACHE_DURATION_SECS
                )));
            }
        }
        if self.hot_ttl_secs < self.default_ttl_secs {
            return Err(EngineError::Config(format!(
                "{} hot TTL ({}s) must not be shorter than default TTL ({}s)",
                name, self.hot_ttl_secs, self.default_ttl_secs
            )));
        }
        Ok(())
    }
}

/// Knowledge search tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum similarity for a fuzzy candidate to be returned
    pub threshold: f64,
    pub max_results: usize,
    pub candidate_limit: usize,
    pub exact_limit: usize,
    pub result_cache: CacheConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_results: 5,
            candidate_limit: 20,
            exact_limit: 3,
            result_cache: CacheConfig::search_results(),
        }
    }
}

/// Completion provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub search: SearchConfig,
    pub llm: LlmConfig,
    /// Self-correction attempts per request, clamped to [1, MAX_ATTEMPTS]
    pub max_attempts: u8,
    /// Rows of result data carried in an answer
    pub preview_rows: usize,
    pub dialect: Dialect,
    pub knowledge_db_path: PathBuf,
    pub backend_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
            llm: LlmConfig::default(),
            max_attempts: MAX_ATTEMPTS,
            preview_rows: 100,
            dialect: Dialect::Sql,
            knowledge_db_path: PathBuf::from("data/knowledge.db"),
            backend_url: None,
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `.env`, then process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Some(v) = env_parse::<u64>("NLQ_CACHE_TTL_SECS")? {
            config.cache.default_ttl_secs = v;
        }
        if let Some(v) = env_parse::<u64>("NLQ_CACHE_HOT_TTL_SECS")? {
            config.cache.hot_ttl_secs = v;
        }
        if let Some(v) = env_parse::<u64>("NLQ_CACHE_PROMOTION_THRESHOLD")? {
            config.cache.promotion_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("NLQ_CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = v;
        }
        if let Some(v) = env_parse::<u64>("NLQ_CACHE_CLEANUP_INTERVAL_SECS")? {
            config.cache.cleanup_interval_secs = v;
        }
        if let Some(v) = env_parse::<f64>("NLQ_SEARCH_THRESHOLD")? {
            config.search.threshold = v;
        }
        if let Some(v) = env_parse::<u8>("NLQ_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(v) = env_parse::<Dialect>("NLQ_DIALECT")? {
            config.dialect = v;
        }
        if let Ok(path) = std::env::var("NLQ_KNOWLEDGE_DB") {
            config.knowledge_db_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("NLQ_BACKEND_URL") {
            config.backend_url = Some(url);
        }

        config.llm.api_key = std::env::var("OPENAI_API_KEY").ok();
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.llm.model = model;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent values and clamp the attempt bound
    pub fn validate(&mut self) -> Result<()> {
        self.cache.validate("cache")?;
        self.search.result_cache.validate("search result cache")?;
        if !(0.0..=1.0).contains(&self.search.threshold) {
            return Err(EngineError::Config(format!(
                "search threshold {} outside [0, 1]",
                self.search.threshold
            )));
        }
        self.max_attempts = self.max_attempts.clamp(1, MAX_ATTEMPTS);
        Ok(())
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| EngineError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.cache.hot_ttl_secs, 7200);
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_validate_clamps_attempts() {
        let mut config = EngineConfig {
            max_attempts: 9,
            ..EngineConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.max_attempts, MAX_ATTEMPTS);

        config.max_attempts = 0;
        config.validate().unwrap();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn test_validate_rejects_shrinking_hot_ttl() {
        let mut config = EngineConfig::default();
        config.cache.hot_ttl_secs = 10;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unbounded_durations() {
        let mut config = EngineConfig::default();
        config.cache.hot_ttl_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let mut config = EngineConfig::default();
        config.search.result_cache.cleanup_interval_secs = MAX_CACHE_DURATION_SECS + 1;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let mut config = EngineConfig::default();
        config.cache.default_ttl_secs = MAX_CACHE_DURATION_SECS;
        config.cache.hot_ttl_secs = MAX_CACHE_DURATION_SECS;
        assert!(config.validate().is_ok());
    }
}

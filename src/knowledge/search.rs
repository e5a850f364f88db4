//! Knowledge search: exact-hash lookup first, then fuzzy candidates scored by
//! the similarity matcher. Results are memoized for a few minutes and the
//! memo is dropped whenever the knowledge base is written through this layer.

use super::store::{KnowledgeFilter, KnowledgeStore, UpsertAction};
use super::{question_hash, KnowledgeEntry, NewKnowledge};
use crate::cache::{CacheStats, MetadataCache};
use crate::clock::{Clock, SystemClock};
use crate::config::SearchConfig;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::semantic::{FeatureExtractor, MatchType, SimilarityMatcher};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A stored entry judged similar to an incoming question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMatch {
    pub entry: KnowledgeEntry,
    pub similarity: f64,
    pub match_type: MatchType,
}

pub struct KnowledgeSearch {
    store: Arc<dyn KnowledgeStore>,
    extractor: FeatureExtractor,
    matcher: SimilarityMatcher,
    config: SearchConfig,
    results: MetadataCache<Vec<KnowledgeMatch>>,
}

impl KnowledgeSearch {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: SearchConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KnowledgeStore>, config: SearchConfig, clock: Arc<dyn Clock>) -> Self {
        let results = MetadataCache::with_clock("knowledge-search", config.result_cache.clone(), clock);
        Self {
            store,
            extractor: FeatureExtractor::new(),
            matcher: SimilarityMatcher::new(),
            config,
            results,
        }
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    /// Prior successful queries similar to `question`, best first.
    ///
    /// Store failures are logged and yield no matches.
    pub async fn search(&self, question: &str, dialect: Dialect) -> Vec<KnowledgeMatch> {
        let cache_key = format!("{}:{}:{}", question, dialect.category(), self.config.threshold);
        self.results.invalidate_expired();
        if let Some(cached) = self.results.get(&cache_key) {
            debug!("Knowledge search served from cache for '{}'", question);
            return cached;
        }

        let matches = match self.lookup(question, dialect).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Knowledge search failed: {}", e);
                return Vec::new();
            }
        };

        info!("Knowledge search found {} matches for '{}'", matches.len(), question);
        self.results.put(cache_key, matches.clone());
        matches
    }

    async fn lookup(&self, question: &str, dialect: Dialect) -> Result<Vec<KnowledgeMatch>> {
        let hash = question_hash(dialect.category(), question);
        let exact = self
            .store
            .find_by_hash(&hash, dialect, self.config.exact_limit)
            .await?;

        if !exact.is_empty() {
            for entry in &exact {
                if let Err(e) = self.store.touch(entry.id).await {
                    warn!("Failed to refresh last_used for entry {}: {}", entry.id, e);
                }
            }
            return Ok(exact
                .into_iter()
                .map(|entry| KnowledgeMatch {
                    entry,
                    similarity: 1.0,
                    match_type: MatchType::Exact,
                })
                .collect());
        }

        let features = self.extractor.extract(question);
        let terms: Vec<String> = features
            .entities
            .iter()
            .chain(features.operations.iter())
            .take(3)
            .cloned()
            .collect();
        let filter = KnowledgeFilter::new(self.config.candidate_limit)
            .category(dialect)
            .terms(terms)
            .min_success_count(1);

        let candidates = self.store.search(&filter).await?;
        let mut matches: Vec<KnowledgeMatch> = candidates
            .into_iter()
            .filter_map(|entry| {
                let similarity = self.matcher.score(&features, question, &entry);
                (similarity >= self.config.threshold).then(|| KnowledgeMatch {
                    match_type: self.matcher.classify(similarity),
                    similarity,
                    entry,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));
        matches.truncate(self.config.max_results);
        Ok(matches)
    }

    /// Remember a successful question/query pair
    pub async fn record_success(&self, entry: NewKnowledge) -> Result<UpsertAction> {
        let action = self.store.upsert(entry).await?;
        self.results.clear();
        Ok(action)
    }

    pub async fn record_feedback(&self, id: i64, success: bool) -> Result<()> {
        self.store.record_feedback(id, success).await?;
        self.results.clear();
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.results.stats()
    }
}

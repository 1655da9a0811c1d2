//! Memoization of evaluation scores by structural digest.

use dashmap::DashMap;
use parking_lot::RwLock;

use ab_model::{digest, InstanceTree, TreeDigest};

/// Scores of previously evaluated samples, keyed by tree digest.
///
/// Only scored samples are cached; failures may be transient and are
/// evaluated again.
#[derive(Debug, Default)]
pub struct EvaluationCache {
    scores: DashMap<TreeDigest, f64>,
    stats: RwLock<CacheStats>,
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sample: &InstanceTree) -> Option<f64> {
        self.get_by_digest(&digest(sample))
    }

    pub fn get_by_digest(&self, key: &TreeDigest) -> Option<f64> {
        let hit = self.scores.get(key).map(|entry| *entry);
        let mut stats = self.stats.write();
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    pub fn insert(&self, sample: &InstanceTree, score: f64) {
        self.insert_by_digest(digest(sample), score);
    }

    pub fn insert_by_digest(&self, key: TreeDigest, score: f64) {
        if self.scores.insert(key, score).is_none() {
            self.stats.write().entries += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn clear(&self) {
        self.scores.clear();
        *self.stats.write() = CacheStats::default();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::AggregateResult;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

pub type ProjectStatsCache = TtlCache<AggregateResult>;

/// Cache key under which a project's aggregate is stored.
pub fn project_key(project_id: i64) -> String {
    format!("project:{}", project_id)
}

fn project_id_from_key(key: &str) -> Option<i64> {
    key.strip_prefix("project:")?
        .parse()
        .ok()
        .filter(|id| *id > 0)
}

struct CacheEntry<V> {
    value: V,
    inserted: Instant,
    cached_at: DateTime<Utc>,
    last_access: Option<DateTime<Utc>>,
    hit_count: u64,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    total_hits: u64,
    total_misses: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    pub cached_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_access: Option<DateTime<Utc>>,
    pub hit_count: u64,
    pub age_seconds: u64,
    pub expires_in_seconds: u64,
    pub is_expired: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub ttl_seconds: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate: f64,
    pub entries: Vec<CacheEntryInfo>,
}

/// In-memory read-through cache whose entries expire a fixed time after `set`.
///
/// Entries past their TTL are never returned: `get` evicts them lazily and a
/// background sweeper (see [`TtlCache::spawn_sweeper`]) removes the ones
/// nobody reads again. The cache knows nothing about writes happening in the
/// underlying stores; whoever mutates project data must invalidate.
pub struct TtlCache<V> {
    state: RwLock<CacheState<V>>,
    ttl: Duration,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// A zero TTL falls back to [`DEFAULT_TTL`].
    pub fn new(ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };
        Self {
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                total_hits: 0,
                total_misses: 0,
            }),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted) > self.ttl
    }

    // Takes the exclusive lock: a lookup updates hit accounting and may evict.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.write().await;
        let now = Instant::now();

        let expired = match state.entries.get(key) {
            None => {
                state.total_misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            state.entries.remove(key);
            state.total_misses += 1;
            tracing::debug!("Evicted expired cache entry {}", key);
            return None;
        }

        state.total_hits += 1;
        let entry = state.entries.get_mut(key)?;
        entry.hit_count += 1;
        entry.last_access = Some(Utc::now());
        Some(entry.value.clone())
    }

    pub async fn set(&self, key: impl Into<String>, value: V) {
        let mut state = self.state.write().await;
        state.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted: Instant::now(),
                cached_at: Utc::now(),
                last_access: None,
                hit_count: 0,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.state.write().await.entries.remove(key).is_some()
    }

    pub async fn invalidate_project(&self, project_id: i64) -> bool {
        self.invalidate(&project_key(project_id)).await
    }

    /// Drop every entry and reset the hit/miss counters.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.total_hits = 0;
        state.total_misses = 0;
    }

    /// Remove every entry older than the TTL, returning how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let mut state = self.state.write().await;
        let now = Instant::now();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted) <= self.ttl);
        before - state.entries.len()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let now = Instant::now();
        let ttl_secs = self.ttl.as_secs();

        let requests = state.total_hits + state.total_misses;
        let hit_rate = if requests > 0 {
            state.total_hits as f64 / requests as f64
        } else {
            0.0
        };

        let mut entries: Vec<CacheEntryInfo> = state
            .entries
            .iter()
            .map(|(key, entry)| {
                let age = now.saturating_duration_since(entry.inserted);
                CacheEntryInfo {
                    key: key.clone(),
                    project_id: project_id_from_key(key),
                    cached_at: entry.cached_at,
                    last_access: entry.last_access,
                    hit_count: entry.hit_count,
                    age_seconds: age.as_secs(),
                    expires_in_seconds: self.ttl.saturating_sub(age).as_secs(),
                    is_expired: age > self.ttl,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let expired_entries = entries.iter().filter(|e| e.is_expired).count();

        CacheStats {
            total_entries: entries.len(),
            valid_entries: entries.len() - expired_entries,
            expired_entries,
            ttl_seconds: ttl_secs,
            total_hits: state.total_hits,
            total_misses: state.total_misses,
            hit_rate,
            entries,
        }
    }

    /// Start the periodic sweep. The task holds only a weak reference and
    /// stops once the cache itself is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.cleanup_expired().await;
                if removed > 0 {
                    tracing::debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_key_round_trip() {
        assert_eq!(project_key(42), "project:42");
        assert_eq!(project_id_from_key("project:42"), Some(42));
        assert_eq!(project_id_from_key("project:abc"), None);
        assert_eq!(project_id_from_key("other:1"), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_uses_default() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::ZERO);
        assert_eq!(cache.ttl(), DEFAULT_TTL);
    }

    #[tokio::test]
    async fn test_invalidate_project() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set(project_key(7), 1u32).await;
        cache.set(project_key(8), 2u32).await;

        assert!(cache.invalidate_project(7).await);
        assert!(!cache.invalidate_project(7).await);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&project_key(8)).await, Some(2));
    }

    #[tokio::test]
    async fn test_clear_resets_counters() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1u32).await;
        cache.get("a").await;
        cache.get("b").await;

        cache.clear().await;
        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_hits, 0);
        assert_eq!(stats.total_misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_report_expired_entries_before_sweep() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.set(project_key(1), 1u32).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.set(project_key(2), 2u32).await;

        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.valid_entries, 1);
        assert_eq!(stats.entries[0].project_id, Some(1));
        assert_eq!(stats.entries[0].expires_in_seconds, 0);
        assert_eq!(stats.entries[1].expires_in_seconds, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(5)));
        let sweeper = cache.spawn_sweeper(Duration::from_secs(60));
        cache.set("stale", 1u32).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.len().await, 0);

        drop(cache);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(sweeper.is_finished());
    }
}

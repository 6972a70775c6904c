//! Process-local expiring store
//!
//! Used when no network store is configured and in tests. Entries expire
//! lazily on access; `purge_expired` sweeps the rest.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::{ExpiringBackend, JobPattern};
use crate::errors::StoreResult;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct InMemoryExpiringStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryExpiringStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many went
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - entries.len();
        if purged > 0 {
            debug!("Purged {} expired progress entries", purged);
        }
        purged
    }

    /// Remaining time to live of a key
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        let now = Instant::now();
        (entry.expires_at > now).then(|| entry.expires_at - now)
    }

    fn live_matches(
        entries: &HashMap<String, Entry>,
        prefix: &str,
        pattern: &JobPattern,
    ) -> Vec<(String, String)> {
        let now = Instant::now();
        let mut matches: Vec<(String, String)> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .filter_map(|(key, entry)| {
                let job_id = key.strip_prefix(prefix)?;
                pattern
                    .matches(job_id)
                    .then(|| (job_id.to_string(), entry.value.clone()))
            })
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        matches
    }
}

#[async_trait]
impl ExpiringBackend for InMemoryExpiringStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|entry| entry.expires_at > Instant::now()))
    }

    async fn scan(
        &self,
        prefix: &str,
        pattern: &JobPattern,
        limit: usize,
    ) -> StoreResult<Vec<(String, String)>> {
        let entries = self.entries.read().await;
        let mut matches = Self::live_matches(&entries, prefix, pattern);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn count(&self, prefix: &str, pattern: &JobPattern) -> StoreResult<usize> {
        let entries = self.entries.read().await;
        Ok(Self::live_matches(&entries, prefix, pattern).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = InMemoryExpiringStore::new();
        store
            .set_with_ttl("progress:a", "payload", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("progress:a").await.unwrap().as_deref(), Some("payload"));
        assert_eq!(store.ttl("progress:a").await, Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("progress:a").await.unwrap(), None);
        assert!(!store.delete("progress:a").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_resets_ttl() {
        let store = InMemoryExpiringStore::new();
        let ttl = Duration::from_secs(10);
        store.set_with_ttl("progress:a", "v1", ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        store.set_with_ttl("progress:a", "v2", ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(store.get("progress:a").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_and_purge() {
        let store = InMemoryExpiringStore::new();
        store.set_with_ttl("progress:a1", "1", Duration::from_secs(5)).await.unwrap();
        store.set_with_ttl("progress:a2", "2", Duration::from_secs(60)).await.unwrap();
        store.set_with_ttl("progress:b1", "3", Duration::from_secs(60)).await.unwrap();
        store.set_with_ttl("session:a3", "4", Duration::from_secs(60)).await.unwrap();

        let pattern = JobPattern::new("a*").unwrap();
        assert_eq!(store.count("progress:", &pattern).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(6)).await;
        let found = store.scan("progress:", &pattern, 10).await.unwrap();
        assert_eq!(found, vec![("a2".to_string(), "2".to_string())]);

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.count("progress:", &JobPattern::all()).await.unwrap(), 2);
    }
}

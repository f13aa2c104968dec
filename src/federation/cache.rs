/// Process-local cache of resolved federation endpoints
///
/// Keyed by the exact requested hostname, including any port. Entries serve
/// reads for the TTL and are dropped no later than the eviction horizon
/// after creation.
use crate::federation::ResolvedServer;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_EVICTION: Duration = Duration::from_secs(2 * 60 * 60);

struct CachedEndpoint {
    server: ResolvedServer,
    cached_at: Instant,
}

/// TTL-bounded endpoint cache shared by all request handlers
pub struct ResolverCache {
    entries: RwLock<HashMap<String, CachedEndpoint>>,
    ttl: Duration,
    eviction: Duration,
}

impl ResolverCache {
    /// Cache with the default 1 hour TTL and 2 hour eviction horizon
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL, DEFAULT_EVICTION)
    }

    pub fn with_ttl(ttl: Duration, eviction: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            eviction,
        }
    }

    /// Fetch a live entry for the exact hostname. Expired entries are
    /// removed on observation and report as misses.
    pub async fn get(&self, hostname: &str) -> Option<ResolvedServer> {
        {
            let entries = self.entries.read().await;
            match entries.get(hostname) {
                Some(entry) if entry.cached_at.elapsed() < self.ttl => {
                    return Some(entry.server.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop the entry. Re-check under the write lock in case a
        // concurrent resolve refreshed it meanwhile.
        let mut entries = self.entries.write().await;
        match entries.get(hostname) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.server.clone()),
            Some(_) => {
                entries.remove(hostname);
                None
            }
            None => None,
        }
    }

    /// Store a resolution result with the default TTL. Entries past the
    /// eviction horizon are swept on every insert.
    pub async fn insert(&self, hostname: &str, server: ResolvedServer) {
        let mut entries = self.entries.write().await;
        let eviction = self.eviction;
        entries.retain(|_, entry| entry.cached_at.elapsed() < eviction);
        entries.insert(
            hostname.to_string(),
            CachedEndpoint {
                server,
                cached_at: Instant::now(),
            },
        );
    }
}

impl Default for ResolverCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(base: &str) -> ResolvedServer {
        ResolvedServer {
            base_url: base.to_string(),
            host_header: "example.test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = ResolverCache::new();
        cache
            .insert("example.test", endpoint("https://example.test:8448"))
            .await;

        let hit = cache.get("example.test").await.unwrap();
        assert_eq!(hit.base_url, "https://example.test:8448");

        // Keyed by the exact input, port included
        assert!(cache.get("example.test:8448").await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = ResolverCache::with_ttl(Duration::from_millis(20), Duration::from_millis(40));
        cache
            .insert("example.test", endpoint("https://example.test:8448"))
            .await;

        assert!(cache.get("example.test").await.is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("example.test").await.is_none());
    }

    #[tokio::test]
    async fn test_insert_sweeps_old_entries() {
        let cache = ResolverCache::with_ttl(Duration::from_millis(10), Duration::from_millis(20));
        cache.insert("old.test", endpoint("https://old.test:8448")).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.insert("new.test", endpoint("https://new.test:8448")).await;

        let entries = cache.entries.read().await;
        assert!(!entries.contains_key("old.test"));
        assert!(entries.contains_key("new.test"));
    }

    #[tokio::test]
    async fn test_reinsert_refreshes() {
        let cache = ResolverCache::new();
        cache.insert("example.test", endpoint("https://a:8448")).await;
        cache.insert("example.test", endpoint("https://b:8448")).await;

        assert_eq!(cache.get("example.test").await.unwrap().base_url, "https://b:8448");
    }
}

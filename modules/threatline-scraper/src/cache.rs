use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use threatline_common::FetchedArticle;

/// How long a parsed feed is served to peer users before re-fetching.
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

struct CacheEntry {
    fetched_at: Instant,
    /// Parsed articles with a nil source id. Readers re-tag with their own
    /// source, so a cached parse carries no caller identity.
    articles: Vec<FetchedArticle>,
}

/// Process-wide scrape cache keyed by source URL. Two users subscribed to
/// the same feed share one upstream fetch per TTL window.
pub struct ScrapeCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ScrapeCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a fresh (non-expired) parse, re-tagged with the caller's source id.
    pub async fn get(&self, url: &str, source_id: Uuid) -> Option<Vec<FetchedArticle>> {
        let entries = self.entries.lock().await;
        let entry = entries.get(url)?;
        if entry.fetched_at.elapsed() >= CACHE_TTL {
            return None;
        }
        Some(
            entry
                .articles
                .iter()
                .cloned()
                .map(|mut a| {
                    a.source_id = source_id;
                    a
                })
                .collect(),
        )
    }

    /// Store a parse. The caller's source id is erased before caching.
    pub async fn put(&self, url: &str, articles: &[FetchedArticle]) {
        let neutral: Vec<FetchedArticle> = articles
            .iter()
            .cloned()
            .map(|mut a| {
                a.source_id = Uuid::nil();
                a
            })
            .collect();
        let mut entries = self.entries.lock().await;
        entries.insert(
            url.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                articles: neutral,
            },
        );
    }

    /// True when a fresh entry exists (used by pre-warm to skip fetches).
    pub async fn contains_fresh(&self, url: &str) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(url)
            .is_some_and(|e| e.fetched_at.elapsed() < CACHE_TTL)
    }
}

impl Default for ScrapeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(url: &str) -> FetchedArticle {
        FetchedArticle {
            url: url.to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
            published_at: None,
            author: None,
            guid: None,
            tags: vec![],
            source_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn get_retags_with_caller_source_id() {
        let cache = ScrapeCache::new();
        cache.put("https://feed", &[article("https://a")]).await;

        let mine = Uuid::new_v4();
        let got = cache.get("https://feed", mine).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source_id, mine);

        let theirs = Uuid::new_v4();
        let got = cache.get("https://feed", theirs).await.unwrap();
        assert_eq!(got[0].source_id, theirs);
    }

    #[tokio::test]
    async fn miss_on_unknown_url() {
        let cache = ScrapeCache::new();
        assert!(cache.get("https://nope", Uuid::new_v4()).await.is_none());
        assert!(!cache.contains_fresh("https://nope").await);
    }
}

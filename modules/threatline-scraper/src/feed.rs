use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use threatline_common::{extract_host, FetchedArticle, Source, SourceType};

use crate::cache::ScrapeCache;
use crate::content::html_to_clean_text;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = "threatline/0.1";
/// RSS items older than this are noise for a security digest.
const MAX_ITEM_AGE_DAYS: i64 = 7;
/// I/O fan-out cap for cache pre-warming.
const PREWARM_CONCURRENCY: usize = 32;

/// Fetches and parses user sources, serving repeated URLs from the shared
/// cross-user cache.
pub struct FeedScraper {
    client: reqwest::Client,
    cache: Arc<ScrapeCache>,
}

impl FeedScraper {
    pub fn new(cache: Arc<ScrapeCache>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to build scraper HTTP client");
        Self { client, cache }
    }

    /// Scrape one source. Cache hits perform no upstream fetch; the cached
    /// parse is re-tagged with this source's id on the way out.
    pub async fn scrape(&self, source: &Source) -> Result<Vec<FetchedArticle>> {
        if let Some(cached) = self.cache.get(&source.url, source.id).await {
            info!(url = %source.url, items = cached.len(), "Scrape served from cache");
            return Ok(cached);
        }

        let articles = self.fetch_and_parse(source).await?;
        self.cache.put(&source.url, &articles).await;
        info!(url = %source.url, items = articles.len(), "Scraped source");
        Ok(articles)
    }

    /// Fetch every URL not already fresh in the cache, in parallel, so the
    /// per-user scrapes that follow are cache hits.
    pub async fn prewarm(&self, urls: &[String]) {
        let mut to_fetch = Vec::new();
        for url in urls {
            if !self.cache.contains_fresh(url).await {
                to_fetch.push(url.clone());
            }
        }
        if to_fetch.is_empty() {
            return;
        }
        info!(urls = to_fetch.len(), "Pre-warming scrape cache");

        let results: Vec<_> = stream::iter(to_fetch.into_iter().map(|url| {
            let client = self.client.clone();
            async move {
                let result = fetch_bytes(&client, &url).await.map(|bytes| {
                    parse_rss_feed(&bytes, Uuid::nil(), Utc::now())
                });
                (url, result)
            }
        }))
        .buffer_unordered(PREWARM_CONCURRENCY)
        .collect()
        .await;

        for (url, result) in results {
            match result {
                Ok(articles) => self.cache.put(&url, &articles).await,
                Err(e) => warn!(url = %url, error = %e, "Pre-warm fetch failed"),
            }
        }
    }

    async fn fetch_and_parse(&self, source: &Source) -> Result<Vec<FetchedArticle>> {
        let bytes = fetch_bytes(&self.client, &source.url).await?;
        match source.source_type {
            SourceType::Rss => Ok(parse_rss_feed(&bytes, source.id, Utc::now())),
            SourceType::Website => {
                let html = String::from_utf8_lossy(&bytes);
                Ok(vec![page_as_article(source, &html)])
            }
        }
    }
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Fetch failed for {url}"))?;
    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("Failed to read body for {url}"))?;
    Ok(bytes.to_vec())
}

/// Parse an RSS/Atom feed into articles, dropping items older than the age
/// cutoff. Items with no date are kept.
pub fn parse_rss_feed(bytes: &[u8], source_id: Uuid, now: DateTime<Utc>) -> Vec<FetchedArticle> {
    let feed = match feed_rs::parser::parse(bytes) {
        Ok(feed) => feed,
        Err(e) => {
            warn!(error = %e, "Failed to parse RSS/Atom feed");
            return Vec::new();
        }
    };

    let cutoff = now - chrono::Duration::days(MAX_ITEM_AGE_DAYS);

    feed.entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

            let published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc));

            if let Some(date) = published_at {
                if date < cutoff {
                    return None;
                }
            }

            let title = entry
                .title
                .map(|t| t.content)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| url.clone());

            let content = entry
                .summary
                .map(|t| t.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();

            Some(FetchedArticle {
                url,
                title,
                content,
                published_at,
                author: entry.authors.first().map(|a| a.name.clone()),
                guid: (!entry.id.is_empty()).then(|| entry.id.clone()),
                tags: entry.categories.into_iter().map(|c| c.term).collect(),
                source_id,
            })
        })
        .collect()
}

/// A WEBSITE source yields the whole page as one pseudo-article.
fn page_as_article(source: &Source, html: &str) -> FetchedArticle {
    FetchedArticle {
        url: source.url.clone(),
        title: source.name.clone(),
        content: html_to_clean_text(html, Some(&source.url)),
        published_at: None,
        author: None,
        guid: None,
        tags: Vec::new(),
        source_id: source.id,
    }
}

/// Subtract URLs the user already has, leaving only new articles.
pub fn subtract_seen(
    articles: Vec<FetchedArticle>,
    seen_urls: &HashSet<String>,
) -> Vec<FetchedArticle> {
    articles
        .into_iter()
        .filter(|a| !seen_urls.contains(&a.url))
        .collect()
}

/// True when two URLs point at different hosts.
pub fn is_external(link: &str, base_url: &str) -> bool {
    let link_host = extract_host(link);
    !link_host.is_empty() && link_host != extract_host(base_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rss_with_dates(recent: &str, old: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Feed</title>
<item><title>Recent</title><link>https://example.com/recent</link>
<description>fresh news</description><pubDate>{recent}</pubDate></item>
<item><title>Old</title><link>https://example.com/old</link>
<description>stale news</description><pubDate>{old}</pubDate></item>
</channel></rss>"#
        )
    }

    #[test]
    fn parse_drops_items_older_than_seven_days() {
        let now = Utc::now();
        let recent = (now - chrono::Duration::days(1)).to_rfc2822();
        let old = (now - chrono::Duration::days(30)).to_rfc2822();
        let xml = rss_with_dates(&recent, &old);

        let articles = parse_rss_feed(xml.as_bytes(), Uuid::nil(), now);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Recent");
        assert_eq!(articles[0].content, "fresh news");
        assert!(articles[0].published_at.is_some());
    }

    #[test]
    fn parse_keeps_undated_items() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Feed</title>
<item><title>Undated</title><link>https://example.com/x</link></item>
</channel></rss>"#;
        let articles = parse_rss_feed(xml.as_bytes(), Uuid::nil(), Utc::now());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Undated");
    }

    #[test]
    fn parse_garbage_returns_empty() {
        assert!(parse_rss_feed(b"not xml at all", Uuid::nil(), Utc::now()).is_empty());
    }

    #[test]
    fn subtract_seen_filters_known_urls() {
        let articles = vec![
            FetchedArticle {
                url: "https://a".into(),
                title: "a".into(),
                content: String::new(),
                published_at: None,
                author: None,
                guid: None,
                tags: vec![],
                source_id: Uuid::nil(),
            },
            FetchedArticle {
                url: "https://b".into(),
                title: "b".into(),
                content: String::new(),
                published_at: None,
                author: None,
                guid: None,
                tags: vec![],
                source_id: Uuid::nil(),
            },
        ];
        let seen: HashSet<String> = ["https://a".to_string()].into_iter().collect();
        let new = subtract_seen(articles, &seen);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].url, "https://b");
    }

    #[test]
    fn is_external_compares_hosts() {
        assert!(is_external("https://other.com/x", "https://example.com/feed"));
        assert!(!is_external("https://example.com/x", "https://example.com/feed"));
        assert!(!is_external("nonsense", "https://example.com"));
    }
}

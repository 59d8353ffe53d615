use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::info;

use crate::feed::is_external;

const CONTENT_TIMEOUT: Duration = Duration::from_secs(20);
const USER_AGENT: &str = "threatline/0.1";
/// Raw body bytes kept per fetch.
const MAX_BODY_BYTES: usize = 500 * 1024;
/// Readable text kept per article.
const MAX_CLEAN_TEXT_CHARS: usize = 15_000;
/// Outbound links kept per article.
const MAX_EXTERNAL_LINKS: usize = 50;

/// Full-text extraction for a matched article.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub clean_text: String,
    pub raw_html: String,
    pub external_links: Vec<String>,
}

/// Fetches article pages and isolates the readable body.
pub struct ContentExtractor {
    client: reqwest::Client,
}

impl ContentExtractor {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(CONTENT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to build content HTTP client");
        Self { client }
    }

    /// Fetch and extract one article. Failures leave the article on its RSS
    /// snippet; the caller logs and moves on.
    pub async fn extract(&self, url: &str) -> Result<ExtractedContent> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Content fetch failed for {url}"))?;

        let mut bytes = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read content body for {url}"))?
            .to_vec();
        bytes.truncate(MAX_BODY_BYTES);

        let raw_html = String::from_utf8_lossy(&bytes).into_owned();
        let clean_text = html_to_clean_text(&raw_html, Some(url));
        let external_links = collect_external_links(&raw_html, url);

        info!(
            url,
            text_chars = clean_text.len(),
            links = external_links.len(),
            "Extracted article content"
        );

        Ok(ExtractedContent {
            clean_text,
            raw_html,
            external_links,
        })
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Readability-extract the main body, strip markup, collapse whitespace,
/// and cap the length.
pub fn html_to_clean_text(html: &str, url: Option<&str>) -> String {
    let parsed_url = url.and_then(|u| url::Url::parse(u).ok());
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    let text = transform_content_input(input, &config);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, MAX_CLEAN_TEXT_CHARS)
}

/// Outbound http(s) links whose host differs from the article's own,
/// relative hrefs resolved against the base URL. Deduplicated, capped.
pub fn collect_external_links(html: &str, base_url: &str) -> Vec<String> {
    let href_pattern = Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("Invalid href regex");
    let base = url::Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for cap in href_pattern.captures_iter(html) {
        let href = match cap.get(1) {
            Some(m) => m.as_str(),
            None => continue,
        };

        let resolved = if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else if let Some(base) = &base {
            match base.join(href) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            }
        } else {
            continue;
        };

        if !resolved.starts_with("http://") && !resolved.starts_with("https://") {
            continue;
        }
        if !is_external(&resolved, base_url) {
            continue;
        }
        if seen.insert(resolved.clone()) {
            links.push(resolved);
            if links.len() >= MAX_EXTERNAL_LINKS {
                break;
            }
        }
    }

    links
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

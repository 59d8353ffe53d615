use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

const KEV_URL: &str =
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json";
const KEV_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const KEV_TIMEOUT: Duration = Duration::from_secs(30);

/// One KEV catalog record, keyed by CVE id in the map.
#[derive(Debug, Clone)]
pub struct KevEntry {
    pub date_added: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub ransomware_use: bool,
    pub vendor: String,
    pub product: String,
}

#[derive(Debug, Deserialize)]
struct KevResponse {
    #[serde(default)]
    vulnerabilities: Vec<KevRecord>,
}

#[derive(Debug, Deserialize)]
struct KevRecord {
    #[serde(rename = "cveID")]
    cve_id: String,
    #[serde(rename = "dateAdded")]
    date_added: Option<String>,
    #[serde(rename = "dueDate")]
    due_date: Option<String>,
    #[serde(rename = "knownRansomwareCampaignUse")]
    ransomware_use: Option<String>,
    #[serde(rename = "vendorProject", default)]
    vendor: String,
    #[serde(default)]
    product: String,
}

struct CachedCatalog {
    fetched_at: Instant,
    entries: Arc<HashMap<String, KevEntry>>,
}

/// Process-wide KEV catalog cache with a 24 h TTL. The mutex is held across
/// the refresh so concurrent readers coalesce onto one fetch; a failed
/// refresh serves the stale catalog when one exists, else an empty map.
pub struct KevCatalog {
    client: reqwest::Client,
    url: String,
    state: Mutex<Option<CachedCatalog>>,
}

impl KevCatalog {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(KEV_TIMEOUT)
            .build()
            .expect("Failed to build KEV HTTP client");
        Self {
            client,
            url: KEV_URL.to_string(),
            state: Mutex::new(None),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub async fn get(&self) -> Arc<HashMap<String, KevEntry>> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if cached.fetched_at.elapsed() < KEV_TTL {
                return cached.entries.clone();
            }
        }

        match self.fetch().await {
            Ok(entries) => {
                info!(entries = entries.len(), "KEV catalog refreshed");
                let entries = Arc::new(entries);
                *state = Some(CachedCatalog {
                    fetched_at: Instant::now(),
                    entries: entries.clone(),
                });
                entries
            }
            Err(e) => {
                warn!(error = %e, "KEV catalog fetch failed");
                state
                    .as_ref()
                    .map(|c| c.entries.clone())
                    .unwrap_or_default()
            }
        }
    }

    async fn fetch(&self) -> Result<HashMap<String, KevEntry>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("KEV catalog fetch failed")?;
        let parsed: KevResponse = resp.json().await.context("Failed to parse KEV catalog")?;
        Ok(parse_kev_records(parsed.vulnerabilities))
    }
}

impl Default for KevCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_kev_records(records: Vec<KevRecord>) -> HashMap<String, KevEntry> {
    records
        .into_iter()
        .map(|r| {
            let entry = KevEntry {
                date_added: r.date_added.as_deref().and_then(parse_kev_date),
                due_date: r.due_date.as_deref().and_then(parse_kev_date),
                ransomware_use: r
                    .ransomware_use
                    .as_deref()
                    .is_some_and(|v| v.eq_ignore_ascii_case("known")),
                vendor: r.vendor,
                product: r.product,
            };
            (r.cve_id.to_uppercase(), entry)
        })
        .collect()
}

/// KEV dates are bare "YYYY-MM-DD".
fn parse_kev_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_keyed_by_upper_cve_id() {
        let records = vec![KevRecord {
            cve_id: "cve-2024-0001".into(),
            date_added: Some("2024-03-01".into()),
            due_date: Some("2024-03-22".into()),
            ransomware_use: Some("Known".into()),
            vendor: "Fortinet".into(),
            product: "FortiOS".into(),
        }];
        let map = parse_kev_records(records);
        let entry = map.get("CVE-2024-0001").unwrap();
        assert!(entry.ransomware_use);
        assert!(entry.date_added.is_some());
        assert!(entry.due_date.is_some());
        assert_eq!(entry.vendor, "Fortinet");
    }

    #[test]
    fn unknown_ransomware_use_is_false() {
        let records = vec![KevRecord {
            cve_id: "CVE-2024-0002".into(),
            date_added: None,
            due_date: None,
            ransomware_use: Some("Unknown".into()),
            vendor: String::new(),
            product: String::new(),
        }];
        let map = parse_kev_records(records);
        assert!(!map.get("CVE-2024-0002").unwrap().ransomware_use);
    }
}

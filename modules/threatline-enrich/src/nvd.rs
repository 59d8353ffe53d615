use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::rate_limit::SlidingWindowLimiter;

const NVD_API_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
const NVD_TIMEOUT: Duration = Duration::from_secs(15);
const RATE_WINDOW: Duration = Duration::from_secs(30);
/// NVD grants 50 requests per window with an API key, 5 without.
const CAPACITY_WITH_KEY: usize = 50;
const CAPACITY_WITHOUT_KEY: usize = 5;
const MAX_DESCRIPTION_CHARS: usize = 2_000;

/// What one NVD lookup yields for a CVE.
#[derive(Debug, Clone, Default)]
pub struct NvdData {
    pub cvss_score: Option<f64>,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub cpe_matches: Vec<String>,
    pub published_date: Option<DateTime<Utc>>,
}

// --- NVD response shapes (the slice of the 2.0 schema we read) ---

#[derive(Debug, Deserialize)]
struct NvdResponse {
    #[serde(default)]
    vulnerabilities: Vec<NvdVulnerability>,
}

#[derive(Debug, Deserialize)]
struct NvdVulnerability {
    cve: NvdCve,
}

#[derive(Debug, Deserialize)]
struct NvdCve {
    published: Option<String>,
    #[serde(default)]
    descriptions: Vec<NvdDescription>,
    #[serde(default)]
    metrics: NvdMetrics,
    #[serde(default)]
    configurations: Vec<NvdConfiguration>,
}

#[derive(Debug, Deserialize)]
struct NvdDescription {
    lang: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct NvdMetrics {
    #[serde(rename = "cvssMetricV31", default)]
    cvss_v31: Vec<NvdMetric>,
    #[serde(rename = "cvssMetricV30", default)]
    cvss_v30: Vec<NvdMetric>,
    #[serde(rename = "cvssMetricV2", default)]
    cvss_v2: Vec<NvdMetric>,
}

#[derive(Debug, Deserialize)]
struct NvdMetric {
    #[serde(rename = "cvssData")]
    cvss_data: NvdCvssData,
}

#[derive(Debug, Deserialize)]
struct NvdCvssData {
    #[serde(rename = "baseScore")]
    base_score: f64,
    #[serde(rename = "baseSeverity")]
    base_severity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NvdConfiguration {
    #[serde(default)]
    nodes: Vec<NvdNode>,
}

#[derive(Debug, Deserialize)]
struct NvdNode {
    #[serde(rename = "cpeMatch", default)]
    cpe_match: Vec<NvdCpeMatch>,
}

#[derive(Debug, Deserialize)]
struct NvdCpeMatch {
    criteria: String,
}

// --- Client ---

/// NVD lookup client. All calls pass through the process-wide sliding-window
/// limiter, so rate limiting never surfaces as an error.
pub struct NvdClient {
    client: reqwest::Client,
    api_key: Option<String>,
    limiter: SlidingWindowLimiter,
    base_url: String,
}

impl NvdClient {
    pub fn new(api_key: Option<String>) -> Self {
        let capacity = if api_key.is_some() {
            CAPACITY_WITH_KEY
        } else {
            CAPACITY_WITHOUT_KEY
        };
        info!(capacity, keyed = api_key.is_some(), "NVD client initialized");
        let client = reqwest::Client::builder()
            .timeout(NVD_TIMEOUT)
            .build()
            .expect("Failed to build NVD HTTP client");
        Self {
            client,
            api_key,
            limiter: SlidingWindowLimiter::new(RATE_WINDOW, capacity),
            base_url: NVD_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Look up one CVE. Returns `None` when NVD has no record for the id.
    pub async fn fetch(&self, cve_id: &str) -> Result<Option<NvdData>> {
        self.limiter.acquire().await;
        debug!(cve_id, "NVD lookup");

        let mut request = self.client.get(&self.base_url).query(&[("cveId", cve_id)]);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("NVD request failed for {cve_id}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("NVD API error for {cve_id}: {}", resp.status());
        }

        let parsed: NvdResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse NVD response for {cve_id}"))?;

        Ok(parsed.vulnerabilities.into_iter().next().map(|v| to_nvd_data(v.cve)))
    }
}

/// CVSS selection order is v3.1, then v3.0, then v2; severity comes from the
/// first v3.x metric present.
fn to_nvd_data(cve: NvdCve) -> NvdData {
    let v3 = cve
        .metrics
        .cvss_v31
        .first()
        .or_else(|| cve.metrics.cvss_v30.first());

    let cvss_score = v3
        .map(|m| m.cvss_data.base_score)
        .or_else(|| cve.metrics.cvss_v2.first().map(|m| m.cvss_data.base_score));

    let severity = v3.and_then(|m| m.cvss_data.base_severity.clone());

    let description = cve
        .descriptions
        .iter()
        .find(|d| d.lang == "en")
        .map(|d| truncate_chars(&d.value, MAX_DESCRIPTION_CHARS));

    let cpe_matches = cve
        .configurations
        .iter()
        .flat_map(|c| c.nodes.iter())
        .flat_map(|n| n.cpe_match.iter())
        .map(|m| m.criteria.clone())
        .collect();

    let published_date = cve.published.as_deref().and_then(parse_nvd_timestamp);

    NvdData {
        cvss_score,
        severity,
        description,
        cpe_matches,
        published_date,
    }
}

/// NVD timestamps come without a zone suffix ("2024-01-16T18:15:08.773").
fn parse_nvd_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(score: f64, severity: Option<&str>) -> NvdMetric {
        NvdMetric {
            cvss_data: NvdCvssData {
                base_score: score,
                base_severity: severity.map(String::from),
            },
        }
    }

    fn empty_cve() -> NvdCve {
        NvdCve {
            published: None,
            descriptions: vec![],
            metrics: NvdMetrics::default(),
            configurations: vec![],
        }
    }

    #[test]
    fn cvss_prefers_v31_over_v30_over_v2() {
        let mut cve = empty_cve();
        cve.metrics.cvss_v31 = vec![metric(9.8, Some("CRITICAL"))];
        cve.metrics.cvss_v30 = vec![metric(8.0, Some("HIGH"))];
        cve.metrics.cvss_v2 = vec![metric(7.5, None)];
        let data = to_nvd_data(cve);
        assert_eq!(data.cvss_score, Some(9.8));
        assert_eq!(data.severity.as_deref(), Some("CRITICAL"));

        let mut cve = empty_cve();
        cve.metrics.cvss_v30 = vec![metric(8.0, Some("HIGH"))];
        cve.metrics.cvss_v2 = vec![metric(7.5, None)];
        let data = to_nvd_data(cve);
        assert_eq!(data.cvss_score, Some(8.0));
        assert_eq!(data.severity.as_deref(), Some("HIGH"));

        let mut cve = empty_cve();
        cve.metrics.cvss_v2 = vec![metric(7.5, None)];
        let data = to_nvd_data(cve);
        assert_eq!(data.cvss_score, Some(7.5));
        // v2 carries no severity
        assert!(data.severity.is_none());
    }

    #[test]
    fn description_is_english_and_truncated() {
        let mut cve = empty_cve();
        cve.descriptions = vec![
            NvdDescription {
                lang: "es".into(),
                value: "descripción".into(),
            },
            NvdDescription {
                lang: "en".into(),
                value: "x".repeat(3_000),
            },
        ];
        let data = to_nvd_data(cve);
        assert_eq!(data.description.as_ref().map(String::len), Some(2_000));
    }

    #[test]
    fn cpe_matches_flatten_across_nodes() {
        let mut cve = empty_cve();
        cve.configurations = vec![NvdConfiguration {
            nodes: vec![
                NvdNode {
                    cpe_match: vec![NvdCpeMatch {
                        criteria: "cpe:2.3:a:v:p:1:*:*:*:*:*:*:*".into(),
                    }],
                },
                NvdNode {
                    cpe_match: vec![NvdCpeMatch {
                        criteria: "cpe:2.3:a:v:p:2:*:*:*:*:*:*:*".into(),
                    }],
                },
            ],
        }];
        let data = to_nvd_data(cve);
        assert_eq!(data.cpe_matches.len(), 2);
    }

    #[test]
    fn nvd_timestamp_parses_without_zone() {
        let parsed = parse_nvd_timestamp("2024-01-16T18:15:08.773").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2024-01-16");
    }
}

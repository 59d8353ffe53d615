use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::kev::KevCatalog;
use crate::nvd::NvdClient;

/// Enrichment for one CVE, independent of which articles mention it.
#[derive(Debug, Clone, Default)]
pub struct CveEnrichment {
    pub cvss_score: Option<f64>,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub cpe_matches: Vec<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub in_kev: bool,
    pub kev_date_added: Option<DateTime<Utc>>,
    pub kev_due_date: Option<DateTime<Utc>>,
    pub kev_ransomware_use: Option<bool>,
}

/// What a batch enrichment produced: per-CVE data plus the ids whose NVD
/// lookup failed; those carry no enrichment and the next run retries them.
#[derive(Debug, Default)]
pub struct EnrichmentBatch {
    pub enriched: HashMap<String, CveEnrichment>,
    pub failed: Vec<String>,
}

/// Joins NVD vulnerability data with the KEV catalog. One NVD call per new
/// CVE id, serialized through the client's rate limiter.
pub struct CveEnricher {
    nvd: NvdClient,
    kev: KevCatalog,
}

impl CveEnricher {
    pub fn new(nvd_api_key: Option<String>) -> Self {
        Self {
            nvd: NvdClient::new(nvd_api_key),
            kev: KevCatalog::new(),
        }
    }

    pub fn with_clients(nvd: NvdClient, kev: KevCatalog) -> Self {
        Self { nvd, kev }
    }

    /// Enrich CVE ids not already known to the store.
    pub async fn enrich(&self, cve_ids: &[String]) -> EnrichmentBatch {
        let mut batch = EnrichmentBatch::default();
        if cve_ids.is_empty() {
            return batch;
        }

        let kev_map = self.kev.get().await;

        for cve_id in cve_ids {
            let nvd_data = match self.nvd.fetch(cve_id).await {
                Ok(data) => data.unwrap_or_default(),
                Err(e) => {
                    warn!(cve_id, error = %e, "NVD enrichment failed");
                    batch.failed.push(cve_id.clone());
                    continue;
                }
            };

            let kev = kev_map.get(cve_id);
            batch.enriched.insert(
                cve_id.clone(),
                CveEnrichment {
                    cvss_score: nvd_data.cvss_score,
                    severity: nvd_data.severity,
                    description: nvd_data.description,
                    cpe_matches: nvd_data.cpe_matches,
                    published_date: nvd_data.published_date,
                    in_kev: kev.is_some(),
                    kev_date_added: kev.and_then(|k| k.date_added),
                    kev_due_date: kev.and_then(|k| k.due_date),
                    kev_ransomware_use: kev.map(|k| k.ransomware_use),
                },
            );
        }

        batch
    }
}

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use threatline_common::{ArticleCve, ReportPeriod, TechStackItem};
use threatline_store::{AutoExposure, Store};

use crate::matcher::{best_match, classify, MatchLevel};
use crate::metrics::{compute_metrics, metrics_delta, MetricsDelta, RemediationMetrics};

/// Matches article CVEs against a user's tech stack and maintains the
/// exposure ledger and its periodic snapshots.
pub struct ExposureEngine {
    store: Store,
}

impl ExposureEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Classify a batch of article CVEs for one user. Each distinct CVE is
    /// evaluated once against the whole stack; the highest-ranked match
    /// wins. CVEs without CPE data are skipped entirely.
    pub async fn classify_batch(&self, user_id: Uuid, cves: &[ArticleCve]) -> Result<usize> {
        let stack = self.store.tech_stack_for_user(user_id).await?;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut written = 0usize;
        for cve in cves {
            if !seen.insert(cve.cve_id.as_str()) {
                continue;
            }
            if cve.cpe_matches.is_empty() {
                continue;
            }

            let matched = best_match(&cve.cpe_matches, &stack);
            let state = classify(matched.map(|(level, _, _)| level));

            let exposure = AutoExposure {
                user_id,
                cve_id: cve.cve_id.clone(),
                article_cve_id: Some(cve.id),
                tech_stack_item_id: matched.map(|(_, _, item)| item.id),
                exposure_state: state,
                matched_cpe: matched.map(|(_, cpe, _)| cpe.to_string()),
                remediation_deadline: cve.kev_due_date,
            };
            self.store.upsert_exposure_auto(&exposure).await?;
            written += 1;
            debug!(cve_id = %cve.cve_id, state = %state, "Exposure classified");
        }

        if written > 0 {
            info!(user_id = %user_id, classified = written, "Exposure batch complete");
        }
        Ok(written)
    }

    /// Re-evaluate a user's historical CVEs against a newly added stack
    /// item. Only exact and product matches are written retroactively, and
    /// manually classified exposures are left alone.
    pub async fn retroactive_match(&self, user_id: Uuid, item: &TechStackItem) -> Result<usize> {
        let cves = self.store.cves_for_user_matched_articles(user_id).await?;
        let stack = std::slice::from_ref(item);

        let mut seen: HashSet<&str> = HashSet::new();
        let mut written = 0usize;
        for cve in &cves {
            if !seen.insert(cve.cve_id.as_str()) || cve.cpe_matches.is_empty() {
                continue;
            }

            if let Some(existing) = self.store.exposure_for(user_id, &cve.cve_id).await? {
                if !existing.auto_classified {
                    continue;
                }
            }

            let Some((level, matched_cpe, matched_item)) = best_match(&cve.cpe_matches, stack)
            else {
                continue;
            };
            if level < MatchLevel::Product {
                continue;
            }

            let exposure = AutoExposure {
                user_id,
                cve_id: cve.cve_id.clone(),
                article_cve_id: Some(cve.id),
                tech_stack_item_id: Some(matched_item.id),
                exposure_state: classify(Some(level)),
                matched_cpe: Some(matched_cpe.to_string()),
                remediation_deadline: cve.kev_due_date,
            };
            self.store.upsert_exposure_auto(&exposure).await?;
            written += 1;
        }

        info!(
            user_id = %user_id,
            vendor = %item.vendor,
            product = %item.product,
            matched = written,
            "Retroactive exposure match complete"
        );
        Ok(written)
    }

    pub async fn remediation_metrics(&self, user_id: Uuid) -> Result<RemediationMetrics> {
        let rows = self.store.exposures_with_cves(user_id).await?;
        Ok(compute_metrics(&rows, Utc::now()))
    }

    /// Record today's snapshot and compute the delta against the newest
    /// snapshot at or before `now - period`.
    pub async fn snapshot_and_delta(
        &self,
        user_id: Uuid,
        period: ReportPeriod,
        now: DateTime<Utc>,
    ) -> Result<(RemediationMetrics, Option<MetricsDelta>)> {
        let metrics = {
            let rows = self.store.exposures_with_cves(user_id).await?;
            compute_metrics(&rows, now)
        };

        let snap_date = utc_midnight(now);
        let metrics_json = serde_json::to_value(&metrics)?;
        self.store
            .upsert_period_snapshot(user_id, period, snap_date, &metrics_json)
            .await?;

        let cutoff = now - chrono::Duration::days(period.days());
        let baseline = self.store.snapshot_at_or_before(user_id, period, cutoff).await?;
        let delta = baseline
            .and_then(|snap| serde_json::from_value::<RemediationMetrics>(snap.metrics).ok())
            .map(|base| metrics_delta(&metrics, &base));

        Ok((metrics, delta))
    }
}

fn utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_hour(0)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_midnight_truncates_time() {
        let now = Utc::now();
        let midnight = utc_midnight(now);
        assert_eq!(midnight.hour(), 0);
        assert_eq!(midnight.minute(), 0);
        assert_eq!(midnight.date_naive(), now.date_naive());
    }
}

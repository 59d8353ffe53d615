use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use threatline_common::ExposureState;
use threatline_store::ExposureWithCve;

/// Remediation posture over a user's exposure ledger. All rates and day
/// counts are rounded to one decimal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemediationMetrics {
    pub total: usize,
    pub vulnerable: usize,
    pub fixed: usize,
    pub not_applicable: usize,
    pub indirect: usize,
    /// FIXED / (VULNERABLE + FIXED), percent. 0 with no classified rows.
    pub patch_rate: f64,
    /// Share of deadline-bearing fixes patched in time, percent. 100 with
    /// no deadline-bearing fixes.
    pub sla_compliance: f64,
    pub mttr_avg_days: f64,
    pub mttr_median_days: f64,
    pub kev_exposed: usize,
    pub kev_overdue: usize,
    pub critical_exposed: usize,
    pub avg_cvss_exposed: f64,
}

/// Change against an earlier snapshot of the same period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsDelta {
    pub vulnerable: i64,
    pub fixed: i64,
    pub patch_rate: f64,
    pub kev_exposed: i64,
    pub avg_cvss_exposed: f64,
}

pub fn compute_metrics(rows: &[ExposureWithCve], now: DateTime<Utc>) -> RemediationMetrics {
    let mut m = RemediationMetrics {
        total: rows.len(),
        ..Default::default()
    };

    let mut mttr_days: Vec<f64> = Vec::new();
    let mut sla_eligible = 0usize;
    let mut sla_met = 0usize;
    let mut exposed_scores: Vec<f64> = Vec::new();

    for row in rows {
        let state = row.state();
        match state {
            ExposureState::Vulnerable => m.vulnerable += 1,
            ExposureState::Fixed => m.fixed += 1,
            ExposureState::NotApplicable => m.not_applicable += 1,
            ExposureState::Indirect => m.indirect += 1,
        }

        match state {
            ExposureState::Fixed => {
                if let Some(patched_at) = row.patched_at {
                    mttr_days.push(
                        (patched_at - row.first_detected_at).num_seconds().max(0) as f64 / 86_400.0,
                    );
                    if let Some(deadline) = row.remediation_deadline {
                        sla_eligible += 1;
                        if patched_at <= deadline {
                            sla_met += 1;
                        }
                    }
                }
            }
            ExposureState::Vulnerable => {
                if row.in_kev.unwrap_or(false) {
                    m.kev_exposed += 1;
                    if row.remediation_deadline.is_some_and(|d| d < now) {
                        m.kev_overdue += 1;
                    }
                }
                if let Some(score) = row.cvss_score {
                    exposed_scores.push(score);
                    if score >= 9.0 {
                        m.critical_exposed += 1;
                    }
                }
            }
            _ => {}
        }
    }

    let classified = m.vulnerable + m.fixed;
    m.patch_rate = if classified == 0 {
        0.0
    } else {
        round1(m.fixed as f64 / classified as f64 * 100.0)
    };

    m.sla_compliance = if sla_eligible == 0 {
        100.0
    } else {
        round1(sla_met as f64 / sla_eligible as f64 * 100.0)
    };

    if !mttr_days.is_empty() {
        m.mttr_avg_days = round1(mttr_days.iter().sum::<f64>() / mttr_days.len() as f64);
        m.mttr_median_days = round1(median(&mut mttr_days));
    }

    if !exposed_scores.is_empty() {
        m.avg_cvss_exposed =
            round1(exposed_scores.iter().sum::<f64>() / exposed_scores.len() as f64);
    }

    m
}

pub fn metrics_delta(current: &RemediationMetrics, baseline: &RemediationMetrics) -> MetricsDelta {
    MetricsDelta {
        vulnerable: current.vulnerable as i64 - baseline.vulnerable as i64,
        fixed: current.fixed as i64 - baseline.fixed as i64,
        patch_rate: round1(current.patch_rate - baseline.patch_rate),
        kev_exposed: current.kev_exposed as i64 - baseline.kev_exposed as i64,
        avg_cvss_exposed: round1(current.avg_cvss_exposed - baseline.avg_cvss_exposed),
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn row(
        state: &str,
        detected_days_ago: i64,
        patched_days_ago: Option<i64>,
        deadline_days_ago: Option<i64>,
        cvss: Option<f64>,
        in_kev: bool,
    ) -> ExposureWithCve {
        let now = Utc::now();
        ExposureWithCve {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            cve_id: "CVE-2024-0001".into(),
            exposure_state: state.to_string(),
            auto_classified: true,
            first_detected_at: now - Duration::days(detected_days_ago),
            patched_at: patched_days_ago.map(|d| now - Duration::days(d)),
            remediation_deadline: deadline_days_ago.map(|d| now - Duration::days(d)),
            cvss_score: cvss,
            in_kev: Some(in_kev),
        }
    }

    #[test]
    fn empty_ledger_yields_defaults() {
        let m = compute_metrics(&[], Utc::now());
        assert_eq!(m.patch_rate, 0.0);
        assert_eq!(m.sla_compliance, 100.0);
        assert_eq!(m.mttr_avg_days, 0.0);
    }

    #[test]
    fn patch_rate_over_classified_states_only() {
        let rows = vec![
            row("VULNERABLE", 10, None, None, None, false),
            row("FIXED", 10, Some(5), None, None, false),
            row("NOT_APPLICABLE", 10, None, None, None, false),
            row("INDIRECT", 10, None, None, None, false),
        ];
        let m = compute_metrics(&rows, Utc::now());
        assert_eq!(m.patch_rate, 50.0);
        assert_eq!(m.not_applicable, 1);
        assert_eq!(m.indirect, 1);
    }

    #[test]
    fn sla_counts_only_deadline_bearing_fixes() {
        let rows = vec![
            // Patched 8 days ago, deadline 5 days ago: met
            row("FIXED", 20, Some(8), Some(5), None, false),
            // Patched 2 days ago, deadline 5 days ago: missed
            row("FIXED", 20, Some(2), Some(5), None, false),
            // No deadline: not eligible
            row("FIXED", 20, Some(1), None, None, false),
        ];
        let m = compute_metrics(&rows, Utc::now());
        assert_eq!(m.sla_compliance, 50.0);
    }

    #[test]
    fn mttr_avg_and_median() {
        let rows = vec![
            row("FIXED", 10, Some(8), None, None, false), // 2 days
            row("FIXED", 10, Some(6), None, None, false), // 4 days
            row("FIXED", 10, Some(1), None, None, false), // 9 days
        ];
        let m = compute_metrics(&rows, Utc::now());
        assert_eq!(m.mttr_avg_days, 5.0);
        assert_eq!(m.mttr_median_days, 4.0);
    }

    #[test]
    fn kev_and_critical_exposure_counts() {
        let rows = vec![
            // Overdue KEV: deadline in the past
            row("VULNERABLE", 30, None, Some(3), Some(9.8), true),
            // KEV, deadline in the future
            row("VULNERABLE", 5, None, Some(-10), Some(7.0), true),
            // Fixed KEV does not count as exposed
            row("FIXED", 30, Some(10), None, Some(9.9), true),
        ];
        let m = compute_metrics(&rows, Utc::now());
        assert_eq!(m.kev_exposed, 2);
        assert_eq!(m.kev_overdue, 1);
        assert_eq!(m.critical_exposed, 1);
        assert_eq!(m.avg_cvss_exposed, 8.4); // (9.8 + 7.0) / 2
    }

    #[test]
    fn delta_subtracts_baseline() {
        let current = RemediationMetrics {
            vulnerable: 5,
            fixed: 3,
            patch_rate: 37.5,
            kev_exposed: 2,
            avg_cvss_exposed: 8.0,
            ..Default::default()
        };
        let baseline = RemediationMetrics {
            vulnerable: 7,
            fixed: 1,
            patch_rate: 12.5,
            kev_exposed: 3,
            avg_cvss_exposed: 8.5,
            ..Default::default()
        };
        let delta = metrics_delta(&current, &baseline);
        assert_eq!(delta.vulnerable, -2);
        assert_eq!(delta.fixed, 2);
        assert_eq!(delta.patch_rate, 25.0);
        assert_eq!(delta.kev_exposed, -1);
        assert_eq!(delta.avg_cvss_exposed, -0.5);
    }
}

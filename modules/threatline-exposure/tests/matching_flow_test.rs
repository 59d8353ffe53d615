//! Exposure flow over the pure pieces: CPE parse, three-tier match,
//! state classification, and the metrics math on the resulting ledger.

use chrono::{Duration, Utc};
use uuid::Uuid;

use threatline_common::{ExposureState, TechStackItem};
use threatline_exposure::{
    best_match, classify, compute_metrics, generate_cpe_pattern, parse_cpe, MatchLevel,
};
use threatline_store::ExposureWithCve;

fn stack_item(vendor: &str, product: &str, version: Option<&str>) -> TechStackItem {
    TechStackItem {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        vendor: vendor.to_string(),
        product: product.to_string(),
        version: version.map(String::from),
        category: "network".to_string(),
        cpe_pattern: generate_cpe_pattern(vendor, product),
        active: true,
    }
}

#[test]
fn fortios_cpe_marks_fortios_stack_vulnerable() {
    let item = stack_item("fortinet", "fortios", Some("7.0.0"));
    let cpes = vec!["cpe:2.3:a:fortinet:fortios:7.0.0:*:*:*:*:*:*:*".to_string()];

    let (level, matched_cpe, matched_item) =
        best_match(&cpes, std::slice::from_ref(&item)).unwrap();
    assert_eq!(level, MatchLevel::Exact);
    assert_eq!(matched_item.id, item.id);
    assert_eq!(classify(Some(level)), ExposureState::Vulnerable);

    // The matched CPE survives for the ledger
    let parsed = parse_cpe(matched_cpe).unwrap();
    assert_eq!(parsed.vendor, "fortinet");
    assert_eq!(parsed.version, "7.0.0");
}

#[test]
fn unrelated_cpes_classify_as_not_applicable() {
    let item = stack_item("fortinet", "fortios", Some("7.0.0"));
    let cpes = vec!["cpe:2.3:a:microsoft:exchange_server:2019:*:*:*:*:*:*:*".to_string()];
    let level = best_match(&cpes, std::slice::from_ref(&item)).map(|(l, _, _)| l);
    assert_eq!(classify(level), ExposureState::NotApplicable);
}

#[test]
fn sibling_product_classifies_as_indirect() {
    let item = stack_item("fortinet", "fortios", Some("7.0.0"));
    let cpes = vec!["cpe:2.3:a:fortinet:fortimanager:7.2.0:*:*:*:*:*:*:*".to_string()];
    let level = best_match(&cpes, std::slice::from_ref(&item)).map(|(l, _, _)| l);
    assert_eq!(classify(level), ExposureState::Indirect);
}

#[test]
fn ledger_metrics_reflect_a_patch_cycle() {
    let now = Utc::now();
    let row = |state: &str, patched: Option<i64>, cvss: Option<f64>, kev: bool| ExposureWithCve {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        cve_id: "CVE-2024-21762".to_string(),
        exposure_state: state.to_string(),
        auto_classified: true,
        first_detected_at: now - Duration::days(14),
        patched_at: patched.map(|d| now - Duration::days(d)),
        remediation_deadline: Some(now - Duration::days(1)),
        cvss_score: cvss,
        in_kev: Some(kev),
    };

    let ledger = vec![
        row("VULNERABLE", None, Some(9.6), true),
        row("FIXED", Some(7), Some(9.8), true),
        row("NOT_APPLICABLE", None, None, false),
    ];
    let metrics = compute_metrics(&ledger, now);

    assert_eq!(metrics.total, 3);
    assert_eq!(metrics.patch_rate, 50.0);
    assert_eq!(metrics.mttr_avg_days, 7.0);
    // The unpatched KEV item blew its deadline
    assert_eq!(metrics.kev_exposed, 1);
    assert_eq!(metrics.kev_overdue, 1);
    assert_eq!(metrics.critical_exposed, 1);
}

//! Period report builder: pure stats over the period's stories, then a
//! period-specific summary prompt.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use llm_client::{CompletionRequest, CompletionService};
use threatline_common::{ArticleCve, ArticleEntity, EntityType, NewsGroup, ReportPeriod};

/// Story context handed to the summary prompt, cut here with an explicit
/// marker when it overruns.
const GROUP_CONTEXT_CAP: usize = 30_000;
const TRUNCATION_MARKER: &str = "[... truncated for length]";
const TOP_N: usize = 10;

/// Everything the builder needs for one (user, period) report.
#[derive(Debug, Clone)]
pub struct ReportInput {
    pub period: ReportPeriod,
    pub now: DateTime<Utc>,
    pub groups: Vec<NewsGroup>,
    /// One display name per article-signal row in scope.
    pub signal_names: Vec<String>,
    pub entities: Vec<ArticleEntity>,
    pub cves: Vec<ArticleCve>,
}

impl ReportInput {
    pub fn from_date(&self) -> DateTime<Utc> {
        self.now - Duration::days(self.period.days())
    }
}

// --- Stats (serialized into PeriodReport.stats as a JSON object) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayCount {
    /// UTC calendar day, "YYYY-MM-DD".
    pub date: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopCve {
    pub cve_id: String,
    pub cvss_score: Option<f64>,
    pub in_kev: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KevDue {
    pub cve_id: String,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CveStats {
    pub unique_count: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub kev_count: usize,
    pub avg_cvss: f64,
    pub max_cvss: f64,
    pub top_cves: Vec<TopCve>,
    pub kev_cves: Vec<KevDue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStats {
    pub total_stories: usize,
    /// Keys "1"-"4" (case type) plus "unclassified".
    pub stories_by_case_type: BTreeMap<String, usize>,
    pub signal_distribution: Vec<NameCount>,
    pub top_entities: Vec<NameCount>,
    pub top_affected_products: Vec<NameCount>,
    pub top_affected_sectors: Vec<NameCount>,
    pub top_threat_actors: Vec<NameCount>,
    pub stories_per_day: Vec<DayCount>,
    pub cve_metrics: CveStats,
}

/// Pure stats over the period's data.
pub fn compute_stats(input: &ReportInput) -> ReportStats {
    let mut by_case_type: BTreeMap<String, usize> = BTreeMap::new();
    for group in &input.groups {
        let key = match group.case_type {
            Some(ct) => ct.as_i16().to_string(),
            None => "unclassified".to_string(),
        };
        *by_case_type.entry(key).or_insert(0) += 1;
    }

    let mut signal_counts: HashMap<&str, usize> = HashMap::new();
    for name in &input.signal_names {
        *signal_counts.entry(name.as_str()).or_insert(0) += 1;
    }
    let signal_distribution = ranked(signal_counts, usize::MAX);

    let top_entities = ranked_entities(&input.entities, |_| true);
    let top_affected_products =
        ranked_entities(&input.entities, |e| e.entity_type == EntityType::Product);
    let top_affected_sectors =
        ranked_entities(&input.entities, |e| e.entity_type == EntityType::Sector);
    let top_threat_actors = ranked_entities(&input.entities, |e| {
        matches!(e.entity_type, EntityType::Person | EntityType::Company)
    });

    ReportStats {
        total_stories: input.groups.len(),
        stories_by_case_type: by_case_type,
        signal_distribution,
        top_entities,
        top_affected_products,
        top_affected_sectors,
        top_threat_actors,
        stories_per_day: stories_per_day(input),
        cve_metrics: cve_stats(&input.cves),
    }
}

fn ranked_entities<F>(entities: &[ArticleEntity], filter: F) -> Vec<NameCount>
where
    F: Fn(&ArticleEntity) -> bool,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entity in entities.iter().filter(|e| filter(e)) {
        *counts.entry(entity.name.as_str()).or_insert(0) += 1;
    }
    ranked(counts, TOP_N)
}

fn ranked(counts: HashMap<&str, usize>, cap: usize) -> Vec<NameCount> {
    let mut items: Vec<NameCount> = counts
        .into_iter()
        .map(|(name, count)| NameCount {
            name: name.to_string(),
            count,
        })
        .collect();
    items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    items.truncate(cap);
    items
}

/// One bucket per calendar day in the window, empty days included.
fn stories_per_day(input: &ReportInput) -> Vec<DayCount> {
    let mut per_day: Vec<DayCount> = Vec::new();
    let start = input.from_date().date_naive();
    let end = input.now.date_naive();
    let mut day = start;
    while day <= end {
        let count = input
            .groups
            .iter()
            .filter(|g| g.date.date_naive() == day)
            .count();
        per_day.push(DayCount {
            date: day.format("%Y-%m-%d").to_string(),
            count,
        });
        day = day + Duration::days(1);
    }
    per_day
}

fn cve_stats(cves: &[ArticleCve]) -> CveStats {
    // Dedup by CVE id; enrichment is identical across articles.
    let mut unique: HashMap<&str, &ArticleCve> = HashMap::new();
    for cve in cves {
        unique.entry(cve.cve_id.as_str()).or_insert(cve);
    }

    let mut stats = CveStats {
        unique_count: unique.len(),
        ..Default::default()
    };

    let mut scores: Vec<f64> = Vec::new();
    for cve in unique.values() {
        if let Some(score) = cve.cvss_score {
            scores.push(score);
            if score >= 9.0 {
                stats.critical += 1;
            } else if score >= 7.0 {
                stats.high += 1;
            } else if score >= 4.0 {
                stats.medium += 1;
            } else {
                stats.low += 1;
            }
        }
        if cve.in_kev {
            stats.kev_count += 1;
            stats.kev_cves.push(KevDue {
                cve_id: cve.cve_id.clone(),
                due_date: cve.kev_due_date,
            });
        }
    }

    if !scores.is_empty() {
        stats.avg_cvss = round1(scores.iter().sum::<f64>() / scores.len() as f64);
        stats.max_cvss = round1(scores.iter().cloned().fold(f64::MIN, f64::max));
    }

    let mut top: Vec<&ArticleCve> = unique.into_values().collect();
    top.sort_by(|a, b| {
        b.cvss_score
            .unwrap_or(-1.0)
            .partial_cmp(&a.cvss_score.unwrap_or(-1.0))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cve_id.cmp(&b.cve_id))
    });
    stats.top_cves = top
        .into_iter()
        .take(TOP_N)
        .map(|c| TopCve {
            cve_id: c.cve_id.clone(),
            cvss_score: c.cvss_score,
            in_kev: c.in_kev,
        })
        .collect();
    stats.kev_cves.sort_by(|a, b| a.cve_id.cmp(&b.cve_id));

    stats
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// --- Summary generation ---

/// Generates the period summary. Prompt register and token budget are
/// period-specific: operational for daily, tactical for weekly, strategic
/// for monthly.
pub struct ReportBuilder {
    llm: Arc<dyn CompletionService>,
}

impl ReportBuilder {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub async fn generate_summary(
        &self,
        input: &ReportInput,
        stats: &ReportStats,
    ) -> Result<String> {
        let request = CompletionRequest::text(
            system_prompt(input.period, stats),
            group_context(&input.groups),
            max_tokens(input.period),
        );
        let summary = self.llm.complete(&request).await?;
        info!(period = %input.period, chars = summary.len(), "Period summary generated");
        Ok(summary)
    }
}

fn max_tokens(period: ReportPeriod) -> u32 {
    match period {
        ReportPeriod::Daily => 2_500,
        ReportPeriod::Weekly => 3_500,
        ReportPeriod::Monthly => 4_000,
    }
}

fn system_prompt(period: ReportPeriod, stats: &ReportStats) -> String {
    let stats_json = serde_json::to_string_pretty(stats).unwrap_or_else(|_| "{}".to_string());
    let framing = match period {
        ReportPeriod::Daily => {
            "You are writing today's operational SOC briefing. Lead with what needs \
             action in the next 24 hours: active exploitation, overdue KEV items, \
             critical exposures. Keep it tight and tactical."
        }
        ReportPeriod::Weekly => {
            "You are writing a weekly tactical report for security leadership. \
             Cover the week's significant stories, trends against the prior week, \
             and remediation posture. Use short sections and trend tables."
        }
        ReportPeriod::Monthly => {
            "You are writing a monthly strategic posture report for the board. \
             Focus on the threat landscape, sector targeting, exposure trends, and \
             strategic recommendations. Avoid raw technical detail."
        }
    };
    format!(
        "{framing}\n\nPrecomputed statistics for the period:\n{stats_json}\n\n\
         Base the narrative strictly on the statistics and story context provided."
    )
}

/// Story context, most severe case type first, capped with a visible marker.
fn group_context(groups: &[NewsGroup]) -> String {
    let mut sorted: Vec<&NewsGroup> = groups.iter().collect();
    sorted.sort_by_key(|g| g.case_type.map(|ct| ct.as_i16()).unwrap_or(i16::MAX));

    let mut context = String::from("Stories this period:\n");
    for group in sorted {
        let entry = format!(
            "\n## {title} (case type {ct})\n{synopsis}\n{summary}\n",
            title = group.title,
            ct = group
                .case_type
                .map(|c| c.as_i16().to_string())
                .unwrap_or_else(|| "n/a".to_string()),
            synopsis = group.synopsis.as_deref().unwrap_or(""),
            summary = group.executive_summary.as_deref().unwrap_or(""),
        );
        if context.len() + entry.len() > GROUP_CONTEXT_CAP {
            context.push_str(TRUNCATION_MARKER);
            break;
        }
        context.push_str(&entry);
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use threatline_common::CaseType;
    use uuid::Uuid;

    fn group(case_type: Option<CaseType>, date: DateTime<Utc>) -> NewsGroup {
        NewsGroup {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "story".into(),
            synopsis: Some("syn".into()),
            executive_summary: None,
            impact_analysis: None,
            actionability: None,
            case_type,
            confidence: 0.5,
            date,
        }
    }

    fn cve(id: &str, score: Option<f64>, in_kev: bool) -> ArticleCve {
        ArticleCve {
            id: Uuid::new_v4(),
            article_id: Uuid::new_v4(),
            cve_id: id.to_string(),
            cvss_score: score,
            severity: None,
            description: None,
            cpe_matches: vec![],
            published_date: None,
            in_kev,
            kev_date_added: None,
            kev_due_date: None,
            kev_ransomware_use: None,
        }
    }

    fn input(groups: Vec<NewsGroup>, cves: Vec<ArticleCve>) -> ReportInput {
        ReportInput {
            period: ReportPeriod::Weekly,
            now: Utc::now(),
            groups,
            signal_names: vec![
                "Ransomware".into(),
                "Ransomware".into(),
                "Data Breach".into(),
            ],
            entities: vec![],
            cves,
        }
    }

    #[test]
    fn case_type_totals() {
        let now = Utc::now();
        let stats = compute_stats(&input(
            vec![
                group(Some(CaseType::ActivelyExploited), now),
                group(Some(CaseType::ActivelyExploited), now),
                group(Some(CaseType::Informational), now),
                group(None, now),
            ],
            vec![],
        ));
        assert_eq!(stats.total_stories, 4);
        assert_eq!(stats.stories_by_case_type["1"], 2);
        assert_eq!(stats.stories_by_case_type["4"], 1);
        assert_eq!(stats.stories_by_case_type["unclassified"], 1);
    }

    #[test]
    fn signal_distribution_sorted_desc() {
        let stats = compute_stats(&input(vec![], vec![]));
        assert_eq!(stats.signal_distribution[0].name, "Ransomware");
        assert_eq!(stats.signal_distribution[0].count, 2);
        assert_eq!(stats.signal_distribution[1].count, 1);
    }

    #[test]
    fn stories_per_day_covers_empty_days() {
        let now = Utc::now();
        let stats = compute_stats(&input(vec![group(None, now)], vec![]));
        // Weekly window: 8 calendar days inclusive
        assert_eq!(stats.stories_per_day.len(), 8);
        assert_eq!(stats.stories_per_day.last().unwrap().count, 1);
        assert!(stats.stories_per_day[..7].iter().all(|d| d.count == 0));
    }

    #[test]
    fn cve_buckets_and_aggregates() {
        let stats = compute_stats(&input(
            vec![],
            vec![
                cve("CVE-2024-0001", Some(9.8), true),
                // Same CVE from a second article: deduped
                cve("CVE-2024-0001", Some(9.8), true),
                cve("CVE-2024-0002", Some(7.5), false),
                cve("CVE-2024-0003", Some(5.0), false),
                cve("CVE-2024-0004", Some(2.1), false),
                cve("CVE-2024-0005", None, false),
            ],
        ));
        let m = &stats.cve_metrics;
        assert_eq!(m.unique_count, 5);
        assert_eq!((m.critical, m.high, m.medium, m.low), (1, 1, 1, 1));
        assert_eq!(m.kev_count, 1);
        assert_eq!(m.max_cvss, 9.8);
        assert_eq!(m.avg_cvss, 6.1); // (9.8+7.5+5.0+2.1)/4 = 6.1
        assert_eq!(m.top_cves[0].cve_id, "CVE-2024-0001");
        // Unscored CVEs sort last
        assert_eq!(m.top_cves.last().unwrap().cve_id, "CVE-2024-0005");
        assert_eq!(m.kev_cves.len(), 1);
    }

    #[test]
    fn group_context_orders_by_severity_and_caps() {
        let now = Utc::now();
        let groups = vec![
            group(Some(CaseType::Informational), now),
            group(Some(CaseType::ActivelyExploited), now),
        ];
        let context = group_context(&groups);
        let critical_pos = context.find("case type 1").unwrap();
        let info_pos = context.find("case type 4").unwrap();
        assert!(critical_pos < info_pos);

        let many: Vec<NewsGroup> = (0..500)
            .map(|_| {
                let mut g = group(Some(CaseType::Informational), now);
                g.synopsis = Some("x".repeat(200));
                g
            })
            .collect();
        let context = group_context(&many);
        assert!(context.len() <= GROUP_CONTEXT_CAP + TRUNCATION_MARKER.len());
        assert!(context.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn token_budget_scales_with_period() {
        assert_eq!(max_tokens(ReportPeriod::Daily), 2_500);
        assert_eq!(max_tokens(ReportPeriod::Weekly), 3_500);
        assert_eq!(max_tokens(ReportPeriod::Monthly), 4_000);
    }
}

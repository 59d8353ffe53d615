use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Digest cadence ---

/// How often a user receives a digest. Closed set: anything else is not due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestFrequency {
    Hourly,
    Every3h,
    Every6h,
    Every12h,
    Daily,
    Every3d,
    Weekly,
}

impl DigestFrequency {
    pub fn interval(&self) -> Duration {
        match self {
            DigestFrequency::Hourly => Duration::hours(1),
            DigestFrequency::Every3h => Duration::hours(3),
            DigestFrequency::Every6h => Duration::hours(6),
            DigestFrequency::Every12h => Duration::hours(12),
            DigestFrequency::Daily => Duration::days(1),
            DigestFrequency::Every3d => Duration::days(3),
            DigestFrequency::Weekly => Duration::days(7),
        }
    }

    /// Frequencies of a day or longer are pinned to the user's digest hour.
    pub fn is_daily_or_longer(&self) -> bool {
        self.interval() >= Duration::days(1)
    }
}

impl std::fmt::Display for DigestFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestFrequency::Hourly => write!(f, "1h"),
            DigestFrequency::Every3h => write!(f, "3h"),
            DigestFrequency::Every6h => write!(f, "6h"),
            DigestFrequency::Every12h => write!(f, "12h"),
            DigestFrequency::Daily => write!(f, "1d"),
            DigestFrequency::Every3d => write!(f, "3d"),
            DigestFrequency::Weekly => write!(f, "7d"),
        }
    }
}

impl std::str::FromStr for DigestFrequency {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Self::Hourly),
            "3h" => Ok(Self::Every3h),
            "6h" => Ok(Self::Every6h),
            "12h" => Ok(Self::Every12h),
            "1d" => Ok(Self::Daily),
            "3d" => Ok(Self::Every3d),
            "7d" => Ok(Self::Weekly),
            other => Err(format!("unknown DigestFrequency: {other}")),
        }
    }
}

// --- User ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub industry_id: Option<Uuid>,
    pub digest_frequency: DigestFrequency,
    /// UTC delivery time as "HH:MM". Only the hour gates daily-or-longer digests.
    pub digest_time: String,
    pub last_digest_at: Option<DateTime<Utc>>,
    pub email_enabled: bool,
    pub onboarded: bool,
}

impl User {
    /// Parse the hour component of `digest_time`. "09:30" → 9.
    pub fn digest_hour(&self) -> Option<u32> {
        self.digest_time.split(':').next()?.parse().ok()
    }
}

// --- Sources & keywords ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Rss,
    Website,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Rss => write!(f, "rss"),
            SourceType::Website => write!(f, "website"),
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rss" => Ok(Self::Rss),
            "website" => Ok(Self::Website),
            other => Err(format!("unknown SourceType: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    pub name: String,
    pub source_type: SourceType,
    pub active: bool,
}

/// A user keyword. `word` is stored lowercase, unique per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: Uuid,
    pub user_id: Uuid,
    pub word: String,
}

// --- Articles ---

/// A scraped item before it has a database identity. RSS items carry the feed
/// snippet as `content`; website sources produce one pseudo-article per page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedArticle {
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub guid: Option<String>,
    pub tags: Vec<String>,
    /// The source this article was collected for. Cache reads re-tag this
    /// with the caller's own source id.
    pub source_id: Uuid,
}

/// A persisted article. Cross-user: exists once per URL, and `clean_text`,
/// `entities_extracted`, `cves_extracted` are shared enrichment caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    pub title: String,
    pub content: String,
    pub clean_text: Option<String>,
    pub raw_html: Option<String>,
    pub external_links: Vec<String>,
    pub author: Option<String>,
    pub guid: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub entities_extracted: bool,
    pub cves_extracted: bool,
}

/// Per-user view of an article. Unique on (user_id, article_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserArticle {
    pub user_id: Uuid,
    pub article_id: Uuid,
    pub source_id: Uuid,
    pub matched: bool,
    pub matched_keywords: Vec<String>,
    pub news_group_id: Option<Uuid>,
    pub read: bool,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

// --- Entities & signals ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Company,
    Person,
    Product,
    Geography,
    Sector,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Company => write!(f, "company"),
            EntityType::Person => write!(f, "person"),
            EntityType::Product => write!(f, "product"),
            EntityType::Geography => write!(f, "geography"),
            EntityType::Sector => write!(f, "sector"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "company" => Ok(Self::Company),
            "person" => Ok(Self::Person),
            "product" => Ok(Self::Product),
            "geography" => Ok(Self::Geography),
            "sector" => Ok(Self::Sector),
            other => Err(format!("unknown EntityType: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleEntity {
    pub article_id: Uuid,
    pub entity_type: EntityType,
    pub name: String,
    pub confidence: f64,
}

/// Closed-vocabulary industry phenomenon ("ransomware", "data-breach", ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndustrySignal {
    pub id: Uuid,
    pub industry_id: Uuid,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSignal {
    pub article_id: Uuid,
    pub industry_signal_id: Uuid,
    pub confidence: f64,
}

// --- CVEs ---

/// NVD + KEV enrichment for a CVE mentioned by an article.
/// Unique on (article_id, cve_id); enrichment fields are identical across
/// articles mentioning the same CVE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleCve {
    pub id: Uuid,
    pub article_id: Uuid,
    pub cve_id: String,
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

// --- Tech stack & exposure ---

/// A declared technology. vendor/product are normalized lowercase with
/// spaces collapsed to underscores; unique on (user, vendor, product, version).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechStackItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub vendor: String,
    pub product: String,
    pub version: Option<String>,
    pub category: String,
    pub cpe_pattern: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExposureState {
    Vulnerable,
    Fixed,
    NotApplicable,
    Indirect,
}

impl std::fmt::Display for ExposureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExposureState::Vulnerable => write!(f, "VULNERABLE"),
            ExposureState::Fixed => write!(f, "FIXED"),
            ExposureState::NotApplicable => write!(f, "NOT_APPLICABLE"),
            ExposureState::Indirect => write!(f, "INDIRECT"),
        }
    }
}

impl std::str::FromStr for ExposureState {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "VULNERABLE" => Ok(Self::Vulnerable),
            "FIXED" => Ok(Self::Fixed),
            "NOT_APPLICABLE" => Ok(Self::NotApplicable),
            "INDIRECT" => Ok(Self::Indirect),
            other => Err(format!("unknown ExposureState: {other}")),
        }
    }
}

/// A user's running relationship to one CVE. Unique on (user_id, cve_id).
/// `auto_classified = false` marks a manual override that the auto-classifier
/// must never touch again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCveExposure {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cve_id: String,
    pub article_cve_id: Option<Uuid>,
    pub tech_stack_item_id: Option<Uuid>,
    pub exposure_state: ExposureState,
    pub auto_classified: bool,
    pub matched_cpe: Option<String>,
    pub first_detected_at: DateTime<Utc>,
    pub patched_at: Option<DateTime<Utc>>,
    pub remediation_deadline: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

// --- Stories ---

/// Severity bucket assigned by the briefing generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CaseType {
    ActivelyExploited = 1,
    VulnerableNoExploit = 2,
    Fixed = 3,
    Informational = 4,
}

impl CaseType {
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    /// Out-of-range or missing values collapse to Informational.
    pub fn from_i64(v: Option<i64>) -> Self {
        match v {
            Some(1) => CaseType::ActivelyExploited,
            Some(2) => CaseType::VulnerableNoExploit,
            Some(3) => CaseType::Fixed,
            _ => CaseType::Informational,
        }
    }
}

/// A story: clustered articles narrated by the briefing generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsGroup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub synopsis: Option<String>,
    pub executive_summary: Option<String>,
    pub impact_analysis: Option<String>,
    pub actionability: Option<String>,
    pub case_type: Option<CaseType>,
    pub confidence: f64,
    pub date: DateTime<Utc>,
}

// --- Period reports ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl ReportPeriod {
    pub const ALL: [ReportPeriod; 3] = [ReportPeriod::Daily, ReportPeriod::Weekly, ReportPeriod::Monthly];

    pub fn days(&self) -> i64 {
        match self {
            ReportPeriod::Daily => 1,
            ReportPeriod::Weekly => 7,
            ReportPeriod::Monthly => 30,
        }
    }
}

impl std::fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportPeriod::Daily => write!(f, "1d"),
            ReportPeriod::Weekly => write!(f, "7d"),
            ReportPeriod::Monthly => write!(f, "30d"),
        }
    }
}

impl std::str::FromStr for ReportPeriod {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "1d" => Ok(Self::Daily),
            "7d" => Ok(Self::Weekly),
            "30d" => Ok(Self::Monthly),
            other => Err(format!("unknown ReportPeriod: {other}")),
        }
    }
}

// --- Digest outcome ---

/// What a single user's digest run produced. Errors are categorized strings;
/// a non-empty list never means the run was aborted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestOutcome {
    pub user_id: Uuid,
    pub scraped: usize,
    pub matched: usize,
    pub summarized: usize,
    pub errors: Vec<String>,
}

impl DigestOutcome {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

// --- URL helpers ---

/// Extract the host from a URL ("https://www.example.com/p" → "www.example.com").
pub fn extract_host(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Normalize a vendor/product name for CPE construction:
/// lowercase, trimmed, internal whitespace runs become a single underscore.
pub fn normalize_cpe_component(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_frequency_roundtrip() {
        for s in ["1h", "3h", "6h", "12h", "1d", "3d", "7d"] {
            let f: DigestFrequency = s.parse().unwrap();
            assert_eq!(f.to_string(), s);
        }
        assert!("2h".parse::<DigestFrequency>().is_err());
    }

    #[test]
    fn digest_frequency_daily_threshold() {
        assert!(!DigestFrequency::Every12h.is_daily_or_longer());
        assert!(DigestFrequency::Daily.is_daily_or_longer());
        assert!(DigestFrequency::Weekly.is_daily_or_longer());
    }

    #[test]
    fn digest_hour_parses_hh_mm() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@b.c".into(),
            industry_id: None,
            digest_frequency: DigestFrequency::Daily,
            digest_time: "09:30".into(),
            last_digest_at: None,
            email_enabled: true,
            onboarded: true,
        };
        assert_eq!(user.digest_hour(), Some(9));
    }

    #[test]
    fn case_type_out_of_range_defaults_to_informational() {
        assert_eq!(CaseType::from_i64(Some(1)), CaseType::ActivelyExploited);
        assert_eq!(CaseType::from_i64(Some(4)), CaseType::Informational);
        assert_eq!(CaseType::from_i64(Some(0)), CaseType::Informational);
        assert_eq!(CaseType::from_i64(Some(7)), CaseType::Informational);
        assert_eq!(CaseType::from_i64(None), CaseType::Informational);
    }

    #[test]
    fn exposure_state_roundtrip() {
        for s in ["VULNERABLE", "FIXED", "NOT_APPLICABLE", "INDIRECT"] {
            let st: ExposureState = s.parse().unwrap();
            assert_eq!(st.to_string(), s);
        }
    }

    #[test]
    fn report_period_days() {
        assert_eq!(ReportPeriod::Daily.days(), 1);
        assert_eq!(ReportPeriod::Weekly.days(), 7);
        assert_eq!(ReportPeriod::Monthly.days(), 30);
    }

    #[test]
    fn extract_host_strips_scheme_and_path() {
        assert_eq!(extract_host("https://www.example.com/a/b"), "www.example.com");
        assert_eq!(extract_host("http://Example.COM"), "example.com");
    }

    #[test]
    fn normalize_cpe_component_collapses_case_and_spaces() {
        assert_eq!(normalize_cpe_component("Palo  Alto Networks"), "palo_alto_networks");
        assert_eq!(normalize_cpe_component(" FORTINET "), "fortinet");
        assert_eq!(
            normalize_cpe_component("Palo Alto networks"),
            normalize_cpe_component("PALO ALTO NETWORKS")
        );
    }
}

//! sqlx row shapes and conversions into the domain types.
//! Enum columns are TEXT; decoding is lenient the way the rest of the read
//! path is: unknown values fall back to the safest member.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use threatline_common::{
    Article, ArticleCve, ArticleEntity, CaseType, DigestFrequency, EntityType, ExposureState,
    IndustrySignal, Keyword, NewsGroup, Source, SourceType, TechStackItem, User, UserArticle,
    UserCveExposure,
};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub industry_id: Option<Uuid>,
    pub digest_frequency: String,
    pub digest_time: String,
    pub last_digest_at: Option<DateTime<Utc>>,
    pub email_enabled: bool,
    pub onboarded: bool,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: r.id,
            email: r.email,
            industry_id: r.industry_id,
            digest_frequency: r
                .digest_frequency
                .parse()
                .unwrap_or(DigestFrequency::Daily),
            digest_time: r.digest_time,
            last_digest_at: r.last_digest_at,
            email_enabled: r.email_enabled,
            onboarded: r.onboarded,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    pub name: String,
    pub source_type: String,
    pub active: bool,
}

impl From<SourceRow> for Source {
    fn from(r: SourceRow) -> Self {
        Source {
            id: r.id,
            user_id: r.user_id,
            url: r.url,
            name: r.name,
            source_type: r.source_type.parse().unwrap_or(SourceType::Rss),
            active: r.active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct KeywordRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub word: String,
}

impl From<KeywordRow> for Keyword {
    fn from(r: KeywordRow) -> Self {
        Keyword {
            id: r.id,
            user_id: r.user_id,
            word: r.word,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct IndustrySignalRow {
    pub id: Uuid,
    pub industry_id: Uuid,
    pub slug: String,
    pub name: String,
}

impl From<IndustrySignalRow> for IndustrySignal {
    fn from(r: IndustrySignalRow) -> Self {
        IndustrySignal {
            id: r.id,
            industry_id: r.industry_id,
            slug: r.slug,
            name: r.name,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleRow {
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

impl From<ArticleRow> for Article {
    fn from(r: ArticleRow) -> Self {
        Article {
            id: r.id,
            source_id: r.source_id,
            url: r.url,
            title: r.title,
            content: r.content,
            clean_text: r.clean_text,
            raw_html: r.raw_html,
            external_links: r.external_links,
            author: r.author,
            guid: r.guid,
            published_at: r.published_at,
            entities_extracted: r.entities_extracted,
            cves_extracted: r.cves_extracted,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserArticleRow {
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

impl From<UserArticleRow> for UserArticle {
    fn from(r: UserArticleRow) -> Self {
        UserArticle {
            user_id: r.user_id,
            article_id: r.article_id,
            source_id: r.source_id,
            matched: r.matched,
            matched_keywords: r.matched_keywords,
            news_group_id: r.news_group_id,
            read: r.read,
            sent: r.sent,
            sent_at: r.sent_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleEntityRow {
    pub article_id: Uuid,
    pub entity_type: String,
    pub name: String,
    pub confidence: f64,
}

impl From<ArticleEntityRow> for ArticleEntity {
    fn from(r: ArticleEntityRow) -> Self {
        ArticleEntity {
            article_id: r.article_id,
            entity_type: r.entity_type.parse().unwrap_or(EntityType::Company),
            name: r.name,
            confidence: r.confidence,
        }
    }
}

/// An article signal joined with its catalog slug, the shape clustering
/// and reporting consume.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleSignalWithSlug {
    pub article_id: Uuid,
    pub industry_signal_id: Uuid,
    pub slug: String,
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleCveRow {
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

impl From<ArticleCveRow> for ArticleCve {
    fn from(r: ArticleCveRow) -> Self {
        ArticleCve {
            id: r.id,
            article_id: r.article_id,
            cve_id: r.cve_id,
            cvss_score: r.cvss_score,
            severity: r.severity,
            description: r.description,
            cpe_matches: r.cpe_matches,
            published_date: r.published_date,
            in_kev: r.in_kev,
            kev_date_added: r.kev_date_added,
            kev_due_date: r.kev_due_date,
            kev_ransomware_use: r.kev_ransomware_use,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TechStackItemRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub vendor: String,
    pub product: String,
    pub version: Option<String>,
    pub category: String,
    pub cpe_pattern: String,
    pub active: bool,
}

impl From<TechStackItemRow> for TechStackItem {
    fn from(r: TechStackItemRow) -> Self {
        TechStackItem {
            id: r.id,
            user_id: r.user_id,
            vendor: r.vendor,
            product: r.product,
            version: r.version,
            category: r.category,
            cpe_pattern: r.cpe_pattern,
            active: r.active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserCveExposureRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cve_id: String,
    pub article_cve_id: Option<Uuid>,
    pub tech_stack_item_id: Option<Uuid>,
    pub exposure_state: String,
    pub auto_classified: bool,
    pub matched_cpe: Option<String>,
    pub first_detected_at: DateTime<Utc>,
    pub patched_at: Option<DateTime<Utc>>,
    pub remediation_deadline: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl From<UserCveExposureRow> for UserCveExposure {
    fn from(r: UserCveExposureRow) -> Self {
        UserCveExposure {
            id: r.id,
            user_id: r.user_id,
            cve_id: r.cve_id,
            article_cve_id: r.article_cve_id,
            tech_stack_item_id: r.tech_stack_item_id,
            exposure_state: r
                .exposure_state
                .parse()
                .unwrap_or(ExposureState::NotApplicable),
            auto_classified: r.auto_classified,
            matched_cpe: r.matched_cpe,
            first_detected_at: r.first_detected_at,
            patched_at: r.patched_at,
            remediation_deadline: r.remediation_deadline,
            notes: r.notes,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NewsGroupRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub synopsis: Option<String>,
    pub executive_summary: Option<String>,
    pub impact_analysis: Option<String>,
    pub actionability: Option<String>,
    pub case_type: Option<i16>,
    pub confidence: f64,
    pub date: DateTime<Utc>,
}

impl From<NewsGroupRow> for NewsGroup {
    fn from(r: NewsGroupRow) -> Self {
        NewsGroup {
            id: r.id,
            user_id: r.user_id,
            title: r.title,
            synopsis: r.synopsis,
            executive_summary: r.executive_summary,
            impact_analysis: r.impact_analysis,
            actionability: r.actionability,
            case_type: r.case_type.map(|v| CaseType::from_i64(Some(v as i64))),
            confidence: r.confidence,
            date: r.date,
        }
    }
}

/// An exposure joined with the CVSS/KEV facts of its article CVE, the shape
/// the remediation metrics consume.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExposureWithCve {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cve_id: String,
    pub exposure_state: String,
    pub auto_classified: bool,
    pub first_detected_at: DateTime<Utc>,
    pub patched_at: Option<DateTime<Utc>>,
    pub remediation_deadline: Option<DateTime<Utc>>,
    pub cvss_score: Option<f64>,
    pub in_kev: Option<bool>,
}

impl ExposureWithCve {
    pub fn state(&self) -> ExposureState {
        self.exposure_state
            .parse()
            .unwrap_or(ExposureState::NotApplicable)
    }
}

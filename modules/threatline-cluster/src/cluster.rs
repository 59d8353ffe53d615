//! Story clustering: IDF-weighted Jaccard similarity over entities, signals,
//! and matched keywords, plus temporal decay, then greedy agglomeration with
//! a hard size cap.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

const SIMILARITY_THRESHOLD: f64 = 0.30;
pub const MAX_GROUP_SIZE: usize = 10;
/// Hours over which temporal affinity decays to zero.
const TEMPORAL_DECAY_HOURS: f64 = 72.0;

const WEIGHT_ENTITIES: f64 = 0.35;
const WEIGHT_SIGNALS: f64 = 0.30;
const WEIGHT_KEYWORDS: f64 = 0.15;
const WEIGHT_TEMPORAL: f64 = 0.20;

/// Confidence assigned to a group with a single article.
const SINGLETON_CONFIDENCE: f64 = 0.5;

/// One article's clustering features.
#[derive(Debug, Clone)]
pub struct ClusterArticle {
    pub article_id: Uuid,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Entity names in display casing; lowercased internally for matching.
    pub entities: Vec<String>,
    pub signals: Vec<String>,
    pub keywords: Vec<String>,
}

/// A clustered story before briefing.
#[derive(Debug, Clone)]
pub struct ArticleGroup {
    pub title: String,
    pub article_ids: Vec<Uuid>,
    pub confidence: f64,
    pub dominant_signals: Vec<String>,
    pub dominant_entities: Vec<String>,
}

/// Cluster a user's ungrouped articles. Output groups are ordered by article
/// count descending; unassigned articles come out as singletons.
pub fn cluster_articles(articles: &[ClusterArticle]) -> Vec<ArticleGroup> {
    if articles.is_empty() {
        return Vec::new();
    }

    let features: Vec<ArticleFeatures> = articles.iter().map(ArticleFeatures::from).collect();

    let entity_idf = idf_weights(&features, |f| &f.entities);
    let signal_idf = idf_weights(&features, |f| &f.signals);
    let keyword_idf = idf_weights(&features, |f| &f.keywords);

    // All pairs above the threshold, best first. Ties are broken by input
    // order of the pair, which keeps merges stable across runs.
    let n = articles.len();
    let mut sims: HashMap<(usize, usize), f64> = HashMap::new();
    let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let sim = similarity(
                &features[i],
                &features[j],
                &entity_idf,
                &signal_idf,
                &keyword_idf,
            );
            sims.insert((i, j), sim);
            if sim >= SIMILARITY_THRESHOLD {
                pairs.push((i, j, sim));
            }
        }
    }
    pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    // Greedy agglomeration under the size cap.
    let mut group_of: Vec<Option<usize>> = vec![None; n];
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (a, b, _) in pairs {
        match (group_of[a], group_of[b]) {
            (None, None) => {
                groups.push(vec![a, b]);
                group_of[a] = Some(groups.len() - 1);
                group_of[b] = Some(groups.len() - 1);
            }
            (Some(g), None) => {
                if groups[g].len() < MAX_GROUP_SIZE {
                    groups[g].push(b);
                    group_of[b] = Some(g);
                }
            }
            (None, Some(g)) => {
                if groups[g].len() < MAX_GROUP_SIZE {
                    groups[g].push(a);
                    group_of[a] = Some(g);
                }
            }
            (Some(ga), Some(gb)) if ga != gb => {
                if groups[ga].len() + groups[gb].len() <= MAX_GROUP_SIZE {
                    let moved = std::mem::take(&mut groups[gb]);
                    for idx in &moved {
                        group_of[*idx] = Some(ga);
                    }
                    groups[ga].extend(moved);
                }
            }
            _ => {}
        }
    }
    for idx in 0..n {
        if group_of[idx].is_none() {
            groups.push(vec![idx]);
        }
    }

    let mut result: Vec<ArticleGroup> = groups
        .into_iter()
        .filter(|members| !members.is_empty())
        .map(|members| build_group(&members, articles, &sims))
        .collect();

    result.sort_by(|a, b| b.article_ids.len().cmp(&a.article_ids.len()));

    info!(
        articles = articles.len(),
        groups = result.len(),
        "Clustering complete"
    );
    result
}

// --- Internals ---

struct ArticleFeatures {
    entities: HashSet<String>,
    signals: HashSet<String>,
    keywords: HashSet<String>,
    published_at: Option<DateTime<Utc>>,
}

impl From<&ClusterArticle> for ArticleFeatures {
    fn from(a: &ClusterArticle) -> Self {
        Self {
            entities: a.entities.iter().map(|e| e.to_lowercase()).collect(),
            signals: a.signals.iter().map(|s| s.to_lowercase()).collect(),
            keywords: a.keywords.iter().map(|k| k.to_lowercase()).collect(),
            published_at: a.published_at,
        }
    }
}

/// Normalized IDF: `log(N/df) / log(N)`. A term in every article weighs 0;
/// a term in exactly one article weighs 1. For a single-article corpus the
/// fallback weight is 1.
fn idf_weights<F>(features: &[ArticleFeatures], accessor: F) -> HashMap<String, f64>
where
    F: Fn(&ArticleFeatures) -> &HashSet<String>,
{
    let n = features.len();
    let mut df: HashMap<String, usize> = HashMap::new();
    for f in features {
        for term in accessor(f) {
            *df.entry(term.clone()).or_insert(0) += 1;
        }
    }

    df.into_iter()
        .map(|(term, count)| {
            let weight = if n <= 1 {
                1.0
            } else {
                ((n as f64) / (count as f64)).ln() / (n as f64).ln()
            };
            (term, weight)
        })
        .collect()
}

/// IDF-weighted Jaccard: Σ idf(A∩B) / Σ idf(A∪B), 0 when the union is empty.
fn weighted_jaccard(
    a: &HashSet<String>,
    b: &HashSet<String>,
    idf: &HashMap<String, f64>,
) -> f64 {
    let union_weight: f64 = a
        .union(b)
        .map(|t| idf.get(t).copied().unwrap_or(0.0))
        .sum();
    if union_weight <= 0.0 {
        return 0.0;
    }
    let intersection_weight: f64 = a
        .intersection(b)
        .map(|t| idf.get(t).copied().unwrap_or(0.0))
        .sum();
    intersection_weight / union_weight
}

fn temporal_affinity(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let delta_hours = (a - b).num_minutes().abs() as f64 / 60.0;
            (1.0 - delta_hours / TEMPORAL_DECAY_HOURS).max(0.0)
        }
        _ => 0.0,
    }
}

fn similarity(
    a: &ArticleFeatures,
    b: &ArticleFeatures,
    entity_idf: &HashMap<String, f64>,
    signal_idf: &HashMap<String, f64>,
    keyword_idf: &HashMap<String, f64>,
) -> f64 {
    WEIGHT_ENTITIES * weighted_jaccard(&a.entities, &b.entities, entity_idf)
        + WEIGHT_SIGNALS * weighted_jaccard(&a.signals, &b.signals, signal_idf)
        + WEIGHT_KEYWORDS * weighted_jaccard(&a.keywords, &b.keywords, keyword_idf)
        + WEIGHT_TEMPORAL * temporal_affinity(a.published_at, b.published_at)
}

fn build_group(
    members: &[usize],
    articles: &[ClusterArticle],
    sims: &HashMap<(usize, usize), f64>,
) -> ArticleGroup {
    let confidence = if members.len() < 2 {
        SINGLETON_CONFIDENCE
    } else {
        let mut total = 0.0;
        let mut count = 0usize;
        for (pos, &i) in members.iter().enumerate() {
            for &j in &members[pos + 1..] {
                let key = if i < j { (i, j) } else { (j, i) };
                total += sims.get(&key).copied().unwrap_or(0.0);
                count += 1;
            }
        }
        total / count as f64
    };

    let dominant_entities = top_terms(members, articles, |a| &a.entities);
    let dominant_signals = top_terms(members, articles, |a| &a.signals);

    let title = group_title(
        dominant_entities.first().map(String::as_str),
        dominant_signals.first().map(String::as_str),
        &articles[members[0]].title,
    );

    ArticleGroup {
        title,
        article_ids: members.iter().map(|&i| articles[i].article_id).collect(),
        confidence,
        dominant_signals,
        dominant_entities,
    }
}

/// Top-3 most frequent terms in the group, display casing preserved from
/// first occurrence. Ties break alphabetically for determinism.
fn top_terms<F>(members: &[usize], articles: &[ClusterArticle], accessor: F) -> Vec<String>
where
    F: Fn(&ClusterArticle) -> &Vec<String>,
{
    let mut counts: HashMap<String, (usize, String)> = HashMap::new();
    for &idx in members {
        for term in accessor(&articles[idx]) {
            let key = term.to_lowercase();
            let entry = counts.entry(key).or_insert((0, term.clone()));
            entry.0 += 1;
        }
    }
    let mut ranked: Vec<(usize, String)> = counts.into_values().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    ranked.into_iter().take(3).map(|(_, name)| name).collect()
}

/// Provisional group title; the briefing generator usually overwrites it.
fn group_title(entity: Option<&str>, signal: Option<&str>, seed_title: &str) -> String {
    match (entity, signal) {
        (Some(e), Some(s)) => format!("{e}: {}", title_case(s)),
        (Some(e), None) => format!("{e} Incident"),
        (None, Some(s)) => format!("{} Activity", title_case(s)),
        (None, None) => seed_title.to_string(),
    }
}

/// "data-breach" → "Data Breach".
fn title_case(slug: &str) -> String {
    slug.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(
        title: &str,
        entities: &[&str],
        signals: &[&str],
        keywords: &[&str],
        published_at: Option<DateTime<Utc>>,
    ) -> ClusterArticle {
        ClusterArticle {
            article_id: Uuid::new_v4(),
            title: title.to_string(),
            published_at,
            entities: entities.iter().map(|s| s.to_string()).collect(),
            signals: signals.iter().map(|s| s.to_string()).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(cluster_articles(&[]).is_empty());
    }

    #[test]
    fn single_article_is_a_singleton_with_half_confidence() {
        let groups = cluster_articles(&[article("Solo", &["Acme"], &[], &[], None)]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].article_ids.len(), 1);
        assert_eq!(groups[0].confidence, 0.5);
    }

    #[test]
    fn shared_entity_and_signal_clusters_three_articles() {
        let now = Utc::now();
        let articles = vec![
            article(
                "FortiOS flaw exploited",
                &["Fortinet"],
                &["vulnerability"],
                &["firewall"],
                Some(now),
            ),
            article(
                "Fortinet patches bug",
                &["Fortinet"],
                &["vulnerability"],
                &["patch"],
                Some(now - chrono::Duration::hours(6)),
            ),
            article(
                "New Fortinet advisory",
                &["Fortinet"],
                &["vulnerability"],
                &["advisory"],
                Some(now - chrono::Duration::hours(12)),
            ),
            // Unrelated corpus members keep the shared terms discriminative
            article("Phishing wave", &["Acme Bank"], &["phishing"], &[], Some(now)),
            article("DDoS takedown", &["Cloudco"], &["ddos"], &[], Some(now)),
        ];
        let groups = cluster_articles(&articles);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].article_ids.len(), 3);
        assert_eq!(groups[0].dominant_entities[0], "Fortinet");
        assert!(groups[0].title.starts_with("Fortinet: "));
        assert!(groups[0].confidence > SIMILARITY_THRESHOLD);
    }

    #[test]
    fn universal_signal_contributes_nothing() {
        // Ten articles share one signal and nothing else: idf(signal) = 0,
        // so similarity is temporal-only (0.20 same-day) and below threshold.
        let now = Utc::now();
        let articles: Vec<ClusterArticle> = (0..10)
            .map(|i| {
                let entity = format!("Entity{i}");
                article(
                    &format!("Article {i}"),
                    &[entity.as_str()],
                    &["vulnerability"],
                    &[],
                    Some(now),
                )
            })
            .collect();
        let groups = cluster_articles(&articles);
        assert_eq!(groups.len(), 10);
        assert!(groups.iter().all(|g| g.article_ids.len() == 1));
    }

    #[test]
    fn idf_normalization_bounds() {
        let features: Vec<ArticleFeatures> = [
            article("a", &["shared", "rare"], &[], &[], None),
            article("b", &["shared"], &[], &[], None),
            article("c", &["shared"], &[], &[], None),
        ]
        .iter()
        .map(ArticleFeatures::from)
        .collect();
        let idf = idf_weights(&features, |f| &f.entities);
        assert_eq!(idf["shared"], 0.0);
        assert_eq!(idf["rare"], 1.0);
    }

    #[test]
    fn group_size_never_exceeds_cap() {
        // Twenty near-identical articles in a mixed corpus must split into
        // groups of at most 10.
        let now = Utc::now();
        let mut articles: Vec<ClusterArticle> = (0..20)
            .map(|i| {
                article(
                    &format!("Story {i}"),
                    &["LockBit", "Boeing"],
                    &["ransomware"],
                    &["ransomware"],
                    Some(now),
                )
            })
            .collect();
        for i in 0..10 {
            let vendor = format!("Vendor{i}");
            articles.push(article(
                &format!("Other {i}"),
                &[vendor.as_str()],
                &["advisory"],
                &[],
                Some(now),
            ));
        }
        let groups = cluster_articles(&articles);
        assert!(groups.iter().all(|g| g.article_ids.len() <= MAX_GROUP_SIZE));
        let clustered: usize = groups
            .iter()
            .filter(|g| g.dominant_entities.contains(&"LockBit".to_string()))
            .map(|g| g.article_ids.len())
            .sum();
        assert_eq!(clustered, 20);
    }

    #[test]
    fn same_day_articles_have_full_temporal_affinity() {
        let now = Utc::now();
        assert_eq!(temporal_affinity(Some(now), Some(now)), 1.0);
        assert_eq!(temporal_affinity(Some(now), None), 0.0);
        let far = now - chrono::Duration::hours(100);
        assert_eq!(temporal_affinity(Some(now), Some(far)), 0.0);
    }

    #[test]
    fn groups_ordered_by_size_desc() {
        let now = Utc::now();
        let mut articles = vec![
            article("pair 1", &["Acme"], &["phishing"], &[], Some(now)),
            article("pair 2", &["Acme"], &["phishing"], &[], Some(now)),
        ];
        articles.push(article("loner", &["Zeta"], &["malware"], &[], None));
        let groups = cluster_articles(&articles);
        assert_eq!(groups[0].article_ids.len(), 2);
        assert_eq!(groups[1].article_ids.len(), 1);
    }

    #[test]
    fn title_fallbacks() {
        assert_eq!(group_title(Some("Fortinet"), Some("data-breach"), "seed"), "Fortinet: Data Breach");
        assert_eq!(group_title(Some("Fortinet"), None, "seed"), "Fortinet Incident");
        assert_eq!(group_title(None, Some("ransomware"), "seed"), "Ransomware Activity");
        assert_eq!(group_title(None, None, "seed"), "seed");
    }
}

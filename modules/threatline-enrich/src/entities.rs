use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use llm_client::{util, CompletionRequest, CompletionService};
use threatline_common::EntityType;

/// Articles per LLM call. Small batches keep the prompt bounded and one bad
/// response from poisoning too many articles.
pub const ENTITY_BATCH_SIZE: usize = 5;
/// Per-article text budget inside the batch prompt.
const ARTICLE_TEXT_CAP: usize = 4_000;
const ENTITY_MIN_CONFIDENCE: f64 = 0.3;
const SIGNAL_MIN_CONFIDENCE: f64 = 0.5;
const EXTRACTION_MAX_TOKENS: u32 = 2_000;

/// One article's text handed to the extractor.
#[derive(Debug, Clone)]
pub struct ArticleInput {
    pub id: Uuid,
    pub title: String,
    pub text: String,
}

/// Filtered extraction output for one article.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFacts {
    pub entities: Vec<(EntityType, String, f64)>,
    /// (signal slug, confidence); slugs are guaranteed to be in the
    /// caller's allowed set.
    pub signals: Vec<(String, f64)>,
}

// --- LLM response shapes ---

#[derive(Debug, Deserialize)]
struct RawNamed {
    name: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RawSignal {
    slug: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    companies: Vec<RawNamed>,
    #[serde(default)]
    people: Vec<RawNamed>,
    #[serde(default)]
    products: Vec<RawNamed>,
    #[serde(default)]
    geographies: Vec<RawNamed>,
    #[serde(default)]
    sectors: Vec<RawNamed>,
    #[serde(default)]
    signals: Vec<RawSignal>,
}

/// Batched entity and industry-signal extraction.
pub struct EntityExtractor {
    llm: Arc<dyn CompletionService>,
}

impl EntityExtractor {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    /// Extract entities and signals for up to [`ENTITY_BATCH_SIZE`] articles
    /// in one completion. Articles missing from the response are simply
    /// absent from the result map.
    pub async fn extract_batch(
        &self,
        articles: &[ArticleInput],
        allowed_slugs: &[String],
    ) -> Result<HashMap<Uuid, ExtractedFacts>> {
        if articles.is_empty() {
            return Ok(HashMap::new());
        }

        let request = CompletionRequest::json(
            build_system_prompt(allowed_slugs),
            build_user_prompt(articles),
            EXTRACTION_MAX_TOKENS,
        );
        let response = self.llm.complete(&request).await?;

        let raw: HashMap<String, RawExtraction> = util::parse_json_response(&response)?;

        let allowed: HashSet<&str> = allowed_slugs.iter().map(String::as_str).collect();
        let mut result = HashMap::new();
        for (key, extraction) in raw {
            let Ok(article_id) = key.parse::<Uuid>() else {
                warn!(key, "Extractor returned an unknown article key, dropping");
                continue;
            };
            result.insert(article_id, filter_extraction(extraction, &allowed));
        }

        info!(
            articles = articles.len(),
            extracted = result.len(),
            "Entity extraction batch complete"
        );
        Ok(result)
    }
}

/// Apply the response filters: low-confidence entities and signals are
/// dropped, as is any signal slug outside the allowed vocabulary.
fn filter_extraction(raw: RawExtraction, allowed_slugs: &HashSet<&str>) -> ExtractedFacts {
    let mut entities = Vec::new();
    let typed = [
        (EntityType::Company, raw.companies),
        (EntityType::Person, raw.people),
        (EntityType::Product, raw.products),
        (EntityType::Geography, raw.geographies),
        (EntityType::Sector, raw.sectors),
    ];
    for (entity_type, list) in typed {
        for e in list {
            if e.confidence >= ENTITY_MIN_CONFIDENCE && !e.name.trim().is_empty() {
                entities.push((entity_type, e.name, e.confidence));
            }
        }
    }

    let signals = raw
        .signals
        .into_iter()
        .filter(|s| s.confidence >= SIGNAL_MIN_CONFIDENCE && allowed_slugs.contains(s.slug.as_str()))
        .map(|s| (s.slug, s.confidence))
        .collect();

    ExtractedFacts { entities, signals }
}

fn build_system_prompt(allowed_slugs: &[String]) -> String {
    format!(
        r#"You are a cyber-security news analyst extracting structured facts from articles.

For each article, identify:
- companies: vendors, victims, security firms
- people: named individuals (researchers, executives, threat actor personas)
- products: software and hardware products
- geographies: countries and regions involved
- sectors: affected industry sectors
- signals: which of the allowed industry signals the article evidences

Allowed signal slugs (use no others): {slugs}

Respond with a single JSON object keyed by article id. Each value has the shape:
{{"companies": [{{"name": "...", "confidence": 0.0}}], "people": [...], "products": [...],
  "geographies": [...], "sectors": [...], "signals": [{{"slug": "...", "confidence": 0.0}}]}}

Confidence is 0.0-1.0. Omit anything you are not reasonably sure about."#,
        slugs = allowed_slugs.join(", ")
    )
}

fn build_user_prompt(articles: &[ArticleInput]) -> String {
    let mut prompt = String::from("Extract facts from these articles.\n");
    for article in articles {
        let text = util::truncate_to_char_boundary(&article.text, ARTICLE_TEXT_CAP);
        prompt.push_str(&format!(
            "\n--- Article {id} ---\nTitle: {title}\n{text}\n",
            id = article.id,
            title = article.title,
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entities: Vec<(&str, f64)>, signals: Vec<(&str, f64)>) -> RawExtraction {
        RawExtraction {
            companies: entities
                .into_iter()
                .map(|(name, confidence)| RawNamed {
                    name: name.into(),
                    confidence,
                })
                .collect(),
            signals: signals
                .into_iter()
                .map(|(slug, confidence)| RawSignal {
                    slug: slug.into(),
                    confidence,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn low_confidence_entities_are_dropped() {
        let allowed: HashSet<&str> = ["ransomware"].into_iter().collect();
        let facts = filter_extraction(raw(vec![("Fortinet", 0.9), ("Maybe Corp", 0.2)], vec![]), &allowed);
        assert_eq!(facts.entities.len(), 1);
        assert_eq!(facts.entities[0].1, "Fortinet");
    }

    #[test]
    fn low_confidence_signals_are_dropped() {
        let allowed: HashSet<&str> = ["ransomware"].into_iter().collect();
        let facts = filter_extraction(
            raw(vec![], vec![("ransomware", 0.9), ("ransomware", 0.4)]),
            &allowed,
        );
        assert_eq!(facts.signals.len(), 1);
    }

    #[test]
    fn invented_signal_slugs_are_dropped() {
        let allowed: HashSet<&str> = ["ransomware", "data-breach"].into_iter().collect();
        let facts = filter_extraction(
            raw(vec![], vec![("ransomware", 0.8), ("quantum-doom", 0.99)]),
            &allowed,
        );
        assert_eq!(facts.signals.len(), 1);
        assert_eq!(facts.signals[0].0, "ransomware");
    }

    #[tokio::test]
    async fn extract_batch_parses_keyed_response() {
        use async_trait::async_trait;

        struct Fake {
            body: String,
        }

        #[async_trait]
        impl CompletionService for Fake {
            async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
                Ok(self.body.clone())
            }
        }

        let id = Uuid::new_v4();
        let body = format!(
            r#"{{"{id}": {{"companies": [{{"name": "Fortinet", "confidence": 0.9}}],
                 "signals": [{{"slug": "vulnerability", "confidence": 0.8}}]}}}}"#
        );
        let extractor = EntityExtractor::new(Arc::new(Fake { body }));
        let articles = vec![ArticleInput {
            id,
            title: "t".into(),
            text: "x".into(),
        }];
        let out = extractor
            .extract_batch(&articles, &["vulnerability".to_string()])
            .await
            .unwrap();
        let facts = out.get(&id).unwrap();
        assert_eq!(facts.entities.len(), 1);
        assert_eq!(facts.signals.len(), 1);
    }
}

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Deserialize;
use tracing::info;

use llm_client::{util, CompletionRequest, CompletionService};
use threatline_common::CaseType;

/// Combined article text budget per briefing prompt. When a group exceeds
/// it, every article is cut to an equal share.
const GROUP_TEXT_CAP: usize = 20_000;
const BRIEFING_MAX_TOKENS: u32 = 1_500;

/// A generated multi-section briefing for one story.
#[derive(Debug, Clone)]
pub struct Briefing {
    pub title: String,
    pub synopsis: String,
    pub executive_summary: String,
    pub impact_analysis: String,
    pub actionability: String,
    pub case_type: CaseType,
}

#[derive(Debug, Deserialize)]
struct RawBriefing {
    #[serde(default)]
    title: String,
    #[serde(default)]
    synopsis: String,
    #[serde(default, rename = "executiveSummary")]
    executive_summary: String,
    #[serde(default, rename = "impactAnalysis")]
    impact_analysis: String,
    #[serde(default)]
    actionability: String,
    #[serde(rename = "caseType")]
    case_type: Option<i64>,
}

/// One completion per story group.
pub struct BriefingGenerator {
    llm: Arc<dyn CompletionService>,
}

impl BriefingGenerator {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    /// Generate a briefing from the group's articles (title, text) pairs.
    /// An empty title or synopsis in the response is a failure; the caller
    /// leaves the group untouched.
    pub async fn generate(&self, articles: &[(String, String)]) -> Result<Briefing> {
        if articles.is_empty() {
            bail!("Cannot brief an empty group");
        }

        let request = CompletionRequest::json(
            SYSTEM_PROMPT,
            build_user_prompt(articles),
            BRIEFING_MAX_TOKENS,
        );
        let response = self.llm.complete(&request).await?;
        let raw: RawBriefing = util::parse_json_response(&response)?;

        if raw.title.trim().is_empty() || raw.synopsis.trim().is_empty() {
            bail!("Briefing response missing title or synopsis");
        }

        let briefing = Briefing {
            title: raw.title,
            synopsis: raw.synopsis,
            executive_summary: raw.executive_summary,
            impact_analysis: raw.impact_analysis,
            actionability: raw.actionability,
            case_type: CaseType::from_i64(raw.case_type),
        };
        info!(case_type = briefing.case_type.as_i16(), "Briefing generated");
        Ok(briefing)
    }
}

const SYSTEM_PROMPT: &str = r#"You are a senior cyber threat intelligence analyst writing a briefing about one security story, based on the news articles provided.

Respond with a single JSON object with exactly these fields:
{
  "title": "concise story headline",
  "synopsis": "2-3 sentence factual summary",
  "executiveSummary": "one paragraph for leadership",
  "impactAnalysis": "who is affected and how badly",
  "actionability": "concrete recommended actions",
  "caseType": 1
}

caseType is an integer severity bucket:
1 = actively exploited in the wild
2 = vulnerability disclosed, no known exploitation
3 = issue fixed / patched / resolved
4 = informational only

Be specific; never invent CVEs, vendors, or victims not in the articles."#;

/// Join article texts, capping the total. Oversized groups cut each article
/// to an equal share of the budget.
fn build_user_prompt(articles: &[(String, String)]) -> String {
    let total: usize = articles.iter().map(|(_, text)| text.len()).sum();
    let per_article_cap = if total > GROUP_TEXT_CAP {
        GROUP_TEXT_CAP / articles.len()
    } else {
        usize::MAX
    };

    let mut prompt = String::from("Articles in this story:\n");
    for (i, (title, text)) in articles.iter().enumerate() {
        let body = if per_article_cap == usize::MAX {
            text.as_str()
        } else {
            util::truncate_to_char_boundary(text, per_article_cap)
        };
        prompt.push_str(&format!("\n--- Article {} ---\n{title}\n{body}\n", i + 1));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn generator(body: &str) -> BriefingGenerator {
        BriefingGenerator::new(Arc::new(Fake {
            body: body.to_string(),
        }))
    }

    fn articles() -> Vec<(String, String)> {
        vec![("LockBit hits X".to_string(), "ransomware details".to_string())]
    }

    #[tokio::test]
    async fn valid_response_maps_all_fields() {
        let body = r#"{"title": "LockBit campaign", "synopsis": "A ransomware wave.",
            "executiveSummary": "Summary.", "impactAnalysis": "Severe.",
            "actionability": "Patch now.", "caseType": 1}"#;
        let briefing = generator(body).generate(&articles()).await.unwrap();
        assert_eq!(briefing.title, "LockBit campaign");
        assert_eq!(briefing.case_type, CaseType::ActivelyExploited);
    }

    #[tokio::test]
    async fn out_of_range_case_type_defaults_to_informational() {
        let body = r#"{"title": "t", "synopsis": "s", "caseType": 9}"#;
        let briefing = generator(body).generate(&articles()).await.unwrap();
        assert_eq!(briefing.case_type, CaseType::Informational);

        let body = r#"{"title": "t", "synopsis": "s"}"#;
        let briefing = generator(body).generate(&articles()).await.unwrap();
        assert_eq!(briefing.case_type, CaseType::Informational);
    }

    #[tokio::test]
    async fn empty_title_is_a_failure() {
        let body = r#"{"title": "", "synopsis": "s", "caseType": 1}"#;
        assert!(generator(body).generate(&articles()).await.is_err());
    }

    #[tokio::test]
    async fn empty_group_is_a_failure() {
        let body = r#"{"title": "t", "synopsis": "s"}"#;
        assert!(generator(body).generate(&[]).await.is_err());
    }

    #[test]
    fn oversized_groups_share_the_budget_equally() {
        let articles: Vec<(String, String)> = (0..4)
            .map(|i| (format!("a{i}"), "x".repeat(10_000)))
            .collect();
        let prompt = build_user_prompt(&articles);
        // 40k of text must be cut to roughly the cap
        assert!(prompt.len() < GROUP_TEXT_CAP + 1_000);
    }
}

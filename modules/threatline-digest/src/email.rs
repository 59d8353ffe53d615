use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use threatline_common::NewsGroup;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Outbound email seam. The digest never depends on a concrete provider.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

/// Resend-backed sender.
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(api_key: &str, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl EmailSender for ResendMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let body = json!({
            "from": self.from,
            "to": [to],
            "subject": subject,
            "html": html,
        });

        let resp = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Resend API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Resend API error ({status}): {text}"));
        }

        info!(to, subject, "Digest email sent");
        Ok(())
    }
}

/// Render the digest body from briefed stories, already ordered most
/// severe first.
pub fn render_digest_html(groups: &[NewsGroup], frontend_url: &str) -> String {
    let mut html = String::from("<h1>Your security digest</h1>");
    for group in groups {
        let severity = match group.case_type.map(|c| c.as_i16()) {
            Some(1) => "Actively exploited",
            Some(2) => "Vulnerable",
            Some(3) => "Fixed",
            _ => "Informational",
        };
        html.push_str(&format!(
            "<h2>{title}</h2><p><em>{severity}</em></p><p>{synopsis}</p>",
            title = group.title,
            synopsis = group.synopsis.as_deref().unwrap_or(""),
        ));
    }
    html.push_str(&format!(
        r#"<p><a href="{frontend_url}/feed">Open the full briefing</a></p>"#
    ));
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use threatline_common::CaseType;
    use uuid::Uuid;

    #[test]
    fn render_includes_titles_and_link() {
        let groups = vec![NewsGroup {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "LockBit campaign".into(),
            synopsis: Some("A wave of attacks.".into()),
            executive_summary: None,
            impact_analysis: None,
            actionability: None,
            case_type: Some(CaseType::ActivelyExploited),
            confidence: 0.8,
            date: Utc::now(),
        }];
        let html = render_digest_html(&groups, "https://app.example.com");
        assert!(html.contains("LockBit campaign"));
        assert!(html.contains("Actively exploited"));
        assert!(html.contains("https://app.example.com/feed"));
    }
}

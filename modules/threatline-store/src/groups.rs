use chrono::{DateTime, Utc};
use uuid::Uuid;

use threatline_common::{CaseType, NewsGroup, UserArticle};

use crate::error::Result;
use crate::rows::{NewsGroupRow, UserArticleRow};
use crate::Store;

const GROUP_COLUMNS: &str = "id, user_id, title, synopsis, executive_summary, impact_analysis, \
     actionability, case_type, confidence, date";

const USER_ARTICLE_COLUMNS: &str =
    "user_id, article_id, source_id, matched, matched_keywords, news_group_id, read, sent, sent_at";

impl Store {
    /// Matched articles that haven't been clustered into a story yet.
    pub async fn ungrouped_matched_user_articles(&self, user_id: Uuid) -> Result<Vec<UserArticle>> {
        let rows: Vec<UserArticleRow> = sqlx::query_as(&format!(
            "SELECT {USER_ARTICLE_COLUMNS} FROM user_articles
             WHERE user_id = $1 AND matched AND news_group_id IS NULL"
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn user_articles_in_groups(
        &self,
        user_id: Uuid,
        group_ids: &[Uuid],
    ) -> Result<Vec<UserArticle>> {
        let rows: Vec<UserArticleRow> = sqlx::query_as(&format!(
            "SELECT {USER_ARTICLE_COLUMNS} FROM user_articles
             WHERE user_id = $1 AND news_group_id = ANY($2)"
        ))
        .bind(user_id)
        .bind(group_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn create_news_group(
        &self,
        user_id: Uuid,
        title: &str,
        confidence: f64,
        date: DateTime<Utc>,
    ) -> Result<NewsGroup> {
        let row: NewsGroupRow = sqlx::query_as(&format!(
            "INSERT INTO news_groups (user_id, title, confidence, date)
             VALUES ($1, $2, $3, $4)
             RETURNING {GROUP_COLUMNS}"
        ))
        .bind(user_id)
        .bind(title)
        .bind(confidence)
        .bind(date)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    pub async fn assign_articles_to_group(
        &self,
        user_id: Uuid,
        article_ids: &[Uuid],
        group_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_articles SET news_group_id = $3
             WHERE user_id = $1 AND article_id = ANY($2)",
        )
        .bind(user_id)
        .bind(article_ids)
        .bind(group_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Overwrite a group's narrative fields with a generated briefing.
    pub async fn update_group_briefing(
        &self,
        group_id: Uuid,
        title: &str,
        synopsis: &str,
        executive_summary: &str,
        impact_analysis: &str,
        actionability: &str,
        case_type: CaseType,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE news_groups
             SET title = $2, synopsis = $3, executive_summary = $4,
                 impact_analysis = $5, actionability = $6, case_type = $7
             WHERE id = $1",
        )
        .bind(group_id)
        .bind(title)
        .bind(synopsis)
        .bind(executive_summary)
        .bind(impact_analysis)
        .bind(actionability)
        .bind(case_type.as_i16())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Mark the user's matched, not-yet-sent articles as delivered.
    pub async fn mark_matched_articles_sent(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_articles SET sent = TRUE, sent_at = $2
             WHERE user_id = $1 AND matched AND NOT sent",
        )
        .bind(user_id)
        .bind(at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Groups with at least one article published on or after `since`.
    pub async fn groups_for_user_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<NewsGroup>> {
        let rows: Vec<NewsGroupRow> = sqlx::query_as(&format!(
            "SELECT {GROUP_COLUMNS} FROM news_groups g
             WHERE g.user_id = $1 AND EXISTS (
                 SELECT 1 FROM user_articles ua
                 JOIN articles a ON a.id = ua.article_id
                 WHERE ua.news_group_id = g.id AND a.published_at >= $2
             )"
        ))
        .bind(user_id)
        .bind(since)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Feed view: briefed stories, most severe case type first, newest first.
    pub async fn briefs_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<NewsGroup>> {
        let rows: Vec<NewsGroupRow> = sqlx::query_as(&format!(
            "SELECT {GROUP_COLUMNS} FROM news_groups
             WHERE user_id = $1
             ORDER BY case_type ASC NULLS LAST, date DESC
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
